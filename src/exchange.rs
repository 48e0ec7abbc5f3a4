//! Exchanges: one request/response round trip and its classification.
//!
//! An [`Exchange`] is created when a request is accepted on a connection and
//! is handed to the caller's callback exactly once, when a reply arrives, the
//! deadline passes, or the connection fails or closes. [`Exchange::outcome`]
//! classifies the result in a fixed order:
//!
//! 1. local or transport error
//! 2. timeout
//! 3. SID mismatch
//! 4. bad response (command mismatch or non-success end code)
//! 5. success

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use serde::Serialize;

use crate::command::Request;
use crate::error::FinsError;
use crate::response::Response;

/// Opaque caller context echoed back on the completed exchange.
pub type Tag = serde_json::Value;

/// Receives the completed exchange. Invoked exactly once, from the connection task.
pub type ReplyCallback = Box<dyn FnOnce(Exchange) + Send + 'static>;

/// Connection-level counters, snapshotted onto every completed exchange.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    /// Requests accepted by `submit`.
    pub submitted: u64,
    /// Requests written to the transport.
    pub sent: u64,
    /// Replies matched to a pending exchange.
    pub replies: u64,
    /// Exchanges that hit their deadline.
    pub timeouts: u64,
    /// Exchanges completed with a local or transport error.
    pub errors: u64,
    /// Exchanges cancelled by a close.
    pub cancelled: u64,
    /// Frames that matched no pending exchange or could not be decoded.
    pub unsolicited: u64,
    /// Submissions refused because the queue was full.
    pub rejected: u64,
    /// Requests waiting to be sent at snapshot time.
    pub queued: usize,
    /// Requests sent and awaiting a reply at snapshot time.
    pub in_flight: usize,
    /// Fastest reply time in milliseconds.
    pub min_reply_ms: Option<f64>,
    /// Slowest reply time in milliseconds.
    pub max_reply_ms: Option<f64>,
    /// Mean reply time in milliseconds.
    pub avg_reply_ms: Option<f64>,
}

/// Running counters behind [`Stats`].
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub submitted: u64,
    pub sent: u64,
    pub replies: u64,
    pub timeouts: u64,
    pub errors: u64,
    pub cancelled: u64,
    pub unsolicited: u64,
    pub rejected: u64,
    min_reply: Option<Duration>,
    max_reply: Option<Duration>,
    total_reply: Duration,
}

impl Counters {
    pub fn record_reply(&mut self, taken: Duration) {
        self.replies += 1;
        self.total_reply += taken;
        self.min_reply = Some(self.min_reply.map_or(taken, |m| m.min(taken)));
        self.max_reply = Some(self.max_reply.map_or(taken, |m| m.max(taken)));
    }

    pub fn snapshot(&self, queued: usize, in_flight: usize) -> Stats {
        let ms = |d: Duration| d.as_secs_f64() * 1000.0;
        Stats {
            submitted: self.submitted,
            sent: self.sent,
            replies: self.replies,
            timeouts: self.timeouts,
            errors: self.errors,
            cancelled: self.cancelled,
            unsolicited: self.unsolicited,
            rejected: self.rejected,
            queued,
            in_flight,
            min_reply_ms: self.min_reply.map(ms),
            max_reply_ms: self.max_reply.map(ms),
            avg_reply_ms: (self.replies > 0).then(|| ms(self.total_reply) / self.replies as f64),
        }
    }
}

/// One request/response round trip.
#[derive(Debug, Clone)]
pub struct Exchange {
    /// Service ID assigned to the request.
    pub sid: u8,
    /// The request as submitted.
    pub request: Request,
    /// The decoded reply, if one arrived.
    pub response: Option<Response>,
    /// Caller context, echoed unmodified.
    pub tag: Option<Tag>,
    /// When the request was accepted.
    pub create_time: SystemTime,
    /// When the reply arrived.
    pub reply_time: Option<SystemTime>,
    /// Time between acceptance and reply.
    pub time_taken: Option<Duration>,
    /// Set when no reply arrived before the deadline.
    pub timeout: bool,
    /// Set on local or transport failure, including cancellation.
    pub error: Option<Arc<FinsError>>,
    /// Connection counters at completion.
    pub stats: Stats,
}

/// Classification of a completed exchange.
#[derive(Debug)]
pub enum Outcome<'a> {
    /// Local or transport failure.
    Error(&'a FinsError),
    /// No reply before the deadline.
    Timeout,
    /// The reply SID differs from the request SID.
    SidMismatch {
        /// SID of the request.
        expected: u8,
        /// SID of the reply.
        received: u8,
    },
    /// The reply is for another command or carries a failure end code.
    BadResponse(FinsError),
    /// Normal completion.
    Success(&'a Response),
}

impl Outcome<'_> {
    /// Returns `true` for [`Outcome::Success`].
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    /// Short status text suitable for a status indicator.
    pub fn status_text(&self) -> String {
        match self {
            Outcome::Error(_) => "error".to_string(),
            Outcome::Timeout => "timeout".to_string(),
            Outcome::SidMismatch { .. } => "Incorrect SID".to_string(),
            Outcome::BadResponse(FinsError::BadResponse { description, .. }) => description.clone(),
            Outcome::BadResponse(err @ FinsError::CommandMismatch { .. }) => err.to_string(),
            Outcome::BadResponse(_) => "bad response".to_string(),
            Outcome::Success(_) => "done".to_string(),
        }
    }

    /// Full diagnostic message for failures; `None` on success.
    pub fn to_string_detail(&self) -> Option<String> {
        match self {
            Outcome::Error(err) => Some(err.to_string()),
            Outcome::Timeout => Some(FinsError::Timeout.to_string()),
            Outcome::SidMismatch { expected, received } => {
                Some(FinsError::sid_mismatch(*expected, *received).to_string())
            }
            Outcome::BadResponse(err) => Some(err.to_string()),
            Outcome::Success(_) => None,
        }
    }
}

impl Exchange {
    /// Classifies this exchange; the first matching rule wins.
    ///
    /// # Example
    ///
    /// ```
    /// use omron_fins_link::{CommandOptions, Exchange, Outcome, Request};
    ///
    /// let request = Request::status(CommandOptions::default());
    /// let mut exchange = Exchange::new(1, request, None);
    /// exchange.timeout = true;
    /// assert!(matches!(exchange.outcome(), Outcome::Timeout));
    /// ```
    pub fn outcome(&self) -> Outcome<'_> {
        if let Some(error) = &self.error {
            return Outcome::Error(error);
        }
        if self.timeout {
            return Outcome::Timeout;
        }
        let Some(response) = &self.response else {
            return Outcome::BadResponse(FinsError::invalid_response("no response"));
        };
        if response.sid != self.sid {
            return Outcome::SidMismatch {
                expected: self.sid,
                received: response.sid,
            };
        }
        if response.command != self.request.command {
            return Outcome::BadResponse(FinsError::CommandMismatch {
                expected: self.request.command.to_string(),
                received: response.command.to_string(),
            });
        }
        if !response.is_success() {
            let description = if response.end_code_description.is_empty() {
                "bad response".to_string()
            } else {
                response.end_code_description.clone()
            };
            return Outcome::BadResponse(FinsError::BadResponse {
                end_code: response.end_code.to_string(),
                description,
            });
        }
        Outcome::Success(response)
    }

    /// Creates a fresh, uncompleted exchange.
    pub fn new(sid: u8, request: Request, tag: Option<Tag>) -> Self {
        Self {
            sid,
            request,
            response: None,
            tag,
            create_time: SystemTime::now(),
            reply_time: None,
            time_taken: None,
            timeout: false,
            error: None,
            stats: Stats::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CommandCode, CommandOptions};
    use crate::response::EndCode;

    fn exchange_with(response: Response) -> Exchange {
        let request = Request::write("D0", 1u16, CommandOptions::default()).unwrap();
        let mut exchange = Exchange::new(4, request, None);
        exchange.response = Some(response);
        exchange
    }

    fn response(sid: u8, command: CommandCode, end_code: EndCode) -> Response {
        Response {
            sid,
            command,
            end_code,
            end_code_description: end_code.description().to_string(),
            data: Vec::new(),
        }
    }

    #[test]
    fn test_success() {
        let exchange = exchange_with(response(4, CommandCode::MEMORY_AREA_WRITE, EndCode::new(0, 0)));
        let outcome = exchange.outcome();
        assert!(outcome.is_success());
        assert_eq!(outcome.status_text(), "done");
        assert!(outcome.to_string_detail().is_none());
    }

    #[test]
    fn test_error_wins_over_everything() {
        let mut exchange = exchange_with(response(9, CommandCode::RUN, EndCode::new(0x11, 0x03)));
        exchange.timeout = true;
        exchange.error = Some(Arc::new(FinsError::ConnectionClosed));
        assert!(matches!(exchange.outcome(), Outcome::Error(FinsError::ConnectionClosed)));
    }

    #[test]
    fn test_timeout_before_sid_mismatch() {
        let mut exchange = exchange_with(response(9, CommandCode::MEMORY_AREA_WRITE, EndCode::new(0, 0)));
        exchange.timeout = true;
        assert!(matches!(exchange.outcome(), Outcome::Timeout));
    }

    #[test]
    fn test_sid_mismatch_before_bad_response() {
        let exchange = exchange_with(response(9, CommandCode::RUN, EndCode::new(0x11, 0x03)));
        let outcome = exchange.outcome();
        assert!(matches!(
            outcome,
            Outcome::SidMismatch {
                expected: 4,
                received: 9
            }
        ));
        assert_eq!(outcome.status_text(), "Incorrect SID");
    }

    #[test]
    fn test_command_mismatch() {
        let exchange = exchange_with(response(4, CommandCode::MEMORY_AREA_READ, EndCode::new(0, 0)));
        let outcome = exchange.outcome();
        assert_eq!(
            outcome.status_text(),
            "Unexpected response. Expected command '0102' but received '0101'"
        );
    }

    #[test]
    fn test_bad_end_code_uses_description() {
        let exchange = exchange_with(response(4, CommandCode::MEMORY_AREA_WRITE, EndCode::new(0x21, 0x01)));
        let outcome = exchange.outcome();
        assert_eq!(outcome.status_text(), "Read-only");
        assert_eq!(
            outcome.to_string_detail().unwrap(),
            "Response is NG! endCode: 2101, endCodeDescription: Read-only"
        );
    }

    #[test]
    fn test_bad_end_code_without_description() {
        let mut reply = response(4, CommandCode::MEMORY_AREA_WRITE, EndCode::new(0x21, 0x01));
        reply.end_code_description.clear();
        assert_eq!(exchange_with(reply).outcome().status_text(), "bad response");
    }

    #[test]
    fn test_missing_response_is_bad() {
        let request = Request::stop(CommandOptions::default());
        let exchange = Exchange::new(1, request, None);
        assert!(matches!(exchange.outcome(), Outcome::BadResponse(_)));
    }

    #[test]
    fn test_counters_snapshot() {
        let mut counters = Counters::default();
        assert_eq!(counters.snapshot(0, 0).avg_reply_ms, None);

        counters.record_reply(Duration::from_millis(10));
        counters.record_reply(Duration::from_millis(30));
        let stats = counters.snapshot(2, 1);

        assert_eq!(stats.replies, 2);
        assert_eq!(stats.queued, 2);
        assert_eq!(stats.in_flight, 1);
        assert_eq!(stats.min_reply_ms, Some(10.0));
        assert_eq!(stats.max_reply_ms, Some(30.0));
        assert_eq!(stats.avg_reply_ms, Some(20.0));
    }
}
