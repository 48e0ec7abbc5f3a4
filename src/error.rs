//! Error types for FINS exchanges and shared connections.

use std::io;
use thiserror::Error;

/// Result type alias for FINS operations.
pub type Result<T> = std::result::Result<T, FinsError>;

/// Errors that can occur while building, sending or correlating FINS requests.
#[derive(Debug, Error)]
pub enum FinsError {
    /// Invalid memory addressing.
    #[error("Invalid addressing: {reason}")]
    InvalidAddressing {
        /// Description of the addressing error.
        reason: String,
    },

    /// Invalid parameter provided.
    #[error("Invalid parameter '{parameter}': {reason}")]
    InvalidParameter {
        /// Name of the invalid parameter.
        parameter: String,
        /// Description of why the parameter is invalid.
        reason: String,
    },

    /// Invalid response received from PLC.
    #[error("Invalid response: {reason}")]
    InvalidResponse {
        /// Description of the response error.
        reason: String,
    },

    /// No response arrived before the exchange deadline.
    #[error("Communication timeout")]
    Timeout,

    /// I/O error during communication.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Service ID mismatch between request and response.
    #[error("SID does not match! My SID: {expected}, reply SID: {received}")]
    SidMismatch {
        /// Expected SID value.
        expected: u8,
        /// Received SID value.
        received: u8,
    },

    /// The reply carried a different command code than the request.
    #[error("Unexpected response. Expected command '{expected}' but received '{received}'")]
    CommandMismatch {
        /// Command code of the request.
        expected: String,
        /// Command code found in the reply.
        received: String,
    },

    /// The reply carried a non-success end code.
    #[error("Response is NG! endCode: {end_code}, endCodeDescription: {description}")]
    BadResponse {
        /// End code as four hex digits.
        end_code: String,
        /// Human readable end-code description.
        description: String,
    },

    /// The outbound queue is saturated and the request was refused.
    #[error("Client buffer is saturated ({capacity} requests queued)")]
    QueueFull {
        /// Capacity of the outbound queue.
        capacity: usize,
    },

    /// The generated SID is still held by a pending exchange.
    #[error("SID {sid} is already in use by a pending exchange")]
    SidCollision {
        /// The colliding SID.
        sid: u8,
    },

    /// Every SID is held by a pending exchange.
    #[error("No free SID: {outstanding} exchanges outstanding")]
    SidExhausted {
        /// Number of outstanding exchanges.
        outstanding: usize,
    },

    /// The connection is closed and auto-connect is disabled.
    #[error("Not connected")]
    NotConnected,

    /// The exchange was cancelled because its connection closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// A connection could not be started because no tokio runtime is running.
    #[error("No tokio runtime available to drive the connection")]
    NoRuntime,
}

impl FinsError {
    /// Creates a new `InvalidAddressing` error.
    pub fn invalid_addressing(reason: impl Into<String>) -> Self {
        Self::InvalidAddressing {
            reason: reason.into(),
        }
    }

    /// Creates a new `InvalidParameter` error.
    ///
    /// # Example
    ///
    /// ```
    /// use omron_fins_link::FinsError;
    ///
    /// let err = FinsError::invalid_parameter("address", "address is not valid");
    /// ```
    pub fn invalid_parameter(parameter: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            parameter: parameter.into(),
            reason: reason.into(),
        }
    }

    /// Creates a new `InvalidResponse` error.
    pub fn invalid_response(reason: impl Into<String>) -> Self {
        Self::InvalidResponse {
            reason: reason.into(),
        }
    }

    /// Creates a new `SidMismatch` error.
    pub fn sid_mismatch(expected: u8, received: u8) -> Self {
        Self::SidMismatch { expected, received }
    }

    /// Returns `true` for failures of the connection itself rather than of one exchange.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Io(_) | Self::ConnectionClosed | Self::NotConnected)
    }
}

/// Returns the human readable description of a FINS end code.
///
/// The network relay error bit (0x80 of the main code) and the CPU error
/// flags (0x40 and 0x80 of the sub code) are masked before lookup. A normal
/// completion with any of them set names the flag instead.
///
/// # Example
///
/// ```
/// use omron_fins_link::fins_error_description;
///
/// assert_eq!(fins_error_description(0x00, 0x00), "Normal completion");
/// assert_eq!(fins_error_description(0x11, 0x03), "Address range error");
/// assert_eq!(
///     fins_error_description(0x00, 0x40),
///     "Normal completion, non-fatal CPU unit error flag set"
/// );
/// ```
pub fn fins_error_description(main_code: u8, sub_code: u8) -> &'static str {
    match (main_code & 0x7F, sub_code & 0x3F) {
        (0x00, 0x00) if sub_code & 0x80 != 0 => "Normal completion, fatal CPU unit error flag set",
        (0x00, 0x00) if sub_code & 0x40 != 0 => "Normal completion, non-fatal CPU unit error flag set",
        (0x00, 0x00) if main_code & 0x80 != 0 => "Normal completion, network relay error flag set",
        (0x00, 0x00) => "Normal completion",
        (0x00, 0x01) => "Service canceled",
        (0x01, 0x01) => "Local node not in network",
        (0x01, 0x02) => "Token timeout",
        (0x01, 0x03) => "Retries failed",
        (0x01, 0x04) => "Too many send frames",
        (0x01, 0x05) => "Node address range error",
        (0x01, 0x06) => "Node address duplication",
        (0x02, 0x01) => "Destination node not in network",
        (0x02, 0x02) => "Unit missing",
        (0x02, 0x03) => "Third node missing",
        (0x02, 0x04) => "Destination node busy",
        (0x02, 0x05) => "Response timeout",
        (0x03, 0x01) => "Communications controller error",
        (0x03, 0x02) => "CPU unit error",
        (0x03, 0x03) => "Controller error",
        (0x03, 0x04) => "Unit number error",
        (0x04, 0x01) => "Undefined command",
        (0x04, 0x02) => "Not supported by model/version",
        (0x05, 0x01) => "Destination address setting error",
        (0x05, 0x02) => "No routing tables",
        (0x05, 0x03) => "Routing table error",
        (0x05, 0x04) => "Too many relays",
        (0x10, 0x01) => "Command too long",
        (0x10, 0x02) => "Command too short",
        (0x10, 0x03) => "Elements/data don't match",
        (0x10, 0x04) => "Command format error",
        (0x10, 0x05) => "Header error",
        (0x11, 0x01) => "Area classification missing",
        (0x11, 0x02) => "Access size error",
        (0x11, 0x03) => "Address range error",
        (0x11, 0x04) => "Address range exceeded",
        (0x11, 0x06) => "Program missing",
        (0x11, 0x09) => "Relational error",
        (0x11, 0x0A) => "Duplicate data access",
        (0x11, 0x0B) => "Response too long",
        (0x11, 0x0C) => "Parameter error",
        (0x20, 0x02) => "Protected",
        (0x20, 0x03) => "Table missing",
        (0x20, 0x04) => "Data missing",
        (0x20, 0x05) => "Program missing",
        (0x20, 0x06) => "File missing",
        (0x20, 0x07) => "Data mismatch",
        (0x21, 0x01) => "Read-only",
        (0x21, 0x02) => "Protected, cannot write data link table",
        (0x21, 0x03) => "Cannot register",
        (0x21, 0x05) => "Program missing",
        (0x21, 0x06) => "File missing",
        (0x21, 0x07) => "File name already exists",
        (0x21, 0x08) => "Cannot change",
        (0x22, 0x01) => "Not possible during execution",
        (0x22, 0x02) => "Not possible while running",
        (0x22, 0x03) => "Wrong PLC mode (program)",
        (0x22, 0x04) => "Wrong PLC mode (debug)",
        (0x22, 0x05) => "Wrong PLC mode (monitor)",
        (0x22, 0x06) => "Wrong PLC mode (run)",
        (0x22, 0x07) => "Specified node not polling node",
        (0x22, 0x08) => "Step cannot be executed",
        (0x23, 0x01) => "File device missing",
        (0x23, 0x02) => "Memory missing",
        (0x23, 0x03) => "Clock missing",
        (0x24, 0x01) => "Table missing",
        (0x25, 0x02) => "Memory error",
        (0x25, 0x03) => "I/O setting error",
        (0x25, 0x04) => "Too many I/O points",
        (0x25, 0x05) => "CPU bus error",
        (0x25, 0x06) => "I/O duplication",
        (0x25, 0x07) => "I/O bus error",
        (0x25, 0x09) => "SYSMAC BUS/2 error",
        (0x25, 0x0A) => "CPU bus unit error",
        (0x25, 0x0D) => "SYSMAC BUS number duplication",
        (0x25, 0x0F) => "Memory error",
        (0x25, 0x10) => "SYSMAC BUS terminator missing",
        (0x26, 0x01) => "No protection",
        (0x26, 0x02) => "Incorrect password",
        (0x26, 0x04) => "Protected",
        (0x26, 0x05) => "Service already executing",
        (0x26, 0x06) => "Service stopped",
        (0x26, 0x07) => "No execution right",
        (0x26, 0x08) => "Settings not complete",
        (0x26, 0x09) => "Necessary items not set",
        (0x26, 0x0A) => "Number already defined",
        (0x26, 0x0B) => "Error will not clear",
        (0x30, 0x01) => "No access right",
        (0x40, 0x01) => "Service aborted",
        _ => "Unknown end code",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sid_mismatch_display() {
        let err = FinsError::sid_mismatch(1, 2);
        assert_eq!(err.to_string(), "SID does not match! My SID: 1, reply SID: 2");
    }

    #[test]
    fn test_queue_full_display() {
        let err = FinsError::QueueFull { capacity: 100 };
        assert_eq!(
            err.to_string(),
            "Client buffer is saturated (100 requests queued)"
        );
    }

    #[test]
    fn test_is_transport() {
        assert!(FinsError::ConnectionClosed.is_transport());
        assert!(FinsError::Io(io::Error::other("reset")).is_transport());
        assert!(!FinsError::Timeout.is_transport());
        assert!(!FinsError::QueueFull { capacity: 1 }.is_transport());
    }

    #[test]
    fn test_description_known_codes() {
        assert_eq!(fins_error_description(0x00, 0x00), "Normal completion");
        assert_eq!(fins_error_description(0x04, 0x01), "Undefined command");
        assert_eq!(fins_error_description(0x22, 0x03), "Wrong PLC mode (program)");
    }

    #[test]
    fn test_description_masks_flag_bits() {
        // relay error bit and fatal/non-fatal CPU error bits
        assert_eq!(fins_error_description(0x91, 0x03), "Address range error");
        assert_eq!(fins_error_description(0x11, 0x43), "Address range error");
        assert_eq!(fins_error_description(0x11, 0x83), "Address range error");
    }

    #[test]
    fn test_description_names_flags_on_normal_completion() {
        assert_eq!(
            fins_error_description(0x00, 0x80),
            "Normal completion, fatal CPU unit error flag set"
        );
        assert_eq!(
            fins_error_description(0x00, 0x40),
            "Normal completion, non-fatal CPU unit error flag set"
        );
        assert_eq!(
            fins_error_description(0x80, 0x00),
            "Normal completion, network relay error flag set"
        );
    }

    #[test]
    fn test_description_unknown() {
        assert_eq!(fins_error_description(0x7E, 0x3E), "Unknown end code");
    }
}
