//! Per-caller client on a shared FINS connection.
//!
//! This module provides the [`Client`] struct, the handle a caller receives
//! from [`ConnectionPool::get`](crate::ConnectionPool::get).
//!
//! # Overview
//!
//! Every operation validates its arguments, builds a [`Request`] and submits
//! it on the shared connection:
//! - the SID is returned at once, before anything is written
//! - the completed [`Exchange`] is delivered later to the callback in
//!   [`RequestOptions`], exactly once
//! - the caller's `tag` comes back unmodified on the exchange
//!
//! Invalid arguments are reported synchronously and nothing is sent.
//!
//! # Example
//!
//! ```no_run
//! use omron_fins_link::{ConnectionOptions, ConnectionPool, Endpoint, Outcome, RequestOptions};
//!
//! # async fn demo() -> omron_fins_link::Result<()> {
//! let pool = ConnectionPool::new();
//! let client = pool.get("writer-1", Endpoint::with_default_port("192.168.1.250"), ConnectionOptions::default())?;
//!
//! // Fire and forget with a callback
//! let opts = RequestOptions::new().with_callback(|exchange| match exchange.outcome() {
//!     Outcome::Success(response) => println!("SID {} done: {}", exchange.sid, response.end_code),
//!     other => eprintln!("SID {} failed: {}", exchange.sid, other.status_text()),
//! });
//! client.write("D100", vec![0x1234, 0x5678], opts, Some(serde_json::json!({"msg": 1})))?;
//!
//! // Or await the completion
//! let (opts, reply) = RequestOptions::new().reply_channel();
//! let sid = client.status(opts, None)?;
//! let exchange = reply.await.expect("exchange completes exactly once");
//! assert_eq!(exchange.sid, sid);
//! # Ok(())
//! # }
//! ```
//!
//! # Throttling
//!
//! A saturated connection publishes [`ConnectionEvent::Full`] and refuses new
//! requests. The connection does not enforce a cool-down; callers that want one
//! keep a [`Throttle`] and skip submissions while it is active.

use std::fmt;
use std::time::{Duration, Instant};

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::oneshot;

use crate::command::{CommandOptions, PlcMode, Request, WriteData};
use crate::config::{ConnectionOptions, Endpoint};
use crate::connection::{ConnectionEvent, ConnectionManager, ConnectionState};
use crate::error::Result;
use crate::exchange::{Exchange, ReplyCallback, Stats, Tag};
use crate::header::NodeAddress;
use crate::pool::{CallerId, Lease, PoolHandle};

/// Default cool-down after a `full` signal.
pub const DEFAULT_THROTTLE_WINDOW: Duration = Duration::from_millis(1000);

/// Options of one operation: the command options recorded on the request,
/// plus the completion callback.
#[derive(Default)]
pub struct RequestOptions {
    /// Options recorded on the request.
    pub command: CommandOptions,
    /// Invoked exactly once with the completed exchange.
    pub callback: Option<ReplyCallback>,
}

impl RequestOptions {
    /// Creates empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the connection timeout for this request.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.command.timeout = Some(timeout);
        self
    }

    /// Overrides the destination node for this request.
    pub fn with_destination(mut self, destination: NodeAddress) -> Self {
        self.command.destination = Some(destination);
        self
    }

    /// Sets the operating mode of a run command.
    pub fn with_mode(mut self, mode: PlcMode) -> Self {
        self.command.mode = Some(mode);
        self
    }

    /// Sets the completion callback.
    pub fn with_callback(mut self, callback: impl FnOnce(Exchange) + Send + 'static) -> Self {
        self.callback = Some(Box::new(callback));
        self
    }

    /// Replaces the callback with a channel the completed exchange is sent on.
    ///
    /// The receiver errors only if the request was never accepted.
    pub fn reply_channel(mut self) -> (Self, oneshot::Receiver<Exchange>) {
        let (tx, rx) = oneshot::channel();
        self.callback = Some(Box::new(move |exchange| {
            let _ = tx.send(exchange);
        }));
        (self, rx)
    }
}

impl From<CommandOptions> for RequestOptions {
    fn from(command: CommandOptions) -> Self {
        Self {
            command,
            callback: None,
        }
    }
}

impl fmt::Debug for RequestOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestOptions")
            .field("command", &self.command)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

/// Caller-side cool-down started by a `full` signal.
///
/// # Example
///
/// ```
/// use omron_fins_link::{ConnectionEvent, Throttle};
/// use std::time::Duration;
///
/// let mut throttle = Throttle::new(Duration::from_secs(1));
/// assert!(!throttle.is_throttled());
///
/// throttle.observe(&ConnectionEvent::Full);
/// assert!(throttle.is_throttled());
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Throttle {
    window: Duration,
    until: Option<Instant>,
}

impl Default for Throttle {
    fn default() -> Self {
        Self::new(DEFAULT_THROTTLE_WINDOW)
    }
}

impl Throttle {
    /// Creates a throttle with the given cool-down window.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            until: None,
        }
    }

    /// Starts (or restarts) the cool-down.
    pub fn on_full(&mut self) {
        self.until = Some(Instant::now() + self.window);
    }

    /// Starts the cool-down if `event` is a `full` signal.
    pub fn observe(&mut self, event: &ConnectionEvent) {
        if matches!(event, ConnectionEvent::Full) {
            self.on_full();
        }
    }

    /// Returns `true` while submissions should be held back.
    pub fn is_throttled(&self) -> bool {
        self.remaining().is_some()
    }

    /// Time left in the cool-down.
    pub fn remaining(&self) -> Option<Duration> {
        self.until
            .and_then(|until| until.checked_duration_since(Instant::now()))
            .filter(|left| !left.is_zero())
    }

    /// Ends the cool-down early.
    pub fn clear(&mut self) {
        self.until = None;
    }

    /// The cool-down window.
    pub fn window(&self) -> Duration {
        self.window
    }
}

/// A caller's handle on a shared connection.
///
/// Dropping the client releases its pool reference.
pub struct Client {
    caller: CallerId,
    lease: Option<Lease>,
    manager: ConnectionManager,
    events: broadcast::Receiver<ConnectionEvent>,
    pool: PoolHandle,
}

impl Client {
    pub(crate) fn new(
        caller: CallerId,
        lease: Lease,
        manager: ConnectionManager,
        events: broadcast::Receiver<ConnectionEvent>,
        pool: PoolHandle,
    ) -> Self {
        Self {
            caller,
            lease: Some(lease),
            manager,
            events,
            pool,
        }
    }

    /// Creates a client on a connection that is not pooled.
    pub fn from_manager(caller: impl Into<CallerId>, manager: ConnectionManager) -> Self {
        let events = manager.subscribe();
        Self {
            caller: caller.into(),
            lease: None,
            manager,
            events,
            pool: PoolHandle::new(),
        }
    }

    fn submit(&self, request: Request, opts: RequestOptions, tag: Option<Tag>) -> Result<u8> {
        self.manager.submit(request, tag, opts.callback)
    }

    /// Writes `data` starting at `address` and returns the SID.
    ///
    /// # Errors
    ///
    /// Returns `FinsError::InvalidParameter` if the address is empty or the
    /// data is empty, and any error of [`ConnectionManager::submit`].
    pub fn write(
        &self,
        address: &str,
        data: impl Into<WriteData>,
        opts: RequestOptions,
        tag: Option<Tag>,
    ) -> Result<u8> {
        let request = Request::write(address, data, opts.command.clone())?;
        self.submit(request, opts, tag)
    }

    /// Reads `count` elements starting at `address`.
    pub fn read(&self, address: &str, count: u16, opts: RequestOptions, tag: Option<Tag>) -> Result<u8> {
        let request = Request::read(address, count, opts.command.clone())?;
        self.submit(request, opts, tag)
    }

    /// Fills `count` words starting at `address` with `value`.
    pub fn fill(
        &self,
        address: &str,
        value: u16,
        count: u16,
        opts: RequestOptions,
        tag: Option<Tag>,
    ) -> Result<u8> {
        let request = Request::fill(address, value, count, opts.command.clone())?;
        self.submit(request, opts, tag)
    }

    /// Reads one element from each address.
    pub fn read_multiple(&self, addresses: &[&str], opts: RequestOptions, tag: Option<Tag>) -> Result<u8> {
        let request = Request::read_multiple(addresses, opts.command.clone())?;
        self.submit(request, opts, tag)
    }

    /// Copies `count` words from `source` to `destination`.
    pub fn transfer(
        &self,
        source: &str,
        destination: &str,
        count: u16,
        opts: RequestOptions,
        tag: Option<Tag>,
    ) -> Result<u8> {
        let request = Request::transfer(source, destination, count, opts.command.clone())?;
        self.submit(request, opts, tag)
    }

    /// Reads the controller status.
    pub fn status(&self, opts: RequestOptions, tag: Option<Tag>) -> Result<u8> {
        self.submit(Request::status(opts.command.clone()), opts, tag)
    }

    /// Puts the PLC in run mode (monitor unless `opts` says otherwise).
    pub fn run(&self, opts: RequestOptions, tag: Option<Tag>) -> Result<u8> {
        self.submit(Request::run(opts.command.clone()), opts, tag)
    }

    /// Stops the PLC program.
    pub fn stop(&self, opts: RequestOptions, tag: Option<Tag>) -> Result<u8> {
        self.submit(Request::stop(opts.command.clone()), opts, tag)
    }

    /// Reads CPU unit data.
    pub fn cpu_unit_data_read(&self, opts: RequestOptions, tag: Option<Tag>) -> Result<u8> {
        self.submit(Request::cpu_unit_data_read(opts.command.clone()), opts, tag)
    }

    /// Opens the shared connection if it is not open.
    pub fn connect(&self) -> Result<()> {
        self.manager.connect()
    }

    /// Closes the shared connection for every client on it.
    pub fn disconnect(&self) {
        self.manager.disconnect();
    }

    /// Alias of [`disconnect`](Self::disconnect).
    pub fn close_connection(&self) {
        self.manager.close_connection();
    }

    /// State of the shared connection.
    pub fn state(&self) -> ConnectionState {
        self.manager.state()
    }

    /// Returns `true` while the shared connection is open.
    pub fn is_connected(&self) -> bool {
        self.manager.is_connected()
    }

    /// Counters of the shared connection.
    pub fn stats(&self) -> Stats {
        self.manager.stats()
    }

    /// Waits for the next lifecycle event of the shared connection.
    ///
    /// Returns `None` once the connection is gone.
    pub async fn next_event(&mut self) -> Option<ConnectionEvent> {
        loop {
            match self.events.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(caller = %self.caller, skipped, "lifecycle events dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// An independent receiver of lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.manager.subscribe()
    }

    /// Identity this client was obtained for.
    pub fn caller(&self) -> &CallerId {
        &self.caller
    }

    /// Endpoint of the shared connection.
    pub fn endpoint(&self) -> &Endpoint {
        self.manager.endpoint()
    }

    /// Options of the shared connection.
    pub fn options(&self) -> &ConnectionOptions {
        self.manager.options()
    }

    /// The shared connection.
    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    /// Returns `true` if both clients use the same connection.
    pub fn shares_connection_with(&self, other: &Client) -> bool {
        self.manager.same_connection(&other.manager)
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("caller", &self.caller)
            .field("endpoint", self.manager.endpoint())
            .field("state", &self.manager.state())
            .finish()
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if let (Some(lease), Some(pool)) = (&self.lease, self.pool.upgrade()) {
            pool.release_lease(lease);
        }
    }
}
