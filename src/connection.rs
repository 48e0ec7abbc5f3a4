//! The connection manager: one transport, many concurrent exchanges.
//!
//! A [`ConnectionManager`] owns a single transport to one endpoint. Callers
//! [`submit`](ConnectionManager::submit) requests from any thread; each gets a
//! SID immediately and its callback later. A driver task spawned on the tokio
//! runtime serializes everything that touches the transport:
//!
//! ```text
//! submit ─┐                                   ┌─► callback (reply)
//! submit ─┼─► OutboundQueue ─► driver ─► PLC  ├─► callback (timeout sweep)
//! submit ─┘        (FIFO)        ▲            └─► callback (close / failure)
//!                                └── recv ─► SequenceRegistry
//! ```
//!
//! Lifecycle events ([`ConnectionEvent`]) are published on a broadcast channel
//! shared by every client attached to the connection.
//!
//! State transitions:
//!
//! ```text
//! initialising ─► connecting ─► open ─► closing ─► closed ─► connecting ...
//!                      │          │
//!                      └──────────┴─► error ─► closed
//! ```

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch, Notify};
use tokio::time::{Instant, MissedTickBehavior};

use crate::codec::{FinsCodec, FrameCodec};
use crate::command::Request;
use crate::config::{ConnectionOptions, Endpoint, MAX_TIMEOUT};
use crate::error::{FinsError, Result};
use crate::exchange::{Counters, Exchange, ReplyCallback, Stats, Tag};
use crate::header::FinsHeader;
use crate::queue::OutboundQueue;
use crate::registry::{Pending, SequenceRegistry};
use crate::transport::{Connector, Transport, UdpConnector};

/// Capacity of the lifecycle event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Created, never connected.
    Initialising,
    /// Transport being opened.
    Connecting,
    /// Transport open; requests are sent.
    Open,
    /// Close in progress; pending exchanges are being cancelled.
    Closing,
    /// No transport.
    Closed,
    /// Transport failed; becomes `Closed` once pending exchanges are failed.
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Initialising => "initialising",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
            ConnectionState::Error => "error",
        };
        f.write_str(name)
    }
}

/// Where an open connection is talking to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteInfo {
    /// Endpoint as configured.
    pub endpoint: Endpoint,
    /// Resolved peer address, if the transport knows it.
    pub address: Option<SocketAddr>,
}

/// Lifecycle event broadcast to every client of a connection.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// A connection attempt started with these options.
    Initialised(ConnectionOptions),
    /// The transport is open.
    Open(RemoteInfo),
    /// The transport is closed.
    Close,
    /// A connection failure (`sid` is `None`) or a failure of one exchange.
    Error {
        /// The failure.
        error: Arc<FinsError>,
        /// SID of the affected exchange.
        sid: Option<u8>,
        /// Tag of the affected exchange.
        tag: Option<Tag>,
    },
    /// The outbound queue is saturated; emitted once per saturation episode.
    Full,
}

struct Shared {
    state: ConnectionState,
    registry: SequenceRegistry,
    queue: OutboundQueue,
    counters: Counters,
    generation: u64,
}

impl Shared {
    fn stats(&self) -> Stats {
        self.counters.snapshot(self.queue.len(), self.registry.in_flight())
    }
}

struct Inner {
    endpoint: Endpoint,
    options: ConnectionOptions,
    connector: Arc<dyn Connector>,
    codec: Arc<dyn FrameCodec>,
    shared: Mutex<Shared>,
    wake: Notify,
    events: broadcast::Sender<ConnectionEvent>,
    generation: watch::Sender<u64>,
}

/// Closes the connection when the last manager handle goes away.
struct Owner(Arc<Inner>);

impl Drop for Owner {
    fn drop(&mut self) {
        self.0.close();
    }
}

/// Owner of one shared transport and its pending exchanges.
///
/// Cloning is cheap; all clones drive the same connection. The connection is
/// closed when the last clone is dropped.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
    _owner: Arc<Owner>,
}

impl ConnectionManager {
    /// Creates a manager for `endpoint` using UDP and the standard FINS codec.
    ///
    /// Nothing is opened until [`connect`](Self::connect) or, with
    /// `auto_connect`, the first submission.
    ///
    /// # Errors
    ///
    /// Returns `FinsError::InvalidParameter` if the options are unusable.
    pub fn new(endpoint: Endpoint, options: ConnectionOptions) -> Result<Self> {
        Self::with_parts(
            endpoint,
            options,
            Arc::new(UdpConnector),
            Arc::new(FinsCodec),
        )
    }

    /// Creates a manager with a custom transport connector and frame codec.
    pub fn with_parts(
        endpoint: Endpoint,
        options: ConnectionOptions,
        connector: Arc<dyn Connector>,
        codec: Arc<dyn FrameCodec>,
    ) -> Result<Self> {
        options.validate()?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (generation, _) = watch::channel(0);
        let inner = Arc::new(Inner {
            shared: Mutex::new(Shared {
                state: ConnectionState::Initialising,
                registry: SequenceRegistry::new(),
                queue: OutboundQueue::new(options.max_queue),
                counters: Counters::default(),
                generation: 0,
            }),
            endpoint,
            options,
            connector,
            codec,
            wake: Notify::new(),
            events,
            generation,
        });
        Ok(Self {
            _owner: Arc::new(Owner(inner.clone())),
            inner,
        })
    }

    /// Opens the transport. A no-op while connecting or open.
    ///
    /// # Errors
    ///
    /// Returns `FinsError::NoRuntime` when called outside a tokio runtime.
    pub fn connect(&self) -> Result<()> {
        let start = {
            let mut shared = self.inner.shared.lock();
            if matches!(shared.state, ConnectionState::Connecting | ConnectionState::Open) {
                return Ok(());
            }
            self.inner.begin_connect(&mut shared)?
        };
        self.inner.spawn_driver(start);
        Ok(())
    }

    /// Closes the transport, cancelling every pending exchange.
    ///
    /// Each cancelled exchange completes with `FinsError::ConnectionClosed`
    /// before the `Close` event is published.
    pub fn close_connection(&self) {
        self.inner.close();
    }

    /// Alias of [`close_connection`](Self::close_connection).
    pub fn disconnect(&self) {
        self.inner.close();
    }

    /// Queues `request` and returns its SID.
    ///
    /// `on_reply` is invoked exactly once, from the driver task or from the
    /// thread that closes the connection.
    ///
    /// # Errors
    ///
    /// - `FinsError::InvalidParameter` when the request timeout is above
    ///   [`MAX_TIMEOUT`](crate::MAX_TIMEOUT).
    /// - `FinsError::QueueFull` when the outbound queue is saturated.
    /// - `FinsError::NotConnected` when closed and `auto_connect` is off.
    /// - `FinsError::ConnectionClosed` while a close is in progress.
    /// - `FinsError::SidExhausted` when every SID is outstanding.
    pub fn submit(
        &self,
        request: Request,
        tag: Option<Tag>,
        on_reply: Option<ReplyCallback>,
    ) -> Result<u8> {
        let inner = &self.inner;
        let timeout = request.options.timeout.unwrap_or(inner.options.timeout);
        if timeout > MAX_TIMEOUT {
            return Err(FinsError::invalid_parameter("timeout", "must not exceed 24 hours"));
        }
        let mut shared = inner.shared.lock();

        let start = match shared.state {
            ConnectionState::Connecting | ConnectionState::Open => None,
            ConnectionState::Closing => return Err(FinsError::ConnectionClosed),
            _ if !inner.options.auto_connect => return Err(FinsError::NotConnected),
            _ => Some(inner.begin_connect(&mut shared)?),
        };

        if shared.queue.is_full() {
            shared.counters.rejected += 1;
            let first = shared.queue.reject();
            let capacity = shared.queue.capacity();
            drop(shared);
            if first {
                tracing::warn!(endpoint = %inner.endpoint, capacity, "outbound queue saturated");
                inner.emit(ConnectionEvent::Full);
            }
            return Err(FinsError::QueueFull { capacity });
        }

        let sid = shared.registry.next_sid()?;
        let now = Instant::now();
        let command = request.command;
        let exchange = Exchange::new(sid, request, tag);
        shared
            .registry
            .insert(Pending::new(exchange, now, now + timeout, on_reply))?;
        shared.queue.push(sid);
        shared.counters.submitted += 1;
        drop(shared);

        tracing::debug!(endpoint = %inner.endpoint, sid, %command, "request queued");
        if let Some(start) = start {
            inner.spawn_driver(start);
        }
        inner.wake.notify_one();
        Ok(sid)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.inner.shared.lock().state
    }

    /// Returns `true` while the transport is open.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Snapshot of the connection counters.
    pub fn stats(&self) -> Stats {
        self.inner.shared.lock().stats()
    }

    /// Subscribes to lifecycle events. Events published before the call are not seen.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.events.subscribe()
    }

    /// The endpoint this manager talks to.
    pub fn endpoint(&self) -> &Endpoint {
        &self.inner.endpoint
    }

    /// The options this manager was created with.
    pub fn options(&self) -> &ConnectionOptions {
        &self.inner.options
    }

    /// Returns `true` if both handles drive the same connection.
    pub fn same_connection(&self, other: &ConnectionManager) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("endpoint", &self.inner.endpoint)
            .field("state", &self.state())
            .finish()
    }
}

/// Hands a completed exchange to its callback.
fn complete(mut pending: Pending, stats: Stats) {
    pending.exchange.stats = stats;
    if let Some(on_reply) = pending.on_reply.take() {
        on_reply(pending.exchange);
    }
}

impl Inner {
    fn emit(&self, event: ConnectionEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    fn begin_connect(&self, shared: &mut Shared) -> Result<(Handle, u64)> {
        let runtime = Handle::try_current().map_err(|_| FinsError::NoRuntime)?;
        shared.generation += 1;
        shared.state = ConnectionState::Connecting;
        self.generation.send_replace(shared.generation);
        Ok((runtime, shared.generation))
    }

    fn spawn_driver(self: &Arc<Self>, (runtime, generation): (Handle, u64)) {
        tracing::info!(endpoint = %self.endpoint, generation, "connecting");
        runtime.spawn(drive(self.clone(), generation));
    }

    fn close(&self) {
        let (cancelled, stats, generation) = {
            let mut shared = self.shared.lock();
            if matches!(
                shared.state,
                ConnectionState::Initialising
                    | ConnectionState::Closing
                    | ConnectionState::Closed
                    | ConnectionState::Error
            ) {
                return;
            }
            shared.state = ConnectionState::Closing;
            shared.generation += 1;
            self.generation.send_replace(shared.generation);
            shared.queue.drain();
            let cancelled = shared.registry.drain();
            shared.counters.cancelled += cancelled.len() as u64;
            (cancelled, shared.stats(), shared.generation)
        };

        tracing::info!(
            endpoint = %self.endpoint,
            pending = cancelled.len(),
            "closing connection"
        );
        let error = Arc::new(FinsError::ConnectionClosed);
        for mut pending in cancelled {
            pending.exchange.error = Some(error.clone());
            complete(pending, stats.clone());
        }

        {
            let mut shared = self.shared.lock();
            if shared.generation != generation || shared.state != ConnectionState::Closing {
                return;
            }
            shared.state = ConnectionState::Closed;
        }
        self.emit(ConnectionEvent::Close);
    }

    /// Fails the connection of `generation` and every exchange on it.
    fn fail(&self, generation: u64, error: FinsError) {
        let error = Arc::new(error);
        let (failed, stats) = {
            let mut shared = self.shared.lock();
            if shared.generation != generation {
                return;
            }
            shared.state = ConnectionState::Error;
            shared.queue.drain();
            let failed = shared.registry.drain();
            shared.counters.errors += failed.len() as u64;
            (failed, shared.stats())
        };

        tracing::warn!(
            endpoint = %self.endpoint,
            error = %error,
            pending = failed.len(),
            "connection failed"
        );
        self.emit(ConnectionEvent::Error {
            error: error.clone(),
            sid: None,
            tag: None,
        });
        for mut pending in failed {
            pending.exchange.error = Some(error.clone());
            complete(pending, stats.clone());
        }

        {
            let mut shared = self.shared.lock();
            if shared.generation != generation || shared.state != ConnectionState::Error {
                return;
            }
            shared.state = ConnectionState::Closed;
        }
        self.emit(ConnectionEvent::Close);
    }

    /// Writes queued requests while the in-flight limit allows.
    async fn flush(&self, generation: u64, transport: &dyn Transport) -> Result<()> {
        loop {
            let frame = {
                let mut guard = self.shared.lock();
                let shared = &mut *guard;
                if shared.generation != generation
                    || shared.registry.in_flight() >= self.options.max_in_flight
                {
                    return Ok(());
                }
                let Some(sid) = shared.queue.pop() else {
                    return Ok(());
                };
                let Some(pending) = shared.registry.get_mut(sid) else {
                    continue;
                };
                let request = &pending.exchange.request;
                let destination = request.options.destination.unwrap_or(self.options.destination);
                let header = FinsHeader::new_command(destination, self.options.source, sid);
                match self.codec.encode(header, request) {
                    Ok(frame) => {
                        pending.sent = true;
                        shared.counters.sent += 1;
                        Ok((sid, frame))
                    }
                    Err(error) => {
                        let failed = shared.registry.complete(sid);
                        shared.counters.errors += 1;
                        Err((failed, error, shared.stats()))
                    }
                }
            };

            match frame {
                Ok((sid, frame)) => {
                    tracing::trace!(sid, len = frame.len(), "sending request");
                    transport.send(&frame).await?;
                }
                Err((failed, error, stats)) => {
                    let Some(mut pending) = failed else { continue };
                    let error = Arc::new(error);
                    tracing::warn!(sid = pending.exchange.sid, error = %error, "request could not be encoded");
                    self.emit(ConnectionEvent::Error {
                        error: error.clone(),
                        sid: Some(pending.exchange.sid),
                        tag: pending.exchange.tag.clone(),
                    });
                    pending.exchange.error = Some(error);
                    complete(pending, stats);
                }
            }
        }
    }

    /// Routes one received frame to its pending exchange.
    fn dispatch(&self, generation: u64, frame: &[u8]) {
        let response = match self.codec.decode(frame) {
            Ok(response) => response,
            Err(error) => {
                self.shared.lock().counters.unsolicited += 1;
                tracing::debug!(error = %error, len = frame.len(), "discarding undecodable frame");
                return;
            }
        };

        let sid = response.sid;
        let matched = {
            let mut shared = self.shared.lock();
            if shared.generation != generation {
                return;
            }
            let awaiting = shared.registry.get(sid).is_some_and(|p| p.sent);
            let pending = if awaiting {
                shared.registry.complete(sid)
            } else {
                None
            };
            match pending {
                Some(mut pending) => {
                    let taken = pending.started.elapsed();
                    pending.exchange.reply_time = Some(SystemTime::now());
                    pending.exchange.time_taken = Some(taken);
                    pending.exchange.response = Some(response);
                    shared.counters.record_reply(taken);
                    Some((pending, shared.stats()))
                }
                None => {
                    shared.counters.unsolicited += 1;
                    None
                }
            }
        };

        match matched {
            Some((pending, stats)) => {
                tracing::debug!(sid, "reply received");
                complete(pending, stats);
                self.wake.notify_one();
            }
            None => tracing::warn!(endpoint = %self.endpoint, sid, "discarding unsolicited frame"),
        }
    }

    /// Times out every exchange past its deadline.
    fn sweep(&self, generation: u64) {
        let (expired, stats) = {
            let mut shared = self.shared.lock();
            if shared.generation != generation {
                return;
            }
            let expired = shared.registry.take_expired(Instant::now());
            if expired.is_empty() {
                return;
            }
            for pending in &expired {
                shared.queue.remove(pending.exchange.sid);
            }
            shared.counters.timeouts += expired.len() as u64;
            (expired, shared.stats())
        };

        for mut pending in expired {
            tracing::warn!(endpoint = %self.endpoint, sid = pending.exchange.sid, "exchange timed out");
            pending.exchange.timeout = true;
            complete(pending, stats.clone());
        }
        self.wake.notify_one();
    }
}

/// Resolves once a newer generation replaces `generation`.
async fn superseded(watcher: &mut watch::Receiver<u64>, generation: u64) {
    loop {
        let current = *watcher.borrow_and_update();
        if current != generation || watcher.changed().await.is_err() {
            return;
        }
    }
}

/// Driver task of one connection generation.
async fn drive(inner: Arc<Inner>, generation: u64) {
    let mut watcher = inner.generation.subscribe();
    let mut sweep = tokio::time::interval(inner.options.sweep_interval);
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

    inner.emit(ConnectionEvent::Initialised(inner.options.clone()));

    let mut connecting = inner.connector.connect(&inner.endpoint);
    let opened = loop {
        tokio::select! {
            biased;
            _ = superseded(&mut watcher, generation) => return,
            result = &mut connecting => break result,
            _ = sweep.tick() => inner.sweep(generation),
        }
    };

    let transport = match opened {
        Ok(transport) => transport,
        Err(error) => {
            inner.fail(generation, error);
            return;
        }
    };

    {
        let mut shared = inner.shared.lock();
        if shared.generation != generation {
            return;
        }
        shared.state = ConnectionState::Open;
    }
    tracing::info!(endpoint = %inner.endpoint, remote = ?transport.remote_addr(), "connection open");
    inner.emit(ConnectionEvent::Open(RemoteInfo {
        endpoint: inner.endpoint.clone(),
        address: transport.remote_addr(),
    }));

    loop {
        if let Err(error) = inner.flush(generation, transport.as_ref()).await {
            inner.fail(generation, error);
            return;
        }
        tokio::select! {
            biased;
            _ = superseded(&mut watcher, generation) => return,
            _ = inner.wake.notified() => {}
            received = transport.recv() => match received {
                Ok(frame) => inner.dispatch(generation, &frame),
                Err(error) => {
                    inner.fail(generation, error);
                    return;
                }
            },
            _ = sweep.tick() => inner.sweep(generation),
        }
    }
}
