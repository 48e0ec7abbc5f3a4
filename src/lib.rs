//! # Shared FINS connections for Omron PLCs
//!
//! A Rust library that lets many concurrent callers talk to Omron PLCs over
//! one FINS (Factory Interface Network Service) connection per endpoint.
//!
//! The library multiplexes requests: every request gets a unique Service ID
//! (SID), replies are matched back by SID in whatever order they arrive, and
//! each caller hears about its request exactly once through a callback. It does
//! not retry, poll, cache or persist anything; those policies belong to the
//! application.
//!
//! ## Features
//!
//! - **Shared connections**: one transport per `(host, port, options)`,
//!   reference counted across callers with a grace window before teardown
//! - **SID correlation**: out-of-order, late, duplicate and unsolicited replies
//!   are handled without disturbing other requests
//! - **Per-request deadlines**: a slow exchange never blocks the others
//! - **Fail-fast backpressure**: a bounded outbound queue that refuses work and
//!   signals `full` once per saturation episode
//! - **Lifecycle events**: `initialised`, `open`, `close`, `error`, `full`
//!   broadcast to every client on a connection
//! - **No panics**: all errors returned as `Result<T, FinsError>`
//!
//! ## Quick Start
//!
//! ```no_run
//! use omron_fins_link::{ConnectionOptions, ConnectionPool, Endpoint, NodeAddress, RequestOptions};
//!
//! #[tokio::main]
//! async fn main() -> omron_fins_link::Result<()> {
//!     let pool = ConnectionPool::new();
//!     let options = ConnectionOptions::default().with_source(NodeAddress::new(0, 1, 0));
//!     let client = pool.get("line-1", Endpoint::with_default_port("192.168.1.250"), options)?;
//!
//!     // Write two words to D100 and wait for the reply
//!     let (opts, reply) = RequestOptions::new().reply_channel();
//!     let sid = client.write("D100", vec![0x1234, 0x5678], opts, None)?;
//!
//!     let exchange = reply.await.expect("completed exactly once");
//!     println!("SID {sid}: {} in {:?}", exchange.outcome().status_text(), exchange.time_taken);
//!     Ok(())
//! }
//! ```
//!
//! ## Outcomes
//!
//! A completed [`Exchange`] is classified by [`Exchange::outcome`], first
//! match wins:
//!
//! | Order | Outcome | When |
//! |:-----:|---------|------|
//! | 1 | [`Outcome::Error`] | local or transport failure, including close |
//! | 2 | [`Outcome::Timeout`] | no reply before the deadline |
//! | 3 | [`Outcome::SidMismatch`] | reply SID differs from request SID |
//! | 4 | [`Outcome::BadResponse`] | other command in the reply, or end code not `0000` |
//! | 5 | [`Outcome::Success`] | everything else |
//!
//! ## Addresses
//!
//! | Area | Prefixes | Word Access | Bit Access |
//! |------|----------|:-----------:|:----------:|
//! | [`MemoryArea::CIO`] | `C`, `CIO` | ✓ | ✓ |
//! | [`MemoryArea::WR`] | `W`, `WR` | ✓ | ✓ |
//! | [`MemoryArea::HR`] | `H`, `HR` | ✓ | ✓ |
//! | [`MemoryArea::DM`] | `D`, `DM` | ✓ | ✗ |
//! | [`MemoryArea::AR`] | `A`, `AR` | ✓ | ✓ |
//!
//! ## Error Handling
//!
//! Invalid arguments are returned from the operation itself and nothing is
//! sent. Everything that happens after a request is accepted is reported on its
//! exchange.
//!
//! ```no_run
//! use omron_fins_link::{Client, FinsError, RequestOptions};
//!
//! # fn demo(client: &Client) {
//! match client.status(RequestOptions::new(), None) {
//!     Ok(sid) => println!("queued as SID {sid}"),
//!     Err(FinsError::QueueFull { capacity }) => println!("busy: {capacity} requests queued"),
//!     Err(FinsError::NotConnected) => println!("connection closed"),
//!     Err(e) => println!("Error: {e}"),
//! }
//! # }
//! ```

#![warn(clippy::all)]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

mod client;
mod codec;
mod command;
mod config;
mod connection;
mod error;
mod exchange;
mod header;
mod memory;
mod pool;
mod queue;
mod registry;
mod response;
mod transport;

// Public re-exports
pub use client::{Client, RequestOptions, Throttle, DEFAULT_THROTTLE_WINDOW};
pub use codec::{FinsCodec, FrameCodec};
pub use command::{
    CommandCode, CommandOptions, PlcMode, Request, WriteData, MAX_WORDS_PER_COMMAND,
};
pub use config::{
    ConnectionOptions, Endpoint, DEFAULT_FINS_PORT, DEFAULT_MAX_IN_FLIGHT, DEFAULT_MAX_QUEUE,
    DEFAULT_RELEASE_GRACE, DEFAULT_SWEEP_INTERVAL, DEFAULT_TIMEOUT, MAX_TIMEOUT,
};
pub use connection::{
    ConnectionEvent, ConnectionManager, ConnectionState, RemoteInfo, EVENT_CHANNEL_CAPACITY,
};
pub use error::{fins_error_description, FinsError, Result};
pub use exchange::{Exchange, Outcome, ReplyCallback, Stats, Tag};
pub use header::{FinsHeader, NodeAddress, FINS_HEADER_SIZE};
pub use memory::{MemoryAddress, MemoryArea};
pub use pool::{CallerId, ConnectionPool};
pub use registry::{MAX_SID, MIN_SID};
pub use response::{EndCode, Response, END_CODE_SUCCESS, MIN_RESPONSE_SIZE};
pub use transport::{Connector, Transport, UdpConnector, UdpTransport, MAX_PACKET_SIZE};
