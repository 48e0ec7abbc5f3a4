//! Endpoint identity and connection options.
//!
//! Options can be built in code with the `with_*` methods or loaded from
//! JSON; every field has a default.
//!
//! ```
//! use omron_fins_link::{ConnectionOptions, NodeAddress};
//! use std::time::Duration;
//!
//! let options = ConnectionOptions::default()
//!     .with_timeout(Duration::from_secs(5))
//!     .with_source(NodeAddress::new(0, 1, 0))
//!     .with_max_queue(50);
//!
//! let loaded: ConnectionOptions =
//!     serde_json::from_str(r#"{"timeout": 5000, "source": {"network": 0, "node": 1, "unit": 0}, "maxQueue": 50}"#)
//!         .unwrap();
//! assert_eq!(options, loaded);
//! ```

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{FinsError, Result};
use crate::header::NodeAddress;

/// Default FINS UDP port.
pub const DEFAULT_FINS_PORT: u16 = 9600;

/// Default time a request may wait for its reply.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Longest accepted request timeout.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// Default capacity of the outbound queue.
pub const DEFAULT_MAX_QUEUE: usize = 100;

/// Default number of requests on the wire awaiting a reply.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 8;

/// Default period of the timeout sweep.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_millis(50);

/// Default delay between the last caller releasing a connection and its teardown.
pub const DEFAULT_RELEASE_GRACE: Duration = Duration::from_secs(1);

/// Network location of a PLC.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    /// Host name or IP address.
    pub host: String,
    /// UDP port.
    pub port: u16,
}

impl Endpoint {
    /// Creates an endpoint.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Creates an endpoint on the default FINS port.
    pub fn with_default_port(host: impl Into<String>) -> Self {
        Self::new(host, DEFAULT_FINS_PORT)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Options of one shared connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConnectionOptions {
    /// Time a request may wait for its reply, measured from submission.
    #[serde(with = "millis")]
    pub timeout: Duration,
    /// Source node address (this client).
    pub source: NodeAddress,
    /// Destination node address (the PLC).
    pub destination: NodeAddress,
    /// Capacity of the outbound queue; submissions beyond it are refused.
    pub max_queue: usize,
    /// Maximum requests sent and awaiting a reply.
    pub max_in_flight: usize,
    /// Period of the timeout sweep.
    #[serde(with = "millis")]
    pub sweep_interval: Duration,
    /// Connect on demand when a request is submitted on a closed connection.
    pub auto_connect: bool,
    /// Delay before an unreferenced pooled connection is torn down.
    #[serde(with = "millis")]
    pub release_grace: Duration,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            source: NodeAddress::local(),
            destination: NodeAddress::local(),
            max_queue: DEFAULT_MAX_QUEUE,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            auto_connect: true,
            release_grace: DEFAULT_RELEASE_GRACE,
        }
    }
}

impl ConnectionOptions {
    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the source node address.
    pub fn with_source(mut self, source: NodeAddress) -> Self {
        self.source = source;
        self
    }

    /// Sets the destination node address.
    pub fn with_destination(mut self, destination: NodeAddress) -> Self {
        self.destination = destination;
        self
    }

    /// Sets the outbound queue capacity.
    pub fn with_max_queue(mut self, max_queue: usize) -> Self {
        self.max_queue = max_queue;
        self
    }

    /// Sets the in-flight limit.
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight;
        self
    }

    /// Sets the timeout sweep period.
    pub fn with_sweep_interval(mut self, sweep_interval: Duration) -> Self {
        self.sweep_interval = sweep_interval;
        self
    }

    /// Enables or disables connect-on-submit.
    pub fn with_auto_connect(mut self, auto_connect: bool) -> Self {
        self.auto_connect = auto_connect;
        self
    }

    /// Sets the pooled teardown grace window.
    pub fn with_release_grace(mut self, release_grace: Duration) -> Self {
        self.release_grace = release_grace;
        self
    }

    /// Checks that the limits are usable.
    ///
    /// # Errors
    ///
    /// Returns `FinsError::InvalidParameter` for zero limits or intervals, or a
    /// timeout above [`MAX_TIMEOUT`].
    pub fn validate(&self) -> Result<()> {
        if self.max_queue == 0 {
            return Err(FinsError::invalid_parameter("maxQueue", "must be at least 1"));
        }
        if self.max_in_flight == 0 {
            return Err(FinsError::invalid_parameter("maxInFlight", "must be at least 1"));
        }
        if self.timeout.is_zero() {
            return Err(FinsError::invalid_parameter("timeout", "must be greater than 0"));
        }
        if self.timeout > MAX_TIMEOUT {
            return Err(FinsError::invalid_parameter("timeout", "must not exceed 24 hours"));
        }
        if self.sweep_interval.is_zero() {
            return Err(FinsError::invalid_parameter(
                "sweepInterval",
                "must be greater than 0",
            ));
        }
        Ok(())
    }

    /// Canonical string form of the options; equal options give equal fingerprints.
    pub fn fingerprint(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{self:?}"))
    }
}

/// Serde adapter storing a `Duration` as integer milliseconds.
pub(crate) mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Serde adapter storing an `Option<Duration>` as integer milliseconds.
pub(crate) mod opt_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
    }
}
