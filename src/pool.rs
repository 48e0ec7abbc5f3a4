//! Shared connections, one per endpoint identity.
//!
//! A [`ConnectionPool`] maps `(host, port, options fingerprint)` to a single
//! [`ConnectionManager`]. Every [`get`](ConnectionPool::get) counts one
//! reference for the calling [`CallerId`] and returns a [`Client`] bound to the
//! shared connection. When the last reference is released the connection is
//! not closed at once; teardown is scheduled after the `release_grace` window
//! so a caller that is being redeployed can pick the same connection back up.
//!
//! ```no_run
//! use omron_fins_link::{ConnectionOptions, ConnectionPool, Endpoint};
//!
//! # async fn demo() -> omron_fins_link::Result<()> {
//! let pool = ConnectionPool::new();
//! let endpoint = Endpoint::with_default_port("192.168.1.250");
//!
//! let writer = pool.get("writer-1", endpoint.clone(), ConnectionOptions::default())?;
//! let control = pool.get("control-1", endpoint, ConnectionOptions::default())?;
//! assert!(writer.shares_connection_with(&control));
//! # Ok(())
//! # }
//! ```

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::client::Client;
use crate::codec::{FinsCodec, FrameCodec};
use crate::config::{ConnectionOptions, Endpoint};
use crate::connection::ConnectionManager;
use crate::error::Result;
use crate::transport::{Connector, UdpConnector};

/// Identity of a logical caller holding pooled connections.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallerId(String);

impl CallerId {
    /// Creates a caller identity.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identity as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CallerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for CallerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Endpoint identity: two equal keys share one connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct PoolKey {
    host: String,
    port: u16,
    fingerprint: String,
}

impl PoolKey {
    fn new(endpoint: &Endpoint, options: &ConnectionOptions) -> Self {
        Self {
            host: endpoint.host.clone(),
            port: endpoint.port,
            fingerprint: options.fingerprint(),
        }
    }
}

/// One reference held by one client handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Lease {
    key: PoolKey,
    id: u64,
}

struct PoolEntry {
    manager: ConnectionManager,
    leases: HashMap<u64, CallerId>,
    teardown: Option<JoinHandle<()>>,
    epoch: u64,
}

impl PoolEntry {
    fn references(&self) -> usize {
        self.leases.len()
    }
}

pub(crate) struct PoolInner {
    connector: Arc<dyn Connector>,
    codec: Arc<dyn FrameCodec>,
    entries: Mutex<HashMap<PoolKey, PoolEntry>>,
    next_lease: AtomicU64,
}

/// Process-wide registry of shared connections.
///
/// Cloning yields another handle to the same registry.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl Default for ConnectionPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionPool {
    /// Creates a pool whose connections use UDP and the standard FINS codec.
    pub fn new() -> Self {
        Self::with_connector(Arc::new(UdpConnector), Arc::new(FinsCodec))
    }

    /// Creates a pool with a custom transport connector and frame codec.
    pub fn with_connector(connector: Arc<dyn Connector>, codec: Arc<dyn FrameCodec>) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                connector,
                codec,
                entries: Mutex::new(HashMap::new()),
                next_lease: AtomicU64::new(1),
            }),
        }
    }

    /// Returns a client on the shared connection for `endpoint` and `options`,
    /// creating and connecting it if this is the first reference.
    ///
    /// Each call counts one reference for `caller`; dropping the returned
    /// client releases it unless [`release`](Self::release) already did.
    ///
    /// # Errors
    ///
    /// - `FinsError::InvalidParameter` if the options are unusable.
    /// - `FinsError::NoRuntime` if a new connection must be started outside a
    ///   tokio runtime.
    pub fn get(
        &self,
        caller: impl Into<CallerId>,
        endpoint: Endpoint,
        options: ConnectionOptions,
    ) -> Result<Client> {
        let caller = caller.into();
        let key = PoolKey::new(&endpoint, &options);
        let id = self.inner.next_lease.fetch_add(1, Ordering::Relaxed);

        let mut entries = self.inner.entries.lock();
        let (manager, events) = match entries.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if let Some(teardown) = entry.teardown.take() {
                    teardown.abort();
                }
                entry.epoch += 1;
                entry.leases.insert(id, caller.clone());
                tracing::debug!(%caller, endpoint = %endpoint, refs = entry.references(), "reusing pooled connection");
                (entry.manager.clone(), entry.manager.subscribe())
            }
            Entry::Vacant(vacant) => {
                let manager = ConnectionManager::with_parts(
                    endpoint,
                    options,
                    self.inner.connector.clone(),
                    self.inner.codec.clone(),
                )?;
                let events = manager.subscribe();
                manager.connect()?;
                tracing::info!(%caller, endpoint = %manager.endpoint(), "pooled connection created");
                vacant.insert(PoolEntry {
                    manager: manager.clone(),
                    leases: HashMap::from([(id, caller.clone())]),
                    teardown: None,
                    epoch: 0,
                });
                (manager, events)
            }
        };
        drop(entries);

        Ok(Client::new(
            caller,
            Lease { key, id },
            manager,
            events,
            Arc::downgrade(&self.inner),
        ))
    }

    /// Releases every reference `caller` holds, on every connection.
    ///
    /// Clients the caller still owns keep working but no longer keep their
    /// connection alive, and dropping them later releases nothing.
    pub fn release(&self, caller: &CallerId) {
        let mut entries = self.inner.entries.lock();
        let keys: Vec<PoolKey> = entries
            .iter_mut()
            .filter_map(|(key, entry)| {
                let before = entry.leases.len();
                entry.leases.retain(|_, holder| holder != caller);
                (entry.leases.len() != before).then(|| key.clone())
            })
            .collect();
        let mut closing = Vec::new();
        for key in keys {
            closing.extend(self.inner.release_unreferenced(&mut entries, &key));
        }
        drop(entries);
        for manager in closing {
            manager.close_connection();
        }
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    /// Returns `true` if the pool holds no connections.
    pub fn is_empty(&self) -> bool {
        self.inner.entries.lock().is_empty()
    }

    /// References held on the connection for `endpoint` and `options`.
    pub fn references(&self, endpoint: &Endpoint, options: &ConnectionOptions) -> usize {
        self.inner
            .entries
            .lock()
            .get(&PoolKey::new(endpoint, options))
            .map_or(0, PoolEntry::references)
    }
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("connections", &self.len())
            .finish()
    }
}

impl PoolInner {
    /// Drops the reference held by `lease`. A no-op if it was already released.
    pub(crate) fn release_lease(self: &Arc<Self>, lease: &Lease) {
        let mut entries = self.entries.lock();
        let Some(entry) = entries.get_mut(&lease.key) else {
            return;
        };
        if entry.leases.remove(&lease.id).is_none() {
            return;
        }
        let closing = self.release_unreferenced(&mut entries, &lease.key);
        drop(entries);
        if let Some(manager) = closing {
            manager.close_connection();
        }
    }

    /// Schedules teardown of `key` if nothing references it. Returns the
    /// manager to close right away when no runtime can run the grace timer.
    fn release_unreferenced(
        self: &Arc<Self>,
        entries: &mut HashMap<PoolKey, PoolEntry>,
        key: &PoolKey,
    ) -> Option<ConnectionManager> {
        let entry = entries.get_mut(key)?;
        if !entry.leases.is_empty() || entry.teardown.is_some() {
            return None;
        }
        entry.epoch += 1;
        let epoch = entry.epoch;
        let grace = entry.manager.options().release_grace;

        match Handle::try_current() {
            Ok(runtime) => {
                tracing::debug!(endpoint = %entry.manager.endpoint(), ?grace, "scheduling connection teardown");
                let pool = Arc::downgrade(self);
                let key = key.clone();
                entry.teardown = Some(runtime.spawn(async move {
                    tokio::time::sleep(grace).await;
                    if let Some(pool) = pool.upgrade() {
                        pool.teardown(&key, epoch);
                    }
                }));
                None
            }
            Err(_) => entries.remove(key).map(|entry| entry.manager),
        }
    }

    fn teardown(&self, key: &PoolKey, epoch: u64) {
        let removed = {
            let mut entries = self.entries.lock();
            match entries.get(key) {
                Some(entry) if entry.leases.is_empty() && entry.epoch == epoch => entries.remove(key),
                _ => None,
            }
        };
        if let Some(entry) = removed {
            tracing::info!(endpoint = %entry.manager.endpoint(), "closing unreferenced connection");
            entry.manager.close_connection();
        }
    }
}

/// Weak handle a client uses to release its reference.
pub(crate) type PoolHandle = Weak<PoolInner>;

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::connection::ConnectionState;
    use crate::error::FinsError;
    use crate::transport::mock::{self, MockPlc};

    fn pool() -> (ConnectionPool, MockPlc) {
        let (connector, plc) = mock::pair();
        (
            ConnectionPool::with_connector(Arc::new(connector), Arc::new(FinsCodec)),
            plc,
        )
    }

    fn endpoint() -> Endpoint {
        Endpoint::new("10.0.0.5", 9600)
    }

    fn options(grace_ms: u64) -> ConnectionOptions {
        ConnectionOptions::default().with_release_grace(Duration::from_millis(grace_ms))
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached within 5s");
    }

    #[tokio::test]
    async fn test_same_identity_shares_one_connection() {
        let (pool, plc) = pool();
        let a = pool.get("a", endpoint(), options(50)).unwrap();
        let b = pool.get("b", endpoint(), options(50)).unwrap();
        let again = pool.get("a", endpoint(), options(50)).unwrap();

        assert!(a.shares_connection_with(&b));
        assert!(a.shares_connection_with(&again));
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.references(&endpoint(), &options(50)), 3);

        wait_until(|| a.is_connected()).await;
        assert_eq!(plc.connects(), 1);
    }

    #[tokio::test]
    async fn test_different_options_get_different_connections() {
        let (pool, _plc) = pool();
        let a = pool.get("a", endpoint(), options(50)).unwrap();
        let b = pool
            .get("a", endpoint(), options(50).with_timeout(Duration::from_secs(9)))
            .unwrap();
        let c = pool.get("a", Endpoint::new("10.0.0.6", 9600), options(50)).unwrap();

        assert!(!a.shares_connection_with(&b));
        assert!(!a.shares_connection_with(&c));
        assert_eq!(pool.len(), 3);
    }

    #[tokio::test]
    async fn test_other_callers_keep_connection_alive() {
        let (pool, _plc) = pool();
        let a = pool.get("a", endpoint(), options(10)).unwrap();
        let b = pool.get("b", endpoint(), options(10)).unwrap();
        wait_until(|| b.is_connected()).await;

        drop(a);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(pool.len(), 1);
        assert!(b.is_connected());
        assert_eq!(pool.references(&endpoint(), &options(10)), 1);
    }

    #[tokio::test]
    async fn test_teardown_after_grace() {
        let (pool, _plc) = pool();
        let client = pool.get("a", endpoint(), options(20)).unwrap();
        wait_until(|| client.is_connected()).await;
        let manager = client.manager().clone();

        drop(client);
        assert_eq!(pool.len(), 1);
        wait_until(|| pool.is_empty()).await;
        assert_eq!(manager.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_reacquire_within_grace_cancels_teardown() {
        let (pool, plc) = pool();
        let first = pool.get("a", endpoint(), options(100)).unwrap();
        wait_until(|| first.is_connected()).await;
        drop(first);

        let second = pool.get("a", endpoint(), options(100)).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(pool.len(), 1);
        assert!(second.is_connected());
        assert_eq!(plc.connects(), 1);
    }

    #[tokio::test]
    async fn test_release_drops_all_references_of_caller() {
        let (pool, _plc) = pool();
        let _a1 = pool.get("a", endpoint(), options(10)).unwrap();
        let _a2 = pool.get("a", endpoint(), options(10)).unwrap();
        assert_eq!(pool.references(&endpoint(), &options(10)), 2);

        pool.release(&CallerId::from("a"));
        assert_eq!(pool.references(&endpoint(), &options(10)), 0);
        wait_until(|| pool.is_empty()).await;
    }

    #[tokio::test]
    async fn test_released_client_dropped_after_reacquire() {
        let (pool, plc) = pool();
        let caller = CallerId::from("a");
        let old = pool.get(caller.clone(), endpoint(), options(20)).unwrap();
        wait_until(|| old.is_connected()).await;

        pool.release(&caller);
        let new = pool.get(caller.clone(), endpoint(), options(20)).unwrap();
        assert_eq!(pool.references(&endpoint(), &options(20)), 1);

        drop(old);
        assert_eq!(pool.references(&endpoint(), &options(20)), 1);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(pool.len(), 1);
        assert!(new.is_connected());
        let other = pool.get("b", endpoint(), options(20)).unwrap();
        assert!(other.shares_connection_with(&new));
        assert_eq!(plc.connects(), 1);
    }

    #[tokio::test]
    async fn test_release_then_drop_does_not_double_release() {
        let (pool, _plc) = pool();
        let a = pool.get("a", endpoint(), options(20)).unwrap();
        let b = pool.get("b", endpoint(), options(20)).unwrap();

        pool.release(&CallerId::from("a"));
        drop(a);
        assert_eq!(pool.references(&endpoint(), &options(20)), 1);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(pool.len(), 1);
        drop(b);
        wait_until(|| pool.is_empty()).await;
    }

    #[test]
    fn test_get_without_runtime() {
        let (pool, _plc) = pool();
        assert!(matches!(
            pool.get("a", endpoint(), options(10)),
            Err(FinsError::NoRuntime)
        ));
        assert!(pool.is_empty());
    }

    #[test]
    fn test_invalid_options() {
        let (pool, _plc) = pool();
        assert!(pool
            .get("a", endpoint(), ConnectionOptions::default().with_max_in_flight(0))
            .is_err());
    }
}
