//! Datagram transport for FINS frames.
//!
//! The transport layer only moves bytes; it has no FINS knowledge. A
//! [`Connector`] opens a [`Transport`] for an [`Endpoint`], and the connection
//! drives that transport from a single task: it sends queued frames and
//! receives replies concurrently, so both methods take `&self`.
//!
//! [`UdpConnector`] is the standard implementation on top of tokio.

use std::fmt;
use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::net::{lookup_host, UdpSocket};

use crate::config::Endpoint;
use crate::error::{FinsError, Result};

/// Maximum UDP packet size for FINS.
pub const MAX_PACKET_SIZE: usize = 2048;

/// An open, bidirectional frame transport.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Sends one frame.
    async fn send(&self, frame: &[u8]) -> Result<()>;

    /// Receives one frame. Must be cancel safe.
    async fn recv(&self) -> Result<Vec<u8>>;

    /// Address of the remote peer, when known.
    fn remote_addr(&self) -> Option<SocketAddr>;
}

/// Opens transports to an endpoint.
#[async_trait]
pub trait Connector: Send + Sync + fmt::Debug {
    /// Opens a new transport to `endpoint`.
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn Transport>>;
}

/// UDP transport for FINS communication.
pub struct UdpTransport {
    socket: UdpSocket,
    remote_addr: SocketAddr,
}

impl UdpTransport {
    /// Binds an ephemeral local port and connects it to `plc_addr`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the socket cannot be created or connected.
    pub async fn connect(plc_addr: SocketAddr) -> Result<Self> {
        let bind_addr: SocketAddr = if plc_addr.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };
        let socket = UdpSocket::bind(bind_addr).await?;
        socket.connect(plc_addr).await?;

        Ok(Self {
            socket,
            remote_addr: plc_addr,
        })
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn send(&self, frame: &[u8]) -> Result<()> {
        self.socket.send(frame).await?;
        Ok(())
    }

    async fn recv(&self) -> Result<Vec<u8>> {
        let mut buffer = vec![0u8; MAX_PACKET_SIZE];
        let size = self.socket.recv(&mut buffer).await?;
        buffer.truncate(size);
        Ok(buffer)
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        Some(self.remote_addr)
    }
}

impl fmt::Debug for UdpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UdpTransport")
            .field("remote_addr", &self.remote_addr)
            .field("local_addr", &self.socket.local_addr().ok())
            .finish()
    }
}

/// Connector producing [`UdpTransport`]s; resolves host names on each connect.
#[derive(Debug, Clone, Copy, Default)]
pub struct UdpConnector;

#[async_trait]
impl Connector for UdpConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn Transport>> {
        let addr = lookup_host((endpoint.host.as_str(), endpoint.port))
            .await?
            .next()
            .ok_or_else(|| {
                FinsError::invalid_parameter("host", format!("'{}' did not resolve", endpoint.host))
            })?;
        Ok(Box::new(UdpTransport::connect(addr).await?))
    }
}

/// Channel-backed transport standing in for a PLC in tests.
#[cfg(test)]
pub(crate) mod mock {
    use std::io;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    use tokio::sync::{mpsc, watch, Mutex};

    use super::*;
    use crate::header::{FinsHeader, FINS_HEADER_SIZE};

    type Inbound = std::result::Result<Vec<u8>, io::ErrorKind>;

    #[derive(Debug)]
    struct Wiring {
        sent: mpsc::UnboundedSender<Vec<u8>>,
        inbound: Mutex<mpsc::UnboundedReceiver<Inbound>>,
        refuse: AtomicBool,
        connects: AtomicUsize,
        hold: watch::Sender<bool>,
    }

    /// Connector whose transports talk to a [`MockPlc`].
    #[derive(Debug, Clone)]
    pub(crate) struct MockConnector {
        wiring: Arc<Wiring>,
    }

    /// The far side of a mock connection.
    pub(crate) struct MockPlc {
        sent: mpsc::UnboundedReceiver<Vec<u8>>,
        inbound: mpsc::UnboundedSender<Inbound>,
        wiring: Arc<Wiring>,
    }

    pub(crate) fn pair() -> (MockConnector, MockPlc) {
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let wiring = Arc::new(Wiring {
            sent: sent_tx,
            inbound: Mutex::new(inbound_rx),
            refuse: AtomicBool::new(false),
            connects: AtomicUsize::new(0),
            hold: watch::channel(false).0,
        });
        (
            MockConnector {
                wiring: wiring.clone(),
            },
            MockPlc {
                sent: sent_rx,
                inbound: inbound_tx,
                wiring,
            },
        )
    }

    #[derive(Debug)]
    struct MockTransport {
        wiring: Arc<Wiring>,
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send(&self, frame: &[u8]) -> Result<()> {
            self.wiring
                .sent
                .send(frame.to_vec())
                .map_err(|_| FinsError::Io(io::Error::from(io::ErrorKind::BrokenPipe)))
        }

        async fn recv(&self) -> Result<Vec<u8>> {
            let mut inbound = self.wiring.inbound.lock().await;
            match inbound.recv().await {
                Some(Ok(frame)) => Ok(frame),
                Some(Err(kind)) => Err(FinsError::Io(io::Error::from(kind))),
                None => std::future::pending().await,
            }
        }

        fn remote_addr(&self) -> Option<SocketAddr> {
            None
        }
    }

    #[async_trait]
    impl Connector for MockConnector {
        async fn connect(&self, _endpoint: &Endpoint) -> Result<Box<dyn Transport>> {
            self.wiring.connects.fetch_add(1, Ordering::SeqCst);
            let mut hold = self.wiring.hold.subscribe();
            loop {
                let held = *hold.borrow_and_update();
                if !held || hold.changed().await.is_err() {
                    break;
                }
            }
            if self.wiring.refuse.load(Ordering::SeqCst) {
                return Err(FinsError::Io(io::Error::from(io::ErrorKind::ConnectionRefused)));
            }
            Ok(Box::new(MockTransport {
                wiring: self.wiring.clone(),
            }))
        }
    }

    impl MockPlc {
        /// Waits for the next frame the client sent.
        pub(crate) async fn next_request(&mut self) -> Vec<u8> {
            tokio::time::timeout(std::time::Duration::from_secs(5), self.sent.recv())
                .await
                .expect("no request within 5s")
                .expect("mock wiring dropped")
        }

        /// Returns a frame if one was already sent.
        pub(crate) fn try_next_request(&mut self) -> Option<Vec<u8>> {
            self.sent.try_recv().ok()
        }

        /// Builds the reply a PLC would send for `request` with the given end code.
        pub(crate) fn reply_frame(request: &[u8], main: u8, sub: u8, data: &[u8]) -> Vec<u8> {
            let header = FinsHeader::from_bytes(request).expect("request header");
            let mut frame = FinsHeader::response_to(&header).to_bytes().to_vec();
            frame.extend_from_slice(&request[FINS_HEADER_SIZE..FINS_HEADER_SIZE + 2]);
            frame.extend_from_slice(&[main, sub]);
            frame.extend_from_slice(data);
            frame
        }

        /// Replies to `request` with normal completion.
        pub(crate) fn reply_ok(&self, request: &[u8]) {
            self.inject(Self::reply_frame(request, 0x00, 0x00, &[]));
        }

        /// Delivers an arbitrary frame to the client.
        pub(crate) fn inject(&self, frame: Vec<u8>) {
            let _ = self.inbound.send(Ok(frame));
        }

        /// Makes the client's transport fail with `kind`.
        pub(crate) fn break_link(&self, kind: io::ErrorKind) {
            let _ = self.inbound.send(Err(kind));
        }

        /// Makes subsequent connects fail.
        pub(crate) fn refuse_connections(&self, refuse: bool) {
            self.wiring.refuse.store(refuse, Ordering::SeqCst);
        }

        /// Keeps connect attempts pending until called with `false`.
        pub(crate) fn hold_connections(&self, hold: bool) {
            self.wiring.hold.send_replace(hold);
        }

        /// Number of transports opened so far.
        pub(crate) fn connects(&self) -> usize {
            self.wiring.connects.load(Ordering::SeqCst)
        }
    }

    /// SID byte of a sent request frame.
    pub(crate) fn sid_of(frame: &[u8]) -> u8 {
        frame[9]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_packet_size() {
        assert_eq!(MAX_PACKET_SIZE, 2048);
    }

    #[tokio::test]
    async fn test_udp_round_trip_against_local_socket() {
        let plc = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let plc_addr = plc.local_addr().unwrap();

        let transport = UdpConnector
            .connect(&Endpoint::new("127.0.0.1", plc_addr.port()))
            .await
            .unwrap();
        assert_eq!(transport.remote_addr(), Some(plc_addr));

        transport.send(&[0x80, 0x01]).await.unwrap();
        let mut buf = [0u8; 16];
        let (n, from) = plc.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], &[0x80, 0x01]);

        plc.send_to(&[0xC0, 0x02], from).await.unwrap();
        assert_eq!(transport.recv().await.unwrap(), vec![0xC0, 0x02]);
    }

    #[test]
    fn test_transport_debug() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let transport = rt
            .block_on(UdpTransport::connect("127.0.0.1:9600".parse().unwrap()))
            .unwrap();
        let debug_str = format!("{:?}", transport);
        assert!(debug_str.contains("UdpTransport"));
        assert!(debug_str.contains("127.0.0.1:9600"));
    }
}
