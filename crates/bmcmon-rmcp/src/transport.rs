use bmcmon_session::Closer;
use std::io;
use std::sync::Arc;
use tokio::net::UdpSocket;

/// Default RMCP port.
const IPMI_PORT: u16 = 623;

/// A connected UDP flow to one BMC.
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    /// Binds an ephemeral local port and connects it to `addr`, appending
    /// the default RMCP port when none is given.
    pub async fn connect(addr: &str) -> io::Result<Self> {
        let remote = if addr.contains(':') {
            addr.to_string()
        } else {
            format!("{addr}:{IPMI_PORT}")
        };
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(remote).await?;
        Ok(Self { socket })
    }

    pub async fn send(&self, packet: &[u8]) -> io::Result<()> {
        self.socket.send(packet).await?;
        Ok(())
    }

    pub async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.socket.recv(buf).await
    }
}

/// Releases the transport handle backing a session. The socket itself closes
/// once the session (which shares the transport) is dropped as well; the
/// collector drops both together.
pub struct TransportCloser {
    transport: Option<Arc<UdpTransport>>,
}

impl TransportCloser {
    pub fn new(transport: Arc<UdpTransport>) -> Self {
        Self {
            transport: Some(transport),
        }
    }
}

impl Closer for TransportCloser {
    fn close(&mut self) {
        self.transport.take();
    }
}
