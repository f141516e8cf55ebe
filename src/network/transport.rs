use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::codec::Decoder;
use tracing::{debug, trace};

use crate::core::{Error, Result, MAX_PACKET_SIZE};
use crate::protocol::{Packet, PacketCodec, HELLO_PACKET};

/// Owns the UDP socket and turns inbound datagrams into parsed frames
///
/// Frames are delivered to the packet channel in socket-receive order;
/// datagrams that fail to parse are dropped without an error escaping
/// this boundary.
pub struct Transport {
    /// Shared socket, also handed out through handles
    socket: Arc<UdpSocket>,
    /// Channel inbound frames are delivered on
    packet_tx: mpsc::Sender<(Packet, SocketAddr)>,
    /// Address discovery probes are broadcast to
    broadcast_addr: SocketAddr,
    /// Frame codec
    codec: PacketCodec,
}

/// Handle for sending frames through the transport's socket
///
/// Send errors are reported to the caller; whether to retry is the
/// caller's decision.
#[derive(Clone)]
pub struct TransportHandle {
    socket: Arc<UdpSocket>,
    broadcast_addr: SocketAddr,
}

impl Transport {
    /// Binds the UDP socket with broadcast enabled
    ///
    /// Must be called within a tokio runtime.
    pub fn bind(
        bind_addr: SocketAddr,
        broadcast_addr: SocketAddr,
        packet_tx: mpsc::Sender<(Packet, SocketAddr)>,
    ) -> Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_broadcast(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&bind_addr.into())?;
        let socket = UdpSocket::from_std(socket.into())?;

        Ok(Transport {
            socket: Arc::new(socket),
            packet_tx,
            broadcast_addr,
            codec: PacketCodec::new(),
        })
    }

    /// Returns a handle for sending through this transport
    pub fn handle(&self) -> TransportHandle {
        TransportHandle {
            socket: Arc::clone(&self.socket),
            broadcast_addr: self.broadcast_addr,
        }
    }

    /// Returns the local socket address
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket
            .local_addr()
            .map_err(|e| Error::network(format!("failed to get local address: {}", e)))
    }

    /// Runs the receive loop until the packet channel is closed
    pub async fn run(mut self) -> Result<()> {
        let mut buf = vec![0u8; MAX_PACKET_SIZE];
        loop {
            let (len, src) = match self.socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(e) => {
                    // ICMP unreachable surfaces here; keep receiving
                    debug!("socket receive error: {}", e);
                    continue;
                }
            };

            let mut datagram = BytesMut::from(&buf[..len]);
            match self.codec.decode(&mut datagram) {
                Ok(Some(packet)) => {
                    trace!("<- {} ({} bytes)", src, len);
                    if self.packet_tx.send((packet, src)).await.is_err() {
                        return Ok(());
                    }
                }
                Ok(None) => trace!("dropping malformed datagram from {}", src),
                Err(e) => debug!("codec error on datagram from {}: {}", src, e),
            }
        }
    }
}

impl TransportHandle {
    /// Unicasts already-encoded frame bytes to a device address
    pub async fn send_to(&self, bytes: &[u8], addr: SocketAddr) -> Result<()> {
        self.socket
            .send_to(bytes, addr)
            .await
            .map_err(|e| Error::network(format!("send to {} failed: {}", addr, e)))?;
        Ok(())
    }

    /// Unicasts the fixed discovery probe to one address
    pub async fn send_hello(&self, addr: SocketAddr) -> Result<()> {
        trace!("-> {} hello", addr);
        self.send_to(&HELLO_PACKET, addr).await
    }

    /// Broadcasts the fixed discovery probe
    pub async fn broadcast_hello(&self) -> Result<()> {
        debug!("broadcasting hello to {}", self.broadcast_addr);
        self.send_to(&HELLO_PACKET, self.broadcast_addr).await
    }

    /// Returns the local socket address
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket
            .local_addr()
            .map_err(|e| Error::network(format!("failed to get local address: {}", e)))
    }
}
