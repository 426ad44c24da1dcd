//! Fire-and-forget datagram transport to one fixed peer.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};

/// Payload of the datagram that closes a stream.
pub const END_OF_STREAM: &[u8; 12] = b"END_OF_AUDIO";

/// "Send one payload to the fixed peer". Best effort: no retries, no acks.
pub trait DatagramSink {
    /// Returns the number of bytes the transport accepted.
    fn send(&mut self, payload: &[u8]) -> io::Result<usize>;
}

impl<T: DatagramSink + ?Sized> DatagramSink for &mut T {
    fn send(&mut self, payload: &[u8]) -> io::Result<usize> {
        (**self).send(payload)
    }
}

/// UDP socket bound to an ephemeral local port and connected to the peer.
pub struct UdpSink {
    socket: UdpSocket,
}

impl UdpSink {
    pub fn connect(peer: SocketAddr) -> io::Result<Self> {
        let local: SocketAddr = if peer.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local)?;
        socket.connect(peer)?;
        log::info!("UDP transport {} -> {}", socket.local_addr()?, peer);
        Ok(Self { socket })
    }
}

impl DatagramSink for UdpSink {
    fn send(&mut self, payload: &[u8]) -> io::Result<usize> {
        self.socket.send(payload)
    }
}

/// True if `payload` is the end-of-stream marker rather than audio.
pub fn is_end_of_stream(payload: &[u8]) -> bool {
    payload == END_OF_STREAM
}
