//! UDP endpoint: a send queue of `(payload, destination)` pairs;
//! receives expose the source address to the upper layer (the QUIC
//! engine, when the `http3` feature is enabled).

use std::net::SocketAddr;

use tokio::net::UdpSocket;

use crate::error::TransportError;

/// A bound UDP endpoint.
#[derive(Debug)]
pub struct UdpEndpoint {
    socket: UdpSocket,
    local_addr: SocketAddr,
}

/// One datagram received, with its source address.
#[derive(Debug, Clone)]
pub struct Datagram {
    /// Payload bytes.
    pub payload: Vec<u8>,
    /// Address the datagram arrived from.
    pub from: SocketAddr,
}

impl UdpEndpoint {
    /// Bind a new UDP endpoint.
    pub async fn bind(addr: impl tokio::net::ToSocketAddrs) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(addr).await?;
        let local_addr = socket.local_addr()?;
        Ok(Self { socket, local_addr })
    }

    /// Local bound address.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Queue `payload` for delivery to `destination`.
    pub async fn send_to(&self, payload: &[u8], destination: SocketAddr) -> Result<(), TransportError> {
        self.socket.send_to(payload, destination).await?;
        Ok(())
    }

    /// Receive the next datagram.
    pub async fn recv(&self, scratch: &mut [u8]) -> Result<Datagram, TransportError> {
        let (n, from) = self.socket.recv_from(scratch).await?;
        Ok(Datagram { payload: scratch[..n].to_vec(), from })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_and_receive_roundtrip_with_source_address() {
        let a = UdpEndpoint::bind("127.0.0.1:0").await.unwrap();
        let b = UdpEndpoint::bind("127.0.0.1:0").await.unwrap();

        a.send_to(b"ping", b.local_addr()).await.unwrap();

        let mut scratch = [0u8; 64];
        let datagram = b.recv(&mut scratch).await.unwrap();
        assert_eq!(datagram.payload, b"ping");
        assert_eq!(datagram.from, a.local_addr());
    }
}
