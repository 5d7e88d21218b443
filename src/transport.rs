//! The sending half of the network: typed packets handed over for delivery to a socket address.
//!
//! Delivery is fire-and-forget. The handshake machinery assumes packets may be lost or reordered.
use crate::packet::Packet;
use std::net::SocketAddr;
use tokio::sync::mpsc;
use tracing::debug;

pub trait Transport: Send + Sync {
    /// Queues `packet` for delivery to `dst`.
    fn send(&self, packet: Packet, dst: SocketAddr);
}

/// A packet in flight between two addresses.
#[derive(Debug, Clone)]
pub struct Datagram {
    pub src: SocketAddr,
    pub dst: SocketAddr,
    pub packet: Packet,
}

/// A [`Transport`] that emits every packet as a [`Datagram`] on a channel. The owner of the
/// receiver encodes the packets onto a socket, or routes them to other nodes in tests.
#[derive(Clone)]
pub struct ChannelTransport {
    local_addr: SocketAddr,
    sender: mpsc::UnboundedSender<Datagram>,
}

impl ChannelTransport {
    pub fn new(local_addr: SocketAddr) -> (Self, mpsc::UnboundedReceiver<Datagram>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (ChannelTransport { local_addr, sender }, receiver)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Transport for ChannelTransport {
    fn send(&self, packet: Packet, dst: SocketAddr) {
        let datagram = Datagram {
            src: self.local_addr,
            dst,
            packet,
        };
        if self.sender.send(datagram).is_err() {
            debug!("Transport receiver dropped, packet to {} lost", dst);
        }
    }
}
