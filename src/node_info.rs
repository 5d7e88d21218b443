use crate::{error::Discv5Error, Enr};
use enr::{CombinedKey, EnrKey, NodeId};
use parking_lot::RwLock;
use std::net::SocketAddr;

/// The identity of a session: a node id at a socket address.
#[derive(PartialEq, Hash, Eq, Clone, Debug)]
pub struct NodeAddress {
    /// The destination socket address.
    pub socket_addr: SocketAddr,
    /// The destination Node Id.
    pub node_id: NodeId,
}

impl NodeAddress {
    pub fn new(socket_addr: SocketAddr, node_id: NodeId) -> Self {
        Self {
            socket_addr,
            node_id,
        }
    }

    /// The UDP address an ENR advertises, preferring IPv4.
    pub fn from_enr(enr: &Enr) -> Option<Self> {
        let socket_addr = enr
            .udp4_socket()
            .map(SocketAddr::V4)
            .or_else(|| enr.udp6_socket().map(SocketAddr::V6))?;
        Some(NodeAddress::new(socket_addr, enr.node_id()))
    }
}

impl std::fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Node: {}, addr: {:?}", self.node_id, self.socket_addr)
    }
}

/// Our own record and the key that signs it.
pub struct LocalNode {
    enr: RwLock<Enr>,
    key: CombinedKey,
}

impl LocalNode {
    /// Fails if the record was not signed by `key`.
    pub fn new(enr: Enr, key: CombinedKey) -> Result<Self, Discv5Error> {
        if enr.public_key() != key.public() {
            return Err(Discv5Error::InvalidKey("ENR is not signed by the local key"));
        }
        Ok(LocalNode {
            enr: RwLock::new(enr),
            key,
        })
    }

    pub fn enr(&self) -> Enr {
        self.enr.read().clone()
    }

    pub fn node_id(&self) -> NodeId {
        self.enr.read().node_id()
    }

    pub fn seq(&self) -> u64 {
        self.enr.read().seq()
    }

    pub fn key(&self) -> &CombinedKey {
        &self.key
    }

    /// Sets `key` of the local record to `value`, re-signing the record with the next sequence
    /// number. Returns the new sequence number. A failed update leaves the record as it was.
    pub fn insert(&self, key: &str, value: Vec<u8>) -> Result<u64, Discv5Error> {
        let mut enr = self.enr.write();
        let mut updated = enr.clone();
        updated.insert(key, &value, &self.key)?;
        let seq = updated.seq();
        *enr = updated;
        Ok(seq)
    }

    /// The socket our record advertises, if any.
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        NodeAddress::from_enr(&self.enr.read()).map(|address| address.socket_addr)
    }
}
