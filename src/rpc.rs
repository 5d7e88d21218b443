//! The RPC messages carried inside encrypted packets: PING, PONG, FINDNODE and NODES.
use enr::{CombinedKey, Enr};
use rlp::{DecoderError, Rlp, RlpStream};
use std::net::{IpAddr, Ipv6Addr};
use tracing::{debug, warn};

const REQUEST_ID_LENGTH: usize = 8;
/// The largest distance a FINDNODE request may ask for.
pub const MAX_DISTANCE: u64 = 256;

/// Type to manage the request IDs.
#[derive(Debug, Clone, PartialEq, Hash, Eq)]
pub struct RequestId(pub Vec<u8>);

impl RequestId {
    /// Decodes the ID from a raw bytes.
    pub fn decode(data: Vec<u8>) -> Result<Self, DecoderError> {
        if data.len() > REQUEST_ID_LENGTH {
            return Err(DecoderError::Custom("Invalid ID length"));
        }
        Ok(RequestId(data))
    }

    pub fn random() -> Self {
        let rand: [u8; REQUEST_ID_LENGTH] = rand::random();
        RequestId(rand.to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

/// A decrypted RPC message. Requests and responses share one id space per session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Ping {
        id: RequestId,
        /// The sender's current ENR sequence number.
        enr_seq: u64,
    },
    Pong {
        id: RequestId,
        /// The current ENR sequence number of the responder.
        enr_seq: u64,
        /// The requester's address as observed by the responder.
        ip: IpAddr,
        port: u16,
    },
    FindNode {
        id: RequestId,
        /// The log distances of the records requested.
        distances: Vec<u64>,
    },
    Nodes {
        id: RequestId,
        /// The number of NODES packets that make up the whole response.
        total: u64,
        nodes: Vec<Enr<CombinedKey>>,
    },
}

impl Message {
    pub fn msg_type(&self) -> u8 {
        match self {
            Message::Ping { .. } => 1,
            Message::Pong { .. } => 2,
            Message::FindNode { .. } => 3,
            Message::Nodes { .. } => 4,
        }
    }

    pub fn id(&self) -> &RequestId {
        match self {
            Message::Ping { id, .. }
            | Message::Pong { id, .. }
            | Message::FindNode { id, .. }
            | Message::Nodes { id, .. } => id,
        }
    }

    pub fn is_request(&self) -> bool {
        matches!(self, Message::Ping { .. } | Message::FindNode { .. })
    }

    /// The type byte followed by the RLP list of the fields.
    pub fn encode(&self) -> Vec<u8> {
        let mut s = RlpStream::new();
        match self {
            Message::Ping { id, enr_seq } => {
                s.begin_list(2);
                s.append(&id.as_bytes());
                s.append(enr_seq);
            }
            Message::Pong {
                id,
                enr_seq,
                ip,
                port,
            } => {
                s.begin_list(4);
                s.append(&id.as_bytes());
                s.append(enr_seq);
                match ip {
                    IpAddr::V4(addr) => s.append(&(&addr.octets() as &[u8])),
                    IpAddr::V6(addr) => s.append(&(&addr.octets() as &[u8])),
                };
                s.append(port);
            }
            Message::FindNode { id, distances } => {
                s.begin_list(2);
                s.append(&id.as_bytes());
                s.append_list::<u64, u64>(distances);
            }
            Message::Nodes { id, total, nodes } => {
                s.begin_list(3);
                s.append(&id.as_bytes());
                s.append(total);
                s.begin_list(nodes.len());
                for node in nodes {
                    s.append(node);
                }
            }
        }
        let mut buf = Vec::with_capacity(10);
        buf.push(self.msg_type());
        buf.extend_from_slice(&s.out());
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self, DecoderError> {
        if data.len() < 3 {
            return Err(DecoderError::RlpIsTooShort);
        }

        let msg_type = data[0];
        let rlp = Rlp::new(&data[1..]);
        let list_len = rlp.item_count()?;
        let expected_len = match msg_type {
            1 | 3 => 2,
            2 => 4,
            4 => 3,
            _ => return Err(DecoderError::Custom("Unknown RPC message type")),
        };
        if list_len != expected_len {
            debug!(
                "RPC message of type {} has an invalid RLP list length. Expected {}, found {}",
                msg_type, expected_len, list_len
            );
            return Err(DecoderError::RlpIncorrectListLen);
        }

        let id = RequestId::decode(rlp.val_at::<Vec<u8>>(0)?)?;

        let message = match msg_type {
            1 => Message::Ping {
                id,
                enr_seq: rlp.val_at::<u64>(1)?,
            },
            2 => Message::Pong {
                id,
                enr_seq: rlp.val_at::<u64>(1)?,
                ip: decode_ip(&rlp.val_at::<Vec<u8>>(2)?)?,
                port: rlp.val_at::<u16>(3)?,
            },
            3 => {
                let distances = rlp.list_at::<u64>(1)?;
                if let Some(distance) = distances.iter().find(|d| **d > MAX_DISTANCE) {
                    warn!(
                        "Rejected FindNode request asking for unknown distance {}, maximum {}",
                        distance, MAX_DISTANCE
                    );
                    return Err(DecoderError::Custom("FINDNODE request distance invalid"));
                }
                Message::FindNode { id, distances }
            }
            _ => {
                let records = rlp.at(2)?;
                let nodes = if records.is_empty() {
                    Vec::new()
                } else {
                    records.as_list::<Enr<CombinedKey>>()?
                };
                Message::Nodes {
                    id,
                    total: rlp.val_at::<u64>(1)?,
                    nodes,
                }
            }
        };

        Ok(message)
    }
}

fn decode_ip(bytes: &[u8]) -> Result<IpAddr, DecoderError> {
    match bytes.len() {
        4 => {
            let mut ip = [0u8; 4];
            ip.copy_from_slice(bytes);
            Ok(IpAddr::from(ip))
        }
        16 => {
            let mut ip = [0u8; 16];
            ip.copy_from_slice(bytes);
            let ipv6 = Ipv6Addr::from(ip);
            // ipv4-mapped addresses are reported as ipv4
            Ok(match ipv6.to_ipv4_mapped() {
                Some(ipv4) => IpAddr::V4(ipv4),
                None => IpAddr::V6(ipv6),
            })
        }
        _ => {
            debug!("Pong has incorrect byte length for IP");
            Err(DecoderError::RlpIncorrectListLen)
        }
    }
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Message::Ping { id, enr_seq } => write!(f, "PING: id: {}, enr_seq: {}", id, enr_seq),
            Message::Pong {
                id,
                enr_seq,
                ip,
                port,
            } => write!(
                f,
                "PONG: id: {}, enr_seq: {}, ip: {}, port: {}",
                id, enr_seq, ip, port
            ),
            Message::FindNode { id, distances } => {
                write!(f, "FINDNODE: id: {}, distances: {:?}", id, distances)
            }
            Message::Nodes { id, total, nodes } => write!(
                f,
                "NODES: id: {}, total: {}, nodes: {}",
                id,
                total,
                nodes.len()
            ),
        }
    }
}
