//! This module defines the typed packets exchanged by the handshake pipelines.
//!
//! The [discv5 wire specification](https://github.com/ethereum/devp2p/blob/master/discv5/discv5-wire.md)
//! describes each packet. Framing the packets into UDP datagrams is left to the transport; the
//! pipelines only ever see a [`Packet`].
//!
//! Message encryption/decryption is handled by the session, not by this module.
//!
//! [`Packet`]: enum.Packet.html

mod auth_header;

pub use auth_header::{AuthHeader, AuthResponse, AUTH_SCHEME_NAME};
use enr::NodeId;
use sha2::{Digest, Sha256};

pub const TAG_LENGTH: usize = 32;
pub const AUTH_TAG_LENGTH: usize = 12;
pub const MAGIC_LENGTH: usize = 32;
pub const ID_NONCE_LENGTH: usize = 32;
/// The number of random bytes carried by a random packet.
pub const RANDOM_DATA_LENGTH: usize = 44;

const WHOAREYOU_STRING: &str = "WHOAREYOU";

/// The authentication nonce (12 bytes).
pub type AuthTag = [u8; AUTH_TAG_LENGTH];
/// Packet Tag
pub type Tag = [u8; TAG_LENGTH];
/// The nonce sent in a WHOAREYOU packet.
pub type IdNonce = [u8; ID_NONCE_LENGTH];
/// The magic packet.
pub type Magic = [u8; MAGIC_LENGTH];

#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    /// Opening packet of an initiator that holds no keys yet.
    RandomPacket {
        /// The XOR(SHA256(dest-node-id), src-node-id).
        tag: Tag,

        /// Random auth_tag, echoed by the WHOAREYOU answering this packet.
        auth_tag: AuthTag,

        /// Random data, indistinguishable from an encrypted message.
        data: Vec<u8>,
    },
    /// Handshake packet to establish identities.
    WhoAreYou {
        /// SHA256(`dest-node-id` || "WHOAREYOU").
        magic: Magic,

        /// The auth-tag of the packet that triggered the challenge.
        auth_tag: AuthTag,

        /// The `id-nonce` to prevent handshake replays.
        id_nonce: IdNonce,

        /// Highest known ENR sequence number of the destination.
        enr_seq: u64,
    },
    /// Message sent with an authentication header, completing a handshake.
    AuthMessage {
        /// The XOR(SHA256(dest-node-id), src-node-id).
        tag: Tag,

        /// Authentication header.
        auth_header: AuthHeader,

        /// The encrypted message.
        message: Vec<u8>,
    },
    /// A standard discv5 message.
    Message {
        /// The XOR(SHA256(dest-node-id), src-node-id).
        tag: Tag,

        /// 12 byte Authentication nonce.
        auth_tag: AuthTag,

        /// The encrypted message as raw bytes.
        message: Vec<u8>,
    },
}

impl Packet {
    /// Generates a Packet::Random given a `tag`.
    pub fn random(tag: Tag) -> Packet {
        let data: Vec<u8> = (0..RANDOM_DATA_LENGTH)
            .map(|_| rand::random::<u8>())
            .collect();

        Packet::RandomPacket {
            tag,
            auth_tag: rand::random(),
            data,
        }
    }

    /// Creates a WHOAREYOU packet addressed to `dest_id`, challenging it with `id_nonce`.
    pub fn whoareyou(dest_id: &NodeId, enr_seq: u64, auth_tag: AuthTag, id_nonce: IdNonce) -> Packet {
        Packet::WhoAreYou {
            magic: magic(dest_id),
            auth_tag,
            id_nonce,
            enr_seq,
        }
    }

    /// The authentication tag for all packets except WHOAREYOU.
    pub fn auth_tag(&self) -> Option<&AuthTag> {
        match &self {
            Packet::RandomPacket { auth_tag, .. } => Some(auth_tag),
            Packet::AuthMessage { auth_header, .. } => Some(&auth_header.auth_tag),
            Packet::Message { auth_tag, .. } => Some(auth_tag),
            Packet::WhoAreYou { .. } => None,
        }
    }

    /// The tag of all packets except WHOAREYOU.
    pub fn tag(&self) -> Option<&Tag> {
        match &self {
            Packet::RandomPacket { tag, .. } => Some(tag),
            Packet::AuthMessage { tag, .. } => Some(tag),
            Packet::Message { tag, .. } => Some(tag),
            Packet::WhoAreYou { .. } => None,
        }
    }

    /// Returns true if the packet is a WHOAREYOU packet.
    pub fn is_whoareyou(&self) -> bool {
        matches!(self, Packet::WhoAreYou { .. })
    }

    /// Returns true if the packet is a RANDOM packet.
    pub fn is_random(&self) -> bool {
        matches!(self, Packet::RandomPacket { .. })
    }

    /// A short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Packet::RandomPacket { .. } => "RANDOM",
            Packet::WhoAreYou { .. } => "WHOAREYOU",
            Packet::AuthMessage { .. } => "AUTH_MESSAGE",
            Packet::Message { .. } => "MESSAGE",
        }
    }
}

impl std::fmt::Display for Packet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Packet::WhoAreYou {
                auth_tag, enr_seq, ..
            } => write!(
                f,
                "WHOAREYOU {{ auth_tag: {}, enr_seq: {} }}",
                hex::encode(auth_tag),
                enr_seq
            ),
            Packet::AuthMessage {
                tag, auth_header, ..
            } => write!(
                f,
                "AUTH_MESSAGE {{ tag: {}, auth_tag: {} }}",
                hex::encode(tag),
                hex::encode(auth_header.auth_tag)
            ),
            Packet::RandomPacket { tag, auth_tag, .. } | Packet::Message { tag, auth_tag, .. } => {
                write!(
                    f,
                    "{} {{ tag: {}, auth_tag: {} }}",
                    self.kind(),
                    hex::encode(tag),
                    hex::encode(auth_tag)
                )
            }
        }
    }
}

/// Calculates the tag a packet from `src_id` to `dest_id` carries.
pub fn tag(src_id: &NodeId, dest_id: &NodeId) -> Tag {
    let hash = Sha256::digest(&dest_id.raw());
    let mut tag: Tag = Default::default();
    for (i, byte) in tag.iter_mut().enumerate() {
        *byte = hash[i] ^ src_id.raw()[i];
    }
    tag
}

/// Recovers the source node id from the tag of a packet addressed to us.
pub fn src_id(tag: &Tag, local_id: &NodeId) -> NodeId {
    let hash = Sha256::digest(&local_id.raw());
    let mut src_id: [u8; 32] = Default::default();
    for (i, byte) in src_id.iter_mut().enumerate() {
        *byte = hash[i] ^ tag[i];
    }
    NodeId::new(&src_id)
}

/// The magic of a WHOAREYOU packet addressed to `dest_id`.
pub fn magic(dest_id: &NodeId) -> Magic {
    let mut magic: Magic = Default::default();
    magic.copy_from_slice(
        &Sha256::new()
            .chain_update(dest_id.raw())
            .chain_update(WHOAREYOU_STRING.as_bytes())
            .finalize(),
    );
    magic
}
