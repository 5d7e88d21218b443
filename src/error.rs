use crate::session::TaskType;
use enr::EnrError;
use rlp::DecoderError;
use thiserror::Error;

/// Local failures of the crypto, codec and session layers.
#[derive(Debug, Error)]
pub enum Discv5Error {
    /// Key material is not a valid curve point or scalar.
    #[error("Invalid key: {0}")]
    InvalidKey(&'static str),
    /// The key type cannot be used for the requested operation.
    #[error("Key type not supported: {0}")]
    KeyTypeNotSupported(&'static str),
    #[error("Key derivation failed")]
    KeyDerivationFailed,
    /// AEAD tag mismatch or a ciphertext too short to carry a tag.
    #[error("Authentication failure: {0}")]
    AuthFailure(String),
    #[error("Invalid id-nonce signature")]
    InvalidSignature,
    #[error("Session not established")]
    SessionNotEstablished,
    #[error("RLP error: {0}")]
    RLPError(DecoderError),
    /// The local record could not be updated.
    #[error("ENR error: {0}")]
    EnrError(EnrError),
    #[error("Invalid packet: {0}")]
    InvalidPacket(&'static str),
    #[error("{0}")]
    Custom(&'static str),
}

impl From<DecoderError> for Discv5Error {
    fn from(err: DecoderError) -> Self {
        Discv5Error::RLPError(err)
    }
}

impl From<EnrError> for Discv5Error {
    fn from(err: EnrError) -> Self {
        Discv5Error::EnrError(err)
    }
}

/// The reason a pending request failed, delivered through its completion signal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    /// No reply arrived before the request expired.
    #[error("Request timed out")]
    Timeout,
    /// A reply arrived for the request id but for a different kind of request.
    #[error("Protocol mismatch: expected {expected:?}, found {found:?}")]
    ProtocolMismatch { expected: TaskType, found: TaskType },
    /// No request with this id is pending.
    #[error("Unknown request")]
    UnknownRequest,
    /// The session was discarded because the peer's address or identity changed.
    #[error("Session reset")]
    SessionReset,
    #[error("Request cancelled: {0}")]
    Cancelled(String),
    #[error("Invalid ENR: {0}")]
    InvalidEnr(String),
    #[error("Invalid key: {0}")]
    InvalidKey(String),
    /// A FINDNODE for a log distance above 256.
    #[error("Invalid distance: {0}")]
    InvalidDistance(u64),
    /// A handshake capture was requested on a session that is already authenticated.
    #[error("Session already established")]
    AlreadyEstablished,
    #[error("Channel failed: {0}")]
    ChannelFailed(String),
    #[error("Discovery service shut down")]
    Shutdown,
}
