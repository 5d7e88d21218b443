//! The authentication header that completes a handshake, and the signed response it carries.
use super::{AuthTag, IdNonce};
use enr::{CombinedKey, Enr};
use rlp::{Decodable, DecoderError, Encodable, Rlp, RlpStream};

/// The only authentication scheme in use.
pub const AUTH_SCHEME_NAME: &str = "gcm";
const AUTH_RESPONSE_VERSION: u8 = 5;

/// The Authentication header.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthHeader {
    /// Authentication nonce of the message it accompanies.
    pub auth_tag: AuthTag,

    /// The nonce of the answered WHOAREYOU packet.
    pub id_nonce: IdNonce,

    /// The authentication scheme.
    pub auth_scheme_name: &'static str,

    /// The compressed ephemeral public key of the initiator.
    pub ephemeral_pubkey: Vec<u8>,

    /// The encrypted [`AuthResponse`].
    pub auth_response: Vec<u8>,
}

impl AuthHeader {
    pub fn new(
        auth_tag: AuthTag,
        id_nonce: IdNonce,
        ephemeral_pubkey: Vec<u8>,
        auth_response: Vec<u8>,
    ) -> Self {
        AuthHeader {
            auth_tag,
            id_nonce,
            auth_scheme_name: AUTH_SCHEME_NAME,
            ephemeral_pubkey,
            auth_response,
        }
    }
}

/// An authentication response. This contains a signed challenge nonce, and optionally an updated
/// ENR if the challenger has an outdated one.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthResponse {
    /// The current version of the protocol. Currently set to 5.
    pub version: u8,

    /// A signature of the challenge nonce.
    pub signature: Vec<u8>,

    /// An optional ENR, sent when the challenger's sequence number is behind ours.
    pub node_record: Option<Enr<CombinedKey>>,
}

impl AuthResponse {
    pub fn new(sig: &[u8], node_record: Option<Enr<CombinedKey>>) -> Self {
        AuthResponse {
            version: AUTH_RESPONSE_VERSION,
            signature: sig.to_vec(),
            node_record,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        rlp::encode(self).to_vec()
    }
}

impl Encodable for AuthResponse {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(3);
        s.append(&self.version);
        s.append(&self.signature);
        // an absent record is an empty list
        match &self.node_record {
            Some(node_record) => {
                s.append(node_record);
            }
            None => {
                s.begin_list(0);
            }
        }
    }
}

impl Decodable for AuthResponse {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        if !rlp.is_list() {
            return Err(DecoderError::RlpExpectedToBeList);
        }
        if rlp.item_count()? != 3 {
            return Err(DecoderError::RlpIncorrectListLen);
        }

        let version = rlp.val_at::<u8>(0)?;
        if version != AUTH_RESPONSE_VERSION {
            return Err(DecoderError::Custom("Unsupported auth-response version"));
        }
        let signature = rlp.val_at::<Vec<u8>>(1)?;
        let record = rlp.at(2)?;
        let node_record = if record.is_list() && record.item_count()? == 0 {
            None
        } else {
            Some(record.as_val::<Enr<CombinedKey>>()?)
        };

        Ok(AuthResponse {
            version,
            signature,
            node_record,
        })
    }
}
