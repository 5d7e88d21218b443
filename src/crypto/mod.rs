//! Implementation for generating session keys in the Discv5 protocol.
//! Diffie-Hellman key agreement is performed on secp256k1 keys. Session keys are then derived
//! using the HKDF (SHA2-256) key derivation function.
//!
//! There is no abstraction in this module as the protocol defines a singular encryption and
//! key-derivation algorithm. Every function here is a pure function of its inputs.
use crate::error::Discv5Error;
use crate::packet::{AuthResponse, AuthTag, IdNonce, AUTH_TAG_LENGTH};
use aes_gcm::aead::{generic_array::GenericArray, Aead, NewAead, Payload};
use aes_gcm::Aes128Gcm;
use enr::k256::{
    self,
    ecdsa::signature::{DigestSigner, DigestVerifier},
    elliptic_curve::sec1::ToEncodedPoint,
};
use enr::{CombinedKey, CombinedPublicKey, NodeId};
use hkdf::Hkdf;
use sha2::{Digest, Sha256};
use std::convert::TryFrom;
use zeroize::Zeroize;

mod ecdh;

const NODE_ID_LENGTH: usize = 32;
const INFO_LENGTH: usize = 26 + 2 * NODE_ID_LENGTH;
const KEY_LENGTH: usize = 16;
const MAC_LENGTH: usize = 16;
const KEY_AGREEMENT_STRING: &str = "discovery v5 key agreement";
const NONCE_PREFIX: &str = "discovery-id-nonce";

pub type Key = [u8; KEY_LENGTH];

/// The key triple derived once per handshake.
#[derive(Zeroize, Clone, PartialEq)]
pub struct DerivedKeys {
    /// Encrypts messages sent by the handshake initiator.
    pub initiator_key: Key,
    /// Encrypts messages sent by the handshake recipient.
    pub recipient_key: Key,
    /// Encrypts the auth-response of the auth-header.
    pub auth_resp_key: Key,
}

/* Session key generation */

/// Computes the ECDH shared secret between a local secret key and a remote public key. The
/// remote key may be any SEC1 encoding or the raw 64-byte uncompressed form.
pub fn ecdh(local_key: &CombinedKey, remote_pubkey: &[u8]) -> Result<Vec<u8>, Discv5Error> {
    match local_key {
        CombinedKey::Secp256k1(key) => {
            let remote_pubkey = parse_public_key(remote_pubkey)?;
            Ok(ecdh::ecdh(&remote_pubkey, key.as_nonzero_scalar()))
        }
        CombinedKey::Ed25519(_) => Err(Discv5Error::KeyTypeNotSupported("Ed25519")),
    }
}

fn parse_public_key(bytes: &[u8]) -> Result<k256::PublicKey, Discv5Error> {
    let parsed = if bytes.len() == 64 {
        // raw uncompressed key without the sec1 tag byte
        let mut tagged = [4u8; 65];
        tagged[1..].copy_from_slice(bytes);
        k256::PublicKey::from_sec1_bytes(&tagged)
    } else {
        k256::PublicKey::from_sec1_bytes(bytes)
    };
    parsed.map_err(|_| Discv5Error::InvalidKey("not a secp256k1 public key"))
}

/// Generates the session keys as the initiator of a handshake. An ephemeral key pair is created
/// for the exchange; its compressed public key is returned alongside the keys.
pub fn generate_session_keys(
    local_id: &NodeId,
    remote_id: &NodeId,
    remote_pubkey: &CombinedPublicKey,
    id_nonce: &IdNonce,
) -> Result<(DerivedKeys, Vec<u8>), Discv5Error> {
    let (secret, ephem_pk) = match remote_pubkey {
        CombinedPublicKey::Secp256k1(remote_pk) => {
            let ephem_sk = k256::SecretKey::random(&mut rand::thread_rng());
            let ephem_pk = ephem_sk
                .public_key()
                .to_encoded_point(true)
                .as_bytes()
                .to_vec();
            let secret = ecdh::ecdh(
                &k256::PublicKey::from(remote_pk),
                &ephem_sk.to_nonzero_scalar(),
            );
            (secret, ephem_pk)
        }
        CombinedPublicKey::Ed25519(_) => return Err(Discv5Error::KeyTypeNotSupported("Ed25519")),
    };

    let keys = derive_keys(&secret, local_id, remote_id, id_nonce)?;
    Ok((keys, ephem_pk))
}

/// HKDF-expands a shared secret into the key triple. Both peers call this with the initiator's id
/// first.
pub fn derive_keys(
    secret: &[u8],
    initiator_id: &NodeId,
    recipient_id: &NodeId,
    id_nonce: &IdNonce,
) -> Result<DerivedKeys, Discv5Error> {
    let mut info = [0u8; INFO_LENGTH];
    info[0..26].copy_from_slice(KEY_AGREEMENT_STRING.as_bytes());
    info[26..26 + NODE_ID_LENGTH].copy_from_slice(&initiator_id.raw());
    info[26 + NODE_ID_LENGTH..].copy_from_slice(&recipient_id.raw());

    let hk = Hkdf::<Sha256>::new(Some(id_nonce), secret);

    let mut okm = [0u8; 3 * KEY_LENGTH];
    hk.expand(&info, &mut okm)
        .map_err(|_| Discv5Error::KeyDerivationFailed)?;

    let mut keys = DerivedKeys {
        initiator_key: Default::default(),
        recipient_key: Default::default(),
        auth_resp_key: Default::default(),
    };
    keys.initiator_key.copy_from_slice(&okm[0..KEY_LENGTH]);
    keys.recipient_key
        .copy_from_slice(&okm[KEY_LENGTH..2 * KEY_LENGTH]);
    keys.auth_resp_key
        .copy_from_slice(&okm[2 * KEY_LENGTH..3 * KEY_LENGTH]);
    okm.zeroize();

    Ok(keys)
}

/// Derives the session keys as the recipient of a handshake, from the initiator's ephemeral
/// public key and our static key.
pub fn derive_keys_from_pubkey(
    local_key: &CombinedKey,
    local_id: &NodeId,
    remote_id: &NodeId,
    id_nonce: &IdNonce,
    ephem_pubkey: &[u8],
) -> Result<DerivedKeys, Discv5Error> {
    let secret = ecdh(local_key, ephem_pubkey)?;
    derive_keys(&secret, remote_id, local_id, id_nonce)
}

/* Nonce Signing */

fn signing_digest(id_nonce: &IdNonce, ephem_pubkey: &[u8]) -> Sha256 {
    Sha256::new()
        .chain_update(NONCE_PREFIX.as_bytes())
        .chain_update(id_nonce)
        .chain_update(ephem_pubkey)
}

/// Signs `"discovery-id-nonce" || id_nonce || ephem_pubkey` with our static key.
pub fn sign_nonce(
    signing_key: &CombinedKey,
    id_nonce: &IdNonce,
    ephem_pubkey: &[u8],
) -> Result<Vec<u8>, Discv5Error> {
    match signing_key {
        CombinedKey::Secp256k1(key) => {
            let sig: k256::ecdsa::Signature = key
                .try_sign_digest(signing_digest(id_nonce, ephem_pubkey))
                .map_err(|_| Discv5Error::Custom("Could not sign the id-nonce"))?;
            Ok(sig.to_bytes().to_vec())
        }
        CombinedKey::Ed25519(_) => Err(Discv5Error::KeyTypeNotSupported("Ed25519")),
    }
}

/// Verifies the id-nonce signature of an auth-header. Malformed signatures verify as `false`.
pub fn verify_authentication_nonce(
    remote_pubkey: &CombinedPublicKey,
    remote_ephem_pubkey: &[u8],
    id_nonce: &IdNonce,
    sig: &[u8],
) -> bool {
    match remote_pubkey {
        CombinedPublicKey::Secp256k1(key) => match k256::ecdsa::Signature::try_from(sig) {
            Ok(sig) => key
                .verify_digest(signing_digest(id_nonce, remote_ephem_pubkey), &sig)
                .is_ok(),
            Err(_) => false,
        },
        // key not supported
        CombinedPublicKey::Ed25519(_) => false,
    }
}

/* Decryption related functions */

/// Decrypt messages that are post-fixed with an authenticated MAC.
pub fn decrypt_message(
    key: &Key,
    message_nonce: AuthTag,
    msg: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, Discv5Error> {
    if msg.len() < MAC_LENGTH {
        return Err(Discv5Error::AuthFailure(
            "Message not long enough to contain a MAC".into(),
        ));
    }

    let aead = Aes128Gcm::new(GenericArray::from_slice(key));
    let payload = Payload { msg, aad };
    aead.decrypt(GenericArray::from_slice(&message_nonce), payload)
        .map_err(|e| Discv5Error::AuthFailure(e.to_string()))
}

/* Encryption related functions */

/// A wrapper around the underlying default AES_GCM implementation.
pub fn encrypt_message(
    key: &Key,
    message_nonce: AuthTag,
    msg: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, Discv5Error> {
    let aead = Aes128Gcm::new(GenericArray::from_slice(key));
    let payload = Payload { msg, aad };
    aead.encrypt(GenericArray::from_slice(&message_nonce), payload)
        .map_err(|e| Discv5Error::AuthFailure(e.to_string()))
}

/// The auth-response is encrypted with a zero nonce and no associated data.
pub fn encrypt_auth_response(
    auth_resp_key: &Key,
    response: &AuthResponse,
) -> Result<Vec<u8>, Discv5Error> {
    encrypt_message(auth_resp_key, [0u8; AUTH_TAG_LENGTH], &response.encode(), &[])
}

pub fn decrypt_auth_response(
    auth_resp_key: &Key,
    ciphertext: &[u8],
) -> Result<AuthResponse, Discv5Error> {
    let plaintext = decrypt_message(auth_resp_key, [0u8; AUTH_TAG_LENGTH], ciphertext, &[])?;
    rlp::decode::<AuthResponse>(&plaintext).map_err(Discv5Error::RLPError)
}

/* Distance */

/// The bit length of `a XOR b`, reading the ids big-endian. Zero for equal ids, 256 at most.
pub fn log_distance(a: &NodeId, b: &NodeId) -> u64 {
    let (a, b) = (a.raw(), b.raw());
    for (i, (x, y)) in a.iter().zip(b.iter()).enumerate() {
        let xor = x ^ y;
        if xor != 0 {
            return ((NODE_ID_LENGTH - i) * 8) as u64 - u64::from(xor.leading_zeros());
        }
    }
    0
}
