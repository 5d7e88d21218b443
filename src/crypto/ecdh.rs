//! Implements the static ecdh algorithm required by discv5 in terms of the `k256` library.
use enr::k256::{self, elliptic_curve::sec1::ToEncodedPoint};

/// Multiplies `public_key` by `secret` and returns the resulting point in compressed form
/// (33 bytes). This is the secret fed to the key-derivation function, not only its x-coordinate.
pub fn ecdh(public_key: &k256::PublicKey, secret: &k256::NonZeroScalar) -> Vec<u8> {
    (public_key.to_projective() * **secret)
        .to_affine()
        .to_encoded_point(true)
        .as_bytes()
        .to_vec()
}
