//! Low-level primitives shared by the handshake and the box stream
//!
//! These are the NaCl constructions the Scuttlebutt wire protocols are
//! specified in terms of: `crypto_auth` (HMAC-SHA-512 truncated to 32 bytes),
//! `crypto_hash_sha256`, `crypto_secretbox` (XSalsa20-Poly1305) and the
//! Ed25519 to Curve25519 key conversions.

use crypto_secretbox::aead::{AeadInPlace, Key, KeyInit, Nonce, Tag};
use crypto_secretbox::XSalsa20Poly1305;
use curve25519_dalek::edwards::CompressedEdwardsY;
use ed25519_dalek::SigningKey;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256, Sha512};
use x25519_dalek::{PublicKey as CurvePublicKey, StaticSecret};

pub(crate) const KEY_LEN: usize = 32;
pub(crate) const NONCE_LEN: usize = 24;
pub(crate) const TAG_LEN: usize = 16;

type HmacSha512 = Hmac<Sha512>;

/// SHA-256 over the concatenation of `parts`
pub(crate) fn sha256(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

fn auth_mac(key: &[u8; KEY_LEN], msg: &[u8]) -> HmacSha512 {
    let mut mac = <HmacSha512 as Mac>::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(msg);
    mac
}

/// HMAC-SHA-512-256 tag of `msg`
pub(crate) fn auth(key: &[u8; KEY_LEN], msg: &[u8]) -> [u8; 32] {
    let full = auth_mac(key, msg).finalize().into_bytes();
    let mut tag = [0u8; 32];
    tag.copy_from_slice(&full[..32]);
    tag
}

/// Constant-time check of an HMAC-SHA-512-256 tag
pub(crate) fn auth_verify(key: &[u8; KEY_LEN], msg: &[u8], tag: &[u8]) -> bool {
    tag.len() == 32 && auth_mac(key, msg).verify_truncated_left(tag).is_ok()
}

fn cipher(key: &[u8; KEY_LEN]) -> XSalsa20Poly1305 {
    XSalsa20Poly1305::new(Key::<XSalsa20Poly1305>::from_slice(key))
}

/// Encrypts `buffer` in place and returns the Poly1305 tag
pub(crate) fn seal_detached(
    key: &[u8; KEY_LEN],
    nonce: &[u8; NONCE_LEN],
    buffer: &mut [u8],
) -> [u8; TAG_LEN] {
    let tag = cipher(key)
        .encrypt_in_place_detached(Nonce::<XSalsa20Poly1305>::from_slice(nonce), b"", buffer)
        .expect("secretbox encryption of an in-memory buffer");
    let mut out = [0u8; TAG_LEN];
    out.copy_from_slice(&tag);
    out
}

/// Decrypts `buffer` in place, returning false if the tag does not verify
///
/// On failure the contents of `buffer` are unspecified and must be discarded.
pub(crate) fn open_detached(
    key: &[u8; KEY_LEN],
    nonce: &[u8; NONCE_LEN],
    buffer: &mut [u8],
    tag: &[u8; TAG_LEN],
) -> bool {
    cipher(key)
        .decrypt_in_place_detached(
            Nonce::<XSalsa20Poly1305>::from_slice(nonce),
            b"",
            buffer,
            Tag::<XSalsa20Poly1305>::from_slice(tag),
        )
        .is_ok()
}

/// NaCl `crypto_secretbox_easy`: tag followed by ciphertext
pub(crate) fn seal(key: &[u8; KEY_LEN], nonce: &[u8; NONCE_LEN], plaintext: &[u8]) -> Vec<u8> {
    let mut out = vec![0u8; TAG_LEN + plaintext.len()];
    out[TAG_LEN..].copy_from_slice(plaintext);
    let tag = seal_detached(key, nonce, &mut out[TAG_LEN..]);
    out[..TAG_LEN].copy_from_slice(&tag);
    out
}

/// NaCl `crypto_secretbox_open_easy`
pub(crate) fn open(key: &[u8; KEY_LEN], nonce: &[u8; NONCE_LEN], boxed: &[u8]) -> Option<Vec<u8>> {
    if boxed.len() < TAG_LEN {
        return None;
    }
    let mut tag = [0u8; TAG_LEN];
    tag.copy_from_slice(&boxed[..TAG_LEN]);
    let mut plaintext = boxed[TAG_LEN..].to_vec();
    open_detached(key, nonce, &mut plaintext, &tag).then_some(plaintext)
}

/// Converts an Ed25519 public key to its Curve25519 (Montgomery) form
///
/// Returns `None` if the bytes are not a valid Edwards point.
pub(crate) fn ed25519_public_to_curve25519(public: &[u8; 32]) -> Option<CurvePublicKey> {
    let point = CompressedEdwardsY(*public).decompress()?;
    Some(CurvePublicKey::from(point.to_montgomery().to_bytes()))
}

/// Converts an Ed25519 signing key to a Curve25519 secret
///
/// The scalar half of the expanded Ed25519 key is used directly; x25519
/// clamps it on every multiplication.
pub(crate) fn ed25519_secret_to_curve25519(signing: &SigningKey) -> StaticSecret {
    StaticSecret::from(signing.to_scalar_bytes())
}
