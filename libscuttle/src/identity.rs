//! Ed25519 identities
//!
//! An [`Identity`] wraps an Ed25519 keypair. The public half is the feed
//! identifier ([`FeedId`], `@<base64>.ed25519`); the private half is only
//! present for identities owned by this process.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use x25519_dalek::StaticSecret;

use crate::crypto;
use crate::error::{CryptoError, DecodeError, Result};

/// Size of an Ed25519 public key in bytes
pub const PUBLIC_KEY_SIZE: usize = 32;
/// Size of an Ed25519 seed (private key) in bytes
pub const SEED_SIZE: usize = 32;
/// Size of an Ed25519 signature in bytes
pub const SIGNATURE_SIZE: usize = 64;

const FEED_SUFFIX: &str = ".ed25519";
const SIGNATURE_SUFFIX: &str = ".sig.ed25519";

fn decode_fixed<const N: usize>(b64: &str) -> Option<[u8; N]> {
    let bytes = BASE64.decode(b64).ok()?;
    bytes.try_into().ok()
}

/// Public identifier of a feed: `@<base64 public key>.ed25519`
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FeedId([u8; PUBLIC_KEY_SIZE]);

impl FeedId {
    pub fn from_bytes(bytes: [u8; PUBLIC_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.0
    }

    /// Base64 of the raw key, without sigil or suffix
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.0)
    }

    /// Parse a bare base64 public key (the form used in multiserver addresses)
    pub fn from_base64(b64: &str) -> std::result::Result<Self, DecodeError> {
        decode_fixed(b64).map(Self).ok_or_else(|| DecodeError::Sigil {
            kind: "public key",
            value: b64.to_string(),
        })
    }

    pub(crate) fn verifying_key(&self) -> std::result::Result<VerifyingKey, CryptoError> {
        VerifyingKey::from_bytes(&self.0)
            .map_err(|e| CryptoError::InvalidKey(format!("{}: {}", self, e)))
    }
}

impl fmt::Display for FeedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}{}", self.to_base64(), FEED_SUFFIX)
    }
}

impl fmt::Debug for FeedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FeedId({})", self)
    }
}

impl FromStr for FeedId {
    type Err = DecodeError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.strip_prefix('@')
            .and_then(|rest| rest.strip_suffix(FEED_SUFFIX))
            .and_then(decode_fixed)
            .map(Self)
            .ok_or_else(|| DecodeError::Sigil {
                kind: "feed",
                value: s.to_string(),
            })
    }
}

impl TryFrom<String> for FeedId {
    type Error = DecodeError;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FeedId> for String {
    fn from(id: FeedId) -> Self {
        id.to_string()
    }
}

/// Detached Ed25519 signature: `<base64>.sig.ed25519`
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Signature([u8; SIGNATURE_SIZE]);

impl Signature {
    pub fn from_bytes(bytes: [u8; SIGNATURE_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SIGNATURE_SIZE] {
        &self.0
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", BASE64.encode(self.0), SIGNATURE_SUFFIX)
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", self)
    }
}

impl FromStr for Signature {
    type Err = DecodeError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.strip_suffix(SIGNATURE_SUFFIX)
            .and_then(decode_fixed)
            .map(Self)
            .ok_or_else(|| DecodeError::Sigil {
                kind: "signature",
                value: s.to_string(),
            })
    }
}

impl TryFrom<String> for Signature {
    type Error = DecodeError;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Signature> for String {
    fn from(sig: Signature) -> Self {
        sig.to_string()
    }
}

/// On-disk layout of an SSB secret file (`~/.ssb/secret`)
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SecretFile {
    curve: String,
    public: String,
    private: String,
    id: String,
}

/// Ed25519 keypair, optionally without its private half
#[derive(Clone)]
pub struct Identity {
    id: FeedId,
    signing: Option<SigningKey>,
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("id", &self.id)
            .field("private_key", &self.signing.is_some())
            .finish()
    }
}

impl Identity {
    /// Generate a new random keypair
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::generate(&mut OsRng))
    }

    /// Import a keypair from its 32-byte seed
    pub fn from_seed(seed: [u8; SEED_SIZE]) -> Self {
        Self::from_signing_key(SigningKey::from_bytes(&seed))
    }

    /// A verify-only identity for someone else's feed
    pub fn from_public(id: FeedId) -> Self {
        Self { id, signing: None }
    }

    fn from_signing_key(signing: SigningKey) -> Self {
        let id = FeedId(signing.verifying_key().to_bytes());
        Self {
            id,
            signing: Some(signing),
        }
    }

    pub fn id(&self) -> &FeedId {
        &self.id
    }

    pub fn has_private_key(&self) -> bool {
        self.signing.is_some()
    }

    /// Sign `message` with the private key
    pub fn sign(&self, message: &[u8]) -> std::result::Result<Signature, CryptoError> {
        let signing = self.signing_key()?;
        Ok(Signature(signing.sign(message).to_bytes()))
    }

    /// Check `signature` over `message` against `public`
    ///
    /// Never fails: malformed keys or signatures simply do not verify.
    pub fn verify(message: &[u8], signature: &Signature, public: &FeedId) -> bool {
        let Ok(key) = public.verifying_key() else {
            return false;
        };
        let signature = ed25519_dalek::Signature::from_bytes(&signature.0);
        key.verify_strict(message, &signature).is_ok()
    }

    pub(crate) fn signing_key(&self) -> std::result::Result<&SigningKey, CryptoError> {
        self.signing.as_ref().ok_or(CryptoError::MissingPrivateKey)
    }

    /// Curve25519 form of the private key, for the handshake's static DH
    pub(crate) fn curve25519_secret(&self) -> std::result::Result<StaticSecret, CryptoError> {
        Ok(crypto::ed25519_secret_to_curve25519(self.signing_key()?))
    }

    /// Parse the JSON secret format used by SSB implementations
    ///
    /// Lines starting with `#` are comments and are skipped.
    pub fn from_secret_str(contents: &str) -> std::result::Result<Self, DecodeError> {
        let json: String = contents
            .lines()
            .filter(|line| !line.trim_start().starts_with('#'))
            .collect::<Vec<_>>()
            .join("\n");

        let secret: SecretFile = serde_json::from_str(&json)
            .map_err(|e| DecodeError::Secret(format!("Failed to parse secret JSON: {}", e)))?;

        if secret.curve != "ed25519" {
            return Err(DecodeError::Secret(format!(
                "Invalid curve: expected 'ed25519', got '{}'",
                secret.curve
            )));
        }

        let private_b64 = secret
            .private
            .strip_suffix(FEED_SUFFIX)
            .ok_or_else(|| DecodeError::Secret("Private key must end with '.ed25519'".to_string()))?;
        let private: [u8; 64] = decode_fixed(private_b64).ok_or_else(|| {
            DecodeError::Secret("Private key must be 64 bytes of base64".to_string())
        })?;

        let mut seed = [0u8; SEED_SIZE];
        seed.copy_from_slice(&private[..SEED_SIZE]);
        let identity = Self::from_seed(seed);

        if private[SEED_SIZE..] != identity.id.0 {
            return Err(DecodeError::Secret(
                "Private key does not embed its public key".to_string(),
            ));
        }

        let id: FeedId = secret.id.parse()?;
        if id != identity.id {
            return Err(DecodeError::Secret(
                "ID does not match private key".to_string(),
            ));
        }

        let public = secret.public.strip_prefix('@').unwrap_or(&secret.public);
        if public.strip_suffix(FEED_SUFFIX) != Some(identity.id.to_base64().as_str()) {
            return Err(DecodeError::Secret(
                "Public key does not match private key".to_string(),
            ));
        }

        Ok(identity)
    }

    /// Load an identity from an SSB secret file
    pub fn from_secret_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let identity = Self::from_secret_str(&contents)?;
        tracing::debug!("Loaded identity {} from {}", identity.id, path.display());
        Ok(identity)
    }

    /// Export the keypair in SSB secret format
    pub fn to_secret_string(&self) -> std::result::Result<String, CryptoError> {
        let signing = self.signing_key()?;
        let mut private = [0u8; 64];
        private[..SEED_SIZE].copy_from_slice(&signing.to_bytes());
        private[SEED_SIZE..].copy_from_slice(&self.id.0);

        let secret = SecretFile {
            curve: "ed25519".to_string(),
            public: format!("{}{}", self.id.to_base64(), FEED_SUFFIX),
            private: format!("{}{}", BASE64.encode(private), FEED_SUFFIX),
            id: self.id.to_string(),
        };

        serde_json::to_string_pretty(&secret)
            .map_err(|e| CryptoError::InvalidKey(format!("Failed to serialize secret: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEED_B64: &str = "Mz2qkNOP2K6upnqibWrR+z8pVUI1ReA1MLc7QMtF2qQ=";
    const FEED_ID: &str = "@I/4cyN/jPBbDsikbHzAEvmaYlaJK33lW3UhWjNXjyrU=.ed25519";

    fn known_identity() -> Identity {
        Identity::from_seed(decode_fixed(SEED_B64).unwrap())
    }

    #[test]
    fn test_known_seed_yields_known_feed_id() {
        let identity = known_identity();
        assert_eq!(identity.id().to_string(), FEED_ID);
        assert!(identity.has_private_key());
    }

    #[test]
    fn test_feed_id_parse() {
        let id: FeedId = FEED_ID.parse().unwrap();
        assert_eq!(id, *known_identity().id());
        assert_eq!(id.to_string(), FEED_ID);
    }

    #[test]
    fn test_feed_id_parse_rejects_malformed() {
        assert!("I/4cyN/jPBbDsikbHzAEvmaYlaJK33lW3UhWjNXjyrU=.ed25519"
            .parse::<FeedId>()
            .is_err());
        assert!("@I/4cyN/jPBbDsikbHzAEvmaYlaJK33lW3UhWjNXjyrU="
            .parse::<FeedId>()
            .is_err());
        assert!("@AAAA.ed25519".parse::<FeedId>().is_err());
        assert!("@!!!.ed25519".parse::<FeedId>().is_err());
    }

    #[test]
    fn test_sign_and_verify() {
        let identity = Identity::generate();
        let message = b"hello, world!";

        let signature = identity.sign(message).unwrap();
        assert!(Identity::verify(message, &signature, identity.id()));

        assert!(!Identity::verify(b"hello, world?", &signature, identity.id()));

        let other = Identity::generate();
        assert!(!Identity::verify(message, &signature, other.id()));
    }

    #[test]
    fn test_verify_fails_on_signature_bit_flip() {
        let identity = Identity::generate();
        let signature = identity.sign(b"payload").unwrap();

        for byte in [0usize, 31, 32, 63] {
            let mut bytes = *signature.as_bytes();
            bytes[byte] ^= 0x01;
            assert!(!Identity::verify(
                b"payload",
                &Signature::from_bytes(bytes),
                identity.id()
            ));
        }
    }

    #[test]
    fn test_verify_never_panics_on_invalid_key() {
        let signature = Signature::from_bytes([0u8; SIGNATURE_SIZE]);
        let bogus = FeedId::from_bytes([0xff; PUBLIC_KEY_SIZE]);
        assert!(!Identity::verify(b"x", &signature, &bogus));
    }

    #[test]
    fn test_sign_is_deterministic() {
        let identity = known_identity();
        assert_eq!(identity.sign(b"abc").unwrap(), identity.sign(b"abc").unwrap());
    }

    #[test]
    fn test_verify_only_identity_cannot_sign() {
        let public = Identity::from_public(*known_identity().id());
        assert!(!public.has_private_key());
        assert_eq!(public.sign(b"abc"), Err(CryptoError::MissingPrivateKey));
        assert!(public.to_secret_string().is_err());
    }

    #[test]
    fn test_signature_sigil_roundtrip() {
        let signature = known_identity().sign(b"abc").unwrap();
        let text = signature.to_string();
        assert!(text.ends_with(".sig.ed25519"));
        assert_eq!(text.parse::<Signature>().unwrap(), signature);
        assert!("abc.sig.ed25519".parse::<Signature>().is_err());
    }

    #[test]
    fn test_secret_file_roundtrip() {
        let identity = Identity::generate();
        let exported = identity.to_secret_string().unwrap();
        let imported = Identity::from_secret_str(&exported).unwrap();
        assert_eq!(imported.id(), identity.id());
        assert_eq!(
            imported.sign(b"abc").unwrap(),
            identity.sign(b"abc").unwrap()
        );
    }

    #[test]
    fn test_secret_file_skips_comments() {
        let exported = known_identity().to_secret_string().unwrap();
        let with_comments = format!(
            "# this is your SECRET name.\n# never show this to anyone\n\n{}\n# WARNING!\n",
            exported
        );
        let imported = Identity::from_secret_str(&with_comments).unwrap();
        assert_eq!(imported.id().to_string(), FEED_ID);
    }

    #[test]
    fn test_secret_file_rejects_wrong_curve() {
        let exported = known_identity()
            .to_secret_string()
            .unwrap()
            .replace("\"curve\": \"ed25519\"", "\"curve\": \"k256\"");
        let result = Identity::from_secret_str(&exported);
        assert!(result.unwrap_err().to_string().contains("Invalid curve"));
    }

    #[test]
    fn test_secret_file_rejects_mismatched_id() {
        let other = Identity::generate();
        let exported = known_identity()
            .to_secret_string()
            .unwrap()
            .replace(FEED_ID, &other.id().to_string());
        assert!(Identity::from_secret_str(&exported).is_err());
    }

    #[test]
    fn test_debug_hides_private_key() {
        let debug = format!("{:?}", known_identity());
        assert!(debug.contains("private_key: true"));
        assert!(!debug.contains(SEED_B64));
    }
}
