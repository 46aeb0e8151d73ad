//! Secret Handshake
//!
//! A four-message mutually authenticated key exchange between a client and
//! a server that both hold long-term Ed25519 identities and share a network
//! key:
//!
//! 1. client hello (64 bytes): `auth(N, a) ‖ a`
//! 2. server hello (64 bytes): `auth(N, b) ‖ b`
//! 3. client auth (112 bytes): the client's signature and long-term key,
//!    boxed under `sha256(N ‖ ab ‖ aB)`
//! 4. server accept (80 bytes): the server's signature, boxed under
//!    `sha256(N ‖ ab ‖ aB ‖ Ab)`
//!
//! [`Handshake`] is the pure state machine; [`client`] and [`server`] drive it
//! over any async byte stream.

use std::fmt;
use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::{KEY_LEN, NONCE_LEN};
use crate::error::DecodeError;
use crate::identity::FeedId;

mod io;
mod state;

pub use io::{accept, client, connect, server};
pub use state::Handshake;

/// Client and server hello: 32-byte authenticator followed by a 32-byte key
pub const HELLO_LEN: usize = 64;
/// Boxed client signature (64) and long-term key (32)
pub const CLIENT_AUTH_LEN: usize = 112;
/// Boxed server signature (64)
pub const SERVER_ACCEPT_LEN: usize = 80;

/// Network-wide application key
///
/// Peers with different network keys cannot complete a handshake; the hello
/// exchange fails before any long-term key material is revealed.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct NetworkKey([u8; KEY_LEN]);

impl NetworkKey {
    /// The public Scuttlebutt main network
    pub const MAIN: NetworkKey = NetworkKey([
        0xd4, 0xa1, 0xcb, 0x88, 0xa6, 0x6f, 0x02, 0xf8, 0xdb, 0x63, 0x5c, 0xe2, 0x64, 0x41, 0xcc,
        0x5d, 0xac, 0x1b, 0x08, 0x42, 0x0c, 0xea, 0xac, 0x23, 0x08, 0x39, 0xb7, 0x55, 0x84, 0x5a,
        0x9f, 0xfb,
    ]);

    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    pub fn from_base64(b64: &str) -> Result<Self, DecodeError> {
        BASE64
            .decode(b64.trim())
            .ok()
            .and_then(|bytes| <[u8; KEY_LEN]>::try_from(bytes).ok())
            .map(Self)
            .ok_or_else(|| DecodeError::Field {
                field: "network.key",
                reason: "expected 32 bytes of base64".to_string(),
            })
    }
}

impl Default for NetworkKey {
    fn default() -> Self {
        Self::MAIN
    }
}

impl fmt::Display for NetworkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&BASE64.encode(self.0))
    }
}

impl fmt::Debug for NetworkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NetworkKey({})", self)
    }
}

impl FromStr for NetworkKey {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_base64(s)
    }
}

/// Which side of the handshake we are
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Initiator, knows the server's long-term key in advance
    Client,
    /// Responder, learns the client's long-term key from its auth message
    Server,
}

/// Progress of a handshake
///
/// `ReceivedHello` and `ReceivedAuth` are passed through inside a single
/// [`Handshake::advance`] call and are only observable in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Start,
    SentHello,
    ReceivedHello,
    SentAuth,
    ReceivedAuth,
    Accepted,
    Failed,
}

/// A symmetric key and the nonce its first frame uses
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct KeyNonce {
    pub key: [u8; KEY_LEN],
    pub nonce: [u8; NONCE_LEN],
}

impl fmt::Debug for KeyNonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyNonce")
            .field("key", &"<redacted>")
            .field("nonce", &"<redacted>")
            .finish()
    }
}

/// Session keys for the two directions of a box stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoxStreamParams {
    pub send: KeyNonce,
    pub receive: KeyNonce,
}

/// Result of a successful handshake
#[derive(Debug, Clone)]
pub struct HandshakeOutcome {
    /// Authenticated long-term key of the other side
    pub peer: FeedId,
    pub params: BoxStreamParams,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_main_network_key_base64() {
        assert_eq!(
            NetworkKey::MAIN.to_string(),
            "1KHLiKZvAvjbY1ziZEHMXawbCEIM6qwjCDm3VYRan/s="
        );
        let parsed: NetworkKey = "1KHLiKZvAvjbY1ziZEHMXawbCEIM6qwjCDm3VYRan/s="
            .parse()
            .unwrap();
        assert_eq!(parsed, NetworkKey::default());
    }

    #[test]
    fn test_network_key_rejects_wrong_length() {
        assert!("AAAA".parse::<NetworkKey>().is_err());
        assert!("not base64!".parse::<NetworkKey>().is_err());
    }

    #[test]
    fn test_key_nonce_debug_is_redacted() {
        let params = KeyNonce {
            key: [0xab; KEY_LEN],
            nonce: [0xcd; NONCE_LEN],
        };
        let debug = format!("{:?}", params);
        assert!(debug.contains("redacted"));
        assert!(!debug.contains("171"));
    }
}
