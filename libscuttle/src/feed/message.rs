//! Signed feed messages
//!
//! A [`Message`] is one entry of an append-only feed. It is linked to its
//! predecessor by [`MessageKey`], the SHA-256 of the predecessor's wire
//! encoding.

use std::fmt;
use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value as JsonValue;

use super::codec;
use crate::error::DecodeError;
use crate::identity::{FeedId, Identity, Signature};

/// Hash algorithm tag carried in every message
pub const HASH_ALGORITHM: &str = "sha256";

const KEY_SUFFIX: &str = ".sha256";
const BOX_SUFFIX: &str = ".box";

/// Current wall clock in milliseconds since the Unix epoch
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Content address of a message: `%<base64 sha256>.sha256`
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MessageKey([u8; 32]);

impl MessageKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}{}", BASE64.encode(self.0), KEY_SUFFIX)
    }
}

impl fmt::Debug for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageKey({})", self)
    }
}

impl FromStr for MessageKey {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.strip_prefix('%')
            .and_then(|rest| rest.strip_suffix(KEY_SUFFIX))
            .and_then(|b64| BASE64.decode(b64).ok())
            .and_then(|bytes| <[u8; 32]>::try_from(bytes).ok())
            .map(Self)
            .ok_or_else(|| DecodeError::Sigil {
                kind: "message",
                value: s.to_string(),
            })
    }
}

impl TryFrom<String> for MessageKey {
    type Error = DecodeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MessageKey> for String {
    fn from(key: MessageKey) -> Self {
        key.to_string()
    }
}

/// Check that `content` is something a feed can carry
///
/// Content is opaque to this crate, but it must be either a JSON object or an
/// encrypted string ending in `.box`.
pub fn validate_content(content: &JsonValue) -> Result<(), String> {
    match content {
        JsonValue::Object(_) => Ok(()),
        JsonValue::String(s) if s.ends_with(BOX_SUFFIX) => Ok(()),
        JsonValue::String(_) => Err("String content must be an encrypted '.box' payload".to_string()),
        other => Err(format!("Content must be a JSON object, got {}", type_name(other))),
    }
}

fn type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

/// The signable fields of a message, in wire order
///
/// This is everything except the signature; its canonical encoding is what
/// gets signed.
#[derive(Debug, Clone, Copy)]
pub struct MessageFields<'a> {
    pub previous: Option<&'a MessageKey>,
    pub author: &'a FeedId,
    pub sequence: u64,
    pub timestamp: i64,
    pub content: &'a JsonValue,
}

impl MessageFields<'_> {
    fn serialize_into<S: SerializeStruct>(&self, state: &mut S) -> Result<(), S::Error> {
        state.serialize_field("previous", &self.previous)?;
        state.serialize_field("author", self.author)?;
        state.serialize_field("sequence", &self.sequence)?;
        state.serialize_field("timestamp", &self.timestamp)?;
        state.serialize_field("hash", HASH_ALGORITHM)?;
        state.serialize_field("content", self.content)
    }
}

impl Serialize for MessageFields<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Message", 6)?;
        self.serialize_into(&mut state)?;
        state.end()
    }
}

/// A signed feed message
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Key of the previous message, `None` for sequence 1
    pub previous: Option<MessageKey>,
    pub author: FeedId,
    /// 1-indexed position in the feed
    pub sequence: u64,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    pub content: JsonValue,
    pub signature: Signature,
}

impl Serialize for Message {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Message", 7)?;
        self.fields().serialize_into(&mut state)?;
        state.serialize_field("signature", &self.signature)?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for Message {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = WireMessage::deserialize(deserializer)?;
        wire.try_into().map_err(serde::de::Error::custom)
    }
}

/// Strict wire shape; unknown fields are rejected rather than dropped
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub(super) struct WireMessage {
    previous: Option<MessageKey>,
    author: FeedId,
    sequence: u64,
    timestamp: i64,
    hash: String,
    content: JsonValue,
    signature: Signature,
}

impl TryFrom<WireMessage> for Message {
    type Error = DecodeError;

    fn try_from(wire: WireMessage) -> Result<Self, Self::Error> {
        if wire.sequence == 0 {
            return Err(DecodeError::Field {
                field: "sequence",
                reason: "must be positive (1-indexed)".to_string(),
            });
        }

        if wire.hash != HASH_ALGORITHM {
            return Err(DecodeError::Field {
                field: "hash",
                reason: format!("expected '{}', got '{}'", HASH_ALGORITHM, wire.hash),
            });
        }

        validate_content(&wire.content).map_err(|reason| DecodeError::Field {
            field: "content",
            reason,
        })?;

        Ok(Message {
            previous: wire.previous,
            author: wire.author,
            sequence: wire.sequence,
            timestamp: wire.timestamp,
            content: wire.content,
            signature: wire.signature,
        })
    }
}

impl Message {
    /// Build and sign a message with `identity`
    pub(crate) fn sign(
        identity: &Identity,
        previous: Option<MessageKey>,
        sequence: u64,
        timestamp: i64,
        mut content: JsonValue,
    ) -> Result<Self, crate::error::CryptoError> {
        codec::normalize_numbers(&mut content);
        let author = *identity.id();
        let signable = codec::canonicalize(&MessageFields {
            previous: previous.as_ref(),
            author: &author,
            sequence,
            timestamp,
            content: &content,
        });
        let signature = identity.sign(&signable)?;

        Ok(Self {
            previous,
            author,
            sequence,
            timestamp,
            content,
            signature,
        })
    }

    /// Parse a message from its JSON wire encoding
    pub fn parse(bytes: &[u8]) -> Result<Self, DecodeError> {
        codec::decode(bytes)
    }

    /// The signable subset of this message
    pub fn fields(&self) -> MessageFields<'_> {
        MessageFields {
            previous: self.previous.as_ref(),
            author: &self.author,
            sequence: self.sequence,
            timestamp: self.timestamp,
            content: &self.content,
        }
    }

    /// Wire encoding, signature included
    pub fn to_bytes(&self) -> Vec<u8> {
        codec::encode(self)
    }

    /// Content address of this message
    pub fn key(&self) -> MessageKey {
        codec::hash(&self.to_bytes())
    }

    /// Whether the signature verifies against the author's key
    pub fn verify_signature(&self) -> bool {
        Identity::verify(
            &codec::canonicalize(&self.fields()),
            &self.signature,
            &self.author,
        )
    }
}
