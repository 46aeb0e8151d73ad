//! Error types for libscuttle

use thiserror::Error;

use crate::feed::MessageKey;
use crate::handshake::HandshakeState;
use crate::identity::FeedId;

pub type Result<T> = std::result::Result<T, ScuttleError>;

#[derive(Error, Debug)]
pub enum ScuttleError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Feed error: {0}")]
    Feed(#[from] FeedError),

    #[error("Handshake error: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("Box stream error: {0}")]
    BoxStream(#[from] BoxStreamError),

    #[error("Packet stream error: {0}")]
    Packet(#[from] PacketError),

    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification of failures
///
/// Every error the crate reports falls into exactly one of these buckets,
/// which callers use to decide between dropping a peer, rejecting data, or
/// retrying at the transport level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Signature, decryption or authentication failure
    Crypto,
    /// Malformed or out-of-sequence protocol data
    Protocol,
    /// Feed linkage violation
    Chain,
    /// I/O, storage or configuration failure
    Resource,
}

impl ScuttleError {
    /// Returns the taxonomy bucket for this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            ScuttleError::Crypto(_) => ErrorKind::Crypto,
            ScuttleError::Decode(_) => ErrorKind::Protocol,
            ScuttleError::Feed(e) => e.kind(),
            ScuttleError::Handshake(e) => e.kind(),
            ScuttleError::BoxStream(e) => e.kind(),
            ScuttleError::Packet(e) => e.kind(),
            ScuttleError::Rpc(e) => e.kind(),
            ScuttleError::Config(_) => ErrorKind::Resource,
            ScuttleError::Store(_) => ErrorKind::Resource,
            ScuttleError::Io(_) => ErrorKind::Resource,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Identity has no private key (verify-only)")]
    MissingPrivateKey,

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Signature verification failed")]
    InvalidSignature,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Malformed JSON: {0}")]
    Json(String),

    #[error("Invalid {kind} reference '{value}'")]
    Sigil { kind: &'static str, value: String },

    #[error("Invalid field '{field}': {reason}")]
    Field { field: &'static str, reason: String },

    #[error("Invalid secret: {0}")]
    Secret(String),

    #[error("Invalid multiserver address: {0}")]
    Address(String),
}

fn link(key: &Option<MessageKey>) -> String {
    match key {
        Some(key) => key.to_string(),
        None => "null".to_string(),
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeedError {
    #[error("Author mismatch: feed belongs to {expected}, got {found}")]
    AuthorMismatch { expected: FeedId, found: FeedId },

    #[error("Sequence gap: expected {expected}, got {found}")]
    SequenceGap { expected: u64, found: u64 },

    #[error("Broken chain: expected previous {}, got {}", link(.expected), link(.found))]
    BrokenChain {
        expected: Option<MessageKey>,
        found: Option<MessageKey>,
    },

    #[error("Clock error: timestamp {found} is not after previous timestamp {previous}")]
    ClockError { previous: i64, found: i64 },

    #[error("Invalid signature on message {sequence}")]
    InvalidSignature { sequence: u64 },

    #[error("Identity has no private key (verify-only)")]
    MissingPrivateKey,

    #[error("Invalid content: {0}")]
    InvalidContent(String),
}

impl FeedError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FeedError::InvalidSignature { .. } | FeedError::MissingPrivateKey => ErrorKind::Crypto,
            FeedError::InvalidContent(_) => ErrorKind::Protocol,
            _ => ErrorKind::Chain,
        }
    }
}

#[derive(Error, Debug)]
pub enum HandshakeError {
    #[error("Unknown network: peer hello was not keyed with our network key")]
    UnknownNetwork,

    #[error("Authentication failed")]
    AuthenticationFailed,

    #[error("Expected a {expected} byte handshake message, got {found}")]
    InvalidLength { expected: usize, found: usize },

    #[error("Handshake cannot advance from state {0:?}")]
    InvalidState(HandshakeState),

    #[error("Identity error: {0}")]
    Identity(#[from] CryptoError),

    #[error("IO error during handshake: {0}")]
    Io(#[from] std::io::Error),
}

impl HandshakeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HandshakeError::AuthenticationFailed | HandshakeError::Identity(_) => {
                ErrorKind::Crypto
            }
            HandshakeError::Io(_) => ErrorKind::Resource,
            _ => ErrorKind::Protocol,
        }
    }
}

#[derive(Error, Debug)]
pub enum BoxStreamError {
    #[error("Integrity failure: frame did not authenticate")]
    Integrity,

    #[error("Frame body of {0} bytes exceeds the maximum frame size")]
    FrameTooLarge(usize),

    #[error("Expected {expected} bytes of frame data, got {found}")]
    InvalidLength { expected: usize, found: usize },

    #[error("Stream ended in the middle of a read")]
    Truncated,

    #[error("Box stream is closed")]
    Closed,

    #[error("IO error on box stream: {0}")]
    Io(#[from] std::io::Error),
}

impl BoxStreamError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BoxStreamError::Integrity => ErrorKind::Crypto,
            BoxStreamError::Io(_) => ErrorKind::Resource,
            _ => ErrorKind::Protocol,
        }
    }
}

#[derive(Error, Debug)]
pub enum PacketError {
    #[error("Unknown body type {0}")]
    UnknownBodyType(u8),

    #[error("Packet body of {0} bytes exceeds the maximum body size")]
    BodyTooLarge(u32),

    #[error("Stream ended in the middle of a packet")]
    Truncated,

    #[error("Invalid packet body: {0}")]
    InvalidBody(String),

    #[error("Request number {0} cannot be answered")]
    InvalidRequest(i32),

    #[error(transparent)]
    BoxStream(#[from] BoxStreamError),
}

impl PacketError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PacketError::BoxStream(e) => e.kind(),
            _ => ErrorKind::Protocol,
        }
    }
}

#[derive(Error, Debug)]
pub enum RpcError {
    /// The peer answered with an error body
    #[error("Remote error: {0}")]
    Remote(String),

    #[error("Method {0} not found")]
    MethodNotFound(String),

    #[error("Invalid RPC request: {0}")]
    InvalidRequest(String),

    #[error("RPC connection closed")]
    Closed,

    #[error(transparent)]
    Packet(#[from] PacketError),
}

impl RpcError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RpcError::Packet(e) => e.kind(),
            RpcError::Closed => ErrorKind::Resource,
            _ => ErrorKind::Protocol,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Store conflict: {0}")]
    Conflict(String),

    #[error("Store backend error: {0}")]
    Backend(String),
}
