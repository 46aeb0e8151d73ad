//! Append-only, hash-chained feeds
//!
//! - [`message`]: the signed message type and its sigil-encoded key
//! - [`codec`]: canonical JSON encoding, hashing and decoding
//! - [`chain`]: per-feed linkage validation
//! - [`store`]: storage seam and an in-memory implementation
//! - [`log`]: a feed bound to a store, safe to share between tasks

pub mod chain;
pub mod codec;
pub mod log;
pub mod message;
pub mod store;


pub use chain::{verify_chain, Feed};
pub use log::FeedLog;
pub use message::{now_millis, Message, MessageFields, MessageKey, HASH_ALGORITHM};
pub use store::{FeedStore, MemoryFeedStore};
