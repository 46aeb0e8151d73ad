//! Persistence seam for feeds
//!
//! [`FeedStore`] is the only thing [`FeedLog`](super::FeedLog) needs from a
//! storage backend. Stores are append-only: they never validate chains
//! themselves, but they refuse to overwrite a sequence slot that is already
//! taken.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use super::message::{Message, MessageKey};
use crate::error::StoreError;
use crate::identity::FeedId;

#[async_trait]
pub trait FeedStore: Send + Sync + std::fmt::Debug + 'static {
    /// The latest message stored for `author`, if any
    async fn load_latest(&self, author: &FeedId) -> Result<Option<Message>, StoreError>;

    /// Persist an already-validated message under `key`
    ///
    /// Must fail with [`StoreError::Conflict`] if the author already has a
    /// message at this sequence number, or if the message does not directly
    /// follow the stored head.
    async fn store(&self, key: MessageKey, message: &Message) -> Result<(), StoreError>;

    /// Look up a message by its key
    async fn get(&self, key: &MessageKey) -> Result<Option<Message>, StoreError>;

    /// Messages of `author` with sequence >= `from_sequence`, in order
    async fn history(&self, author: &FeedId, from_sequence: u64)
        -> Result<Vec<Message>, StoreError>;
}

/// In-memory feed store using HashMaps
#[derive(Debug, Clone, Default)]
pub struct MemoryFeedStore {
    inner: Arc<RwLock<MemoryFeedStoreInner>>,
}

#[derive(Debug, Default)]
struct MemoryFeedStoreInner {
    /// key -> message
    messages: HashMap<MessageKey, Message>,
    /// author -> keys ordered by sequence (index 0 is sequence 1)
    feeds: HashMap<FeedId, Vec<MessageKey>>,
}

fn poisoned<E: std::fmt::Display>(e: E) -> StoreError {
    StoreError::Backend(format!("failed to acquire lock: {}", e))
}

impl MemoryFeedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of messages held across all feeds
    pub fn len(&self) -> usize {
        self.inner.read().map(|inner| inner.messages.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl FeedStore for MemoryFeedStore {
    async fn load_latest(&self, author: &FeedId) -> Result<Option<Message>, StoreError> {
        let inner = self.inner.read().map_err(poisoned)?;
        Ok(inner
            .feeds
            .get(author)
            .and_then(|keys| keys.last())
            .and_then(|key| inner.messages.get(key))
            .cloned())
    }

    async fn store(&self, key: MessageKey, message: &Message) -> Result<(), StoreError> {
        let mut inner = self.inner.write().map_err(poisoned)?;

        let height = inner.feeds.get(&message.author).map_or(0, Vec::len) as u64;
        if message.sequence <= height {
            return Err(StoreError::Conflict(format!(
                "{} already has a message at sequence {}",
                message.author, message.sequence
            )));
        }
        if message.sequence != height + 1 {
            return Err(StoreError::Conflict(format!(
                "{} is at sequence {}, cannot store sequence {}",
                message.author, height, message.sequence
            )));
        }

        inner
            .feeds
            .entry(message.author)
            .or_default()
            .push(key);
        inner.messages.insert(key, message.clone());
        Ok(())
    }

    async fn get(&self, key: &MessageKey) -> Result<Option<Message>, StoreError> {
        let inner = self.inner.read().map_err(poisoned)?;
        Ok(inner.messages.get(key).cloned())
    }

    async fn history(
        &self,
        author: &FeedId,
        from_sequence: u64,
    ) -> Result<Vec<Message>, StoreError> {
        let inner = self.inner.read().map_err(poisoned)?;
        let Some(keys) = inner.feeds.get(author) else {
            return Ok(Vec::new());
        };

        let skip = from_sequence.saturating_sub(1) as usize;
        Ok(keys
            .iter()
            .skip(skip)
            .filter_map(|key| inner.messages.get(key).cloned())
            .collect())
    }
}
