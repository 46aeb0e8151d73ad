//! A feed bound to a store
//!
//! [`FeedLog`] serializes appends to one feed behind an async mutex and
//! writes each accepted message to the store before advancing the in-memory
//! head. If the store write fails the head does not move.

use serde_json::Value as JsonValue;
use tokio::sync::Mutex;

use super::chain::Feed;
use super::message::{now_millis, Message, MessageKey};
use super::store::FeedStore;
use crate::error::Result;
use crate::identity::{FeedId, Identity};

#[derive(Debug)]
pub struct FeedLog<S: FeedStore> {
    store: S,
    feed: Mutex<Feed>,
}

impl<S: FeedStore> FeedLog<S> {
    /// Open the log for `author`, resuming from the store's latest message
    pub async fn open(store: S, author: FeedId) -> Result<Self> {
        let latest = store.load_latest(&author).await?;
        let feed = Feed::resume(author, latest)?;
        tracing::debug!(
            "Opened feed {} at sequence {}",
            feed.author(),
            feed.sequence()
        );
        Ok(Self {
            store,
            feed: Mutex::new(feed),
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn author(&self) -> FeedId {
        *self.feed.lock().await.author()
    }

    pub async fn sequence(&self) -> u64 {
        self.feed.lock().await.sequence()
    }

    pub async fn latest(&self) -> Option<Message> {
        self.feed.lock().await.latest().cloned()
    }

    /// Sign and append `content` with an explicit timestamp
    pub async fn append(
        &self,
        content: JsonValue,
        identity: &Identity,
        timestamp: i64,
    ) -> Result<Message> {
        let mut feed = self.feed.lock().await;
        let (message, key) = feed.prepare_append(content, identity, timestamp)?;
        self.store.store(key, &message).await?;
        feed.commit(message.clone(), key);
        tracing::info!("Published {} as {} #{}", key, message.author, message.sequence);
        Ok(message)
    }

    /// Sign and append `content` stamped with the current time
    ///
    /// If the wall clock has not moved past the previous message (or has gone
    /// backwards) the timestamp is bumped to one millisecond after it.
    pub async fn publish(&self, content: JsonValue, identity: &Identity) -> Result<Message> {
        let mut feed = self.feed.lock().await;
        let floor = feed.latest().map_or(i64::MIN, |m| m.timestamp.saturating_add(1));
        let timestamp = now_millis().max(floor);

        let (message, key) = feed.prepare_append(content, identity, timestamp)?;
        self.store.store(key, &message).await?;
        feed.commit(message.clone(), key);
        tracing::info!("Published {} as {} #{}", key, message.author, message.sequence);
        Ok(message)
    }

    /// Validate a message received from a peer and append it
    pub async fn ingest(&self, message: Message) -> Result<MessageKey> {
        let mut feed = self.feed.lock().await;
        let key = feed.check(&message).inspect_err(|e| {
            tracing::warn!(
                "Rejected message #{} for {}: {}",
                message.sequence,
                feed.author(),
                e
            );
        })?;
        self.store.store(key, &message).await?;
        feed.commit(message, key);
        Ok(key)
    }

    /// Ingest messages in order, stopping at the first failure
    ///
    /// Messages before the failing one stay appended. Returns the number of
    /// messages appended.
    pub async fn ingest_all<I>(&self, messages: I) -> Result<usize>
    where
        I: IntoIterator<Item = Message>,
    {
        let mut count = 0;
        for message in messages {
            self.ingest(message).await?;
            count += 1;
        }
        Ok(count)
    }

    /// Look up any stored message by key
    pub async fn get(&self, key: &MessageKey) -> Result<Option<Message>> {
        Ok(self.store.get(key).await?)
    }

    /// This feed's messages from `from_sequence` onward
    pub async fn history(&self, from_sequence: u64) -> Result<Vec<Message>> {
        let author = self.author().await;
        Ok(self.store.history(&author, from_sequence).await?)
    }

    /// Re-validate everything the store holds for this feed
    pub async fn verify(&self) -> Result<()> {
        let author = self.author().await;
        let messages = self.store.history(&author, 1).await?;
        Feed::replay(author, messages)?;
        Ok(())
    }
}
