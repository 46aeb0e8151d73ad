//! Hash-chain validation for a single feed
//!
//! [`Feed`] tracks the head of one author's log and enforces the linkage
//! rules for every message appended to it. Mutation goes through `&mut self`,
//! so a feed has exactly one writer at a time.

use serde_json::Value as JsonValue;

use super::message::{validate_content, Message, MessageKey};
use crate::error::{CryptoError, FeedError};
use crate::identity::{FeedId, Identity};

#[derive(Debug, Clone)]
struct Head {
    message: Message,
    key: MessageKey,
}

/// The head of one author's append-only log
#[derive(Debug, Clone)]
pub struct Feed {
    author: FeedId,
    latest: Option<Head>,
}

impl Feed {
    /// An empty feed for `author`
    pub fn new(author: FeedId) -> Self {
        Self {
            author,
            latest: None,
        }
    }

    /// Resume a feed from its latest message
    ///
    /// The message is trusted as-is (it is assumed to come from our own
    /// store); only its author is checked.
    pub fn resume(author: FeedId, latest: Option<Message>) -> Result<Self, FeedError> {
        let latest = match latest {
            Some(message) if message.author != author => {
                return Err(FeedError::AuthorMismatch {
                    expected: author,
                    found: message.author,
                });
            }
            Some(message) => Some(Head {
                key: message.key(),
                message,
            }),
            None => None,
        };
        Ok(Self { author, latest })
    }

    /// Validate a complete feed from sequence 1, returning its final state
    pub fn replay<I>(author: FeedId, messages: I) -> Result<Self, FeedError>
    where
        I: IntoIterator<Item = Message>,
    {
        let mut feed = Self::new(author);
        for message in messages {
            feed.validate_and_append(message)?;
        }
        Ok(feed)
    }

    pub fn author(&self) -> &FeedId {
        &self.author
    }

    pub fn latest(&self) -> Option<&Message> {
        self.latest.as_ref().map(|head| &head.message)
    }

    pub fn latest_key(&self) -> Option<&MessageKey> {
        self.latest.as_ref().map(|head| &head.key)
    }

    /// Sequence number of the latest message, 0 for an empty feed
    pub fn sequence(&self) -> u64 {
        self.latest().map_or(0, |message| message.sequence)
    }

    pub fn is_empty(&self) -> bool {
        self.latest.is_none()
    }

    /// Sign and append a new message authored by `identity`
    pub fn append(
        &mut self,
        content: JsonValue,
        identity: &Identity,
        timestamp: i64,
    ) -> Result<Message, FeedError> {
        let (message, key) = self.prepare_append(content, identity, timestamp)?;
        self.commit(message.clone(), key);
        Ok(message)
    }

    /// Append a message signed elsewhere, after checking it links onto our head
    ///
    /// On error the feed is left unchanged.
    pub fn validate_and_append(&mut self, message: Message) -> Result<(), FeedError> {
        let key = self.check(&message)?;
        self.commit(message, key);
        Ok(())
    }

    /// Build the next message without advancing the head
    pub(crate) fn prepare_append(
        &self,
        content: JsonValue,
        identity: &Identity,
        timestamp: i64,
    ) -> Result<(Message, MessageKey), FeedError> {
        if identity.id() != &self.author {
            return Err(FeedError::AuthorMismatch {
                expected: self.author,
                found: *identity.id(),
            });
        }
        if !identity.has_private_key() {
            return Err(FeedError::MissingPrivateKey);
        }
        validate_content(&content).map_err(FeedError::InvalidContent)?;

        if let Some(latest) = self.latest() {
            if timestamp <= latest.timestamp {
                return Err(FeedError::ClockError {
                    previous: latest.timestamp,
                    found: timestamp,
                });
            }
        }

        let message = Message::sign(
            identity,
            self.latest_key().copied(),
            self.sequence() + 1,
            timestamp,
            content,
        )
        .map_err(|e| match e {
            CryptoError::MissingPrivateKey => FeedError::MissingPrivateKey,
            _ => FeedError::InvalidSignature {
                sequence: self.sequence() + 1,
            },
        })?;
        let key = message.key();
        Ok((message, key))
    }

    /// Run every linkage check against the current head
    ///
    /// Checks run in a fixed order so the reported error is deterministic:
    /// author, sequence, previous, timestamp, signature.
    pub(crate) fn check(&self, message: &Message) -> Result<MessageKey, FeedError> {
        if message.author != self.author {
            return Err(FeedError::AuthorMismatch {
                expected: self.author,
                found: message.author,
            });
        }

        let expected_sequence = self.sequence() + 1;
        if message.sequence != expected_sequence {
            return Err(FeedError::SequenceGap {
                expected: expected_sequence,
                found: message.sequence,
            });
        }

        let expected_previous = self.latest_key().copied();
        if message.previous != expected_previous {
            return Err(FeedError::BrokenChain {
                expected: expected_previous,
                found: message.previous,
            });
        }

        if let Some(latest) = self.latest() {
            if message.timestamp <= latest.timestamp {
                return Err(FeedError::ClockError {
                    previous: latest.timestamp,
                    found: message.timestamp,
                });
            }
        }

        if !message.verify_signature() {
            return Err(FeedError::InvalidSignature {
                sequence: message.sequence,
            });
        }

        Ok(message.key())
    }

    pub(crate) fn commit(&mut self, message: Message, key: MessageKey) {
        tracing::debug!(
            "Feed {} advanced to sequence {} ({})",
            self.author,
            message.sequence,
            key
        );
        self.latest = Some(Head { message, key });
    }
}

/// Validate an entire feed received from a peer, starting at sequence 1
pub fn verify_chain(author: &FeedId, messages: &[Message]) -> Result<(), FeedError> {
    Feed::replay(*author, messages.iter().cloned()).map(|_| ())
}
