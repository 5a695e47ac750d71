// In-flight outgoing messages, keyed by header hash

use crate::fmsg::error::{FmsgError, Result};
use crate::fmsg::hash::HeaderHash;
use crate::fmsg::message::Message;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

/// Concurrent registry of messages currently being sent.
///
/// Keys are hash values, so two separately built hashes with the same
/// bytes find the same entry.
#[derive(Debug, Clone, Default)]
pub struct OutgoingRegistry {
    messages: Arc<DashMap<HeaderHash, Arc<Message>>>,
}

impl OutgoingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a message; the entry lives until the returned guard is dropped.
    ///
    /// A message whose header is byte-identical to one already in flight is
    /// refused, since challenges could not tell the two apart.
    pub fn register(&self, hash: HeaderHash, message: Arc<Message>) -> Result<OutgoingEntry> {
        match self.messages.entry(hash) {
            Entry::Occupied(_) => Err(FmsgError::InvalidOperation(format!(
                "a message with header {} is already being sent",
                hash.short()
            ))),
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&message));
                Ok(OutgoingEntry {
                    registry: self.clone(),
                    hash,
                    message,
                })
            }
        }
    }

    pub fn get(&self, hash: &HeaderHash) -> Option<Arc<Message>> {
        self.messages.get(hash).map(|entry| Arc::clone(entry.value()))
    }

    pub fn remove(&self, hash: &HeaderHash) -> Option<Arc<Message>> {
        self.messages.remove(hash).map(|(_, message)| message)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Removes its registry entry when dropped, whatever the send outcome
#[derive(Debug)]
pub struct OutgoingEntry {
    registry: OutgoingRegistry,
    hash: HeaderHash,
    message: Arc<Message>,
}

impl OutgoingEntry {
    pub fn hash(&self) -> HeaderHash {
        self.hash
    }
}

impl Drop for OutgoingEntry {
    fn drop(&mut self) {
        // Only our own message; the key may have been reused since
        self.registry
            .messages
            .remove_if(&self.hash, |_, message| Arc::ptr_eq(message, &self.message));
    }
}
