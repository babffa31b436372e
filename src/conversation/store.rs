//! Process-wide conversation store with a bounded, idle-expiring eviction policy.
//!
//! Entries are created on a conversation's first successful turn and
//! overwritten after each later one (last write wins). Distinct identifiers
//! may be read and written concurrently; serialising turns for the same
//! identifier is the caller's job.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{Conversation, ConversationId};

/// Limits applied to the store on every write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EvictionPolicy {
    /// Keep at most this many conversations, evicting least recently used
    pub max_conversations: Option<usize>,
    /// Drop conversations untouched for longer than this
    pub idle_ttl: Option<Duration>,
}

impl EvictionPolicy {
    /// Retain everything until process exit.
    pub fn unbounded() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone)]
struct StoredConversation {
    conversation: Conversation,
    last_access: Instant,
}

/// Keyed mapping from conversation identifier to dialogue state.
#[derive(Debug, Clone)]
pub struct ConversationStore {
    entries: Arc<RwLock<HashMap<ConversationId, StoredConversation>>>,
    policy: EvictionPolicy,
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new(EvictionPolicy::default())
    }
}

impl ConversationStore {
    /// Create an empty store with the given eviction policy.
    pub fn new(policy: EvictionPolicy) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            policy,
        }
    }

    /// Active eviction policy
    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    /// Fetch a conversation, refreshing its recency. Expired entries are
    /// removed and reported as absent.
    pub fn get(&self, id: &ConversationId) -> Option<Conversation> {
        let mut entries = self.entries.write();
        let now = Instant::now();

        let expired = entries
            .get(id)
            .map(|entry| self.is_expired(entry, now))?;
        if expired {
            entries.remove(id);
            tracing::debug!(conversation = %id, "conversation expired");
            return None;
        }

        entries.get_mut(id).map(|entry| {
            entry.last_access = now;
            entry.conversation.clone()
        })
    }

    /// Read without touching recency or expiring.
    pub fn peek(&self, id: &ConversationId) -> Option<Conversation> {
        self.entries
            .read()
            .get(id)
            .map(|entry| entry.conversation.clone())
    }

    /// Store a conversation, then apply the eviction policy.
    pub fn put(&self, id: ConversationId, conversation: Conversation) {
        let mut entries = self.entries.write();
        let now = Instant::now();
        entries.insert(
            id.clone(),
            StoredConversation {
                conversation,
                last_access: now,
            },
        );

        if self.policy.idle_ttl.is_some() {
            entries.retain(|key, entry| key == &id || !self.is_expired(entry, now));
        }

        if let Some(max) = self.policy.max_conversations {
            while entries.len() > max.max(1) {
                let oldest = entries
                    .iter()
                    .filter(|(key, _)| *key != &id)
                    .min_by_key(|(_, entry)| entry.last_access)
                    .map(|(key, _)| key.clone());
                match oldest {
                    Some(key) => {
                        entries.remove(&key);
                        tracing::debug!(
                            conversation = %key,
                            "evicted least recently used conversation"
                        );
                    }
                    None => break,
                }
            }
        }
    }

    /// Drop a conversation explicitly.
    pub fn remove(&self, id: &ConversationId) -> Option<Conversation> {
        self.entries
            .write()
            .remove(id)
            .map(|entry| entry.conversation)
    }

    /// Whether an identifier is currently stored (expiry not applied).
    pub fn contains(&self, id: &ConversationId) -> bool {
        self.entries.read().contains_key(id)
    }

    /// Number of stored conversations
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// List stored identifiers in sorted order.
    pub fn ids(&self) -> Vec<ConversationId> {
        let mut ids: Vec<_> = self.entries.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    fn is_expired(&self, entry: &StoredConversation, now: Instant) -> bool {
        match self.policy.idle_ttl {
            Some(ttl) => now.saturating_duration_since(entry.last_access) > ttl,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::Message;

    fn conversation(text: &str) -> Conversation {
        let mut conversation = Conversation::new("system");
        conversation.messages.push(Message::user(text));
        conversation
    }

    #[test]
    fn put_then_get_returns_latest_write() {
        let store = ConversationStore::default();
        let id = ConversationId::new();

        store.put(id.clone(), conversation("first"));
        store.put(id.clone(), conversation("second"));

        let stored = store.get(&id).unwrap();
        assert_eq!(stored.messages[1].content, "second");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn missing_ids_are_absent() {
        let store = ConversationStore::default();
        assert!(store.get(&ConversationId::from_string("nope")).is_none());
    }

    #[test]
    fn capacity_evicts_least_recently_used() {
        let store = ConversationStore::new(EvictionPolicy {
            max_conversations: Some(2),
            idle_ttl: None,
        });
        let a = ConversationId::from_string("a");
        let b = ConversationId::from_string("b");
        let c = ConversationId::from_string("c");

        store.put(a.clone(), conversation("a"));
        std::thread::sleep(Duration::from_millis(2));
        store.put(b.clone(), conversation("b"));
        std::thread::sleep(Duration::from_millis(2));
        // Touch `a` so `b` becomes the oldest.
        assert!(store.get(&a).is_some());
        std::thread::sleep(Duration::from_millis(2));
        store.put(c.clone(), conversation("c"));

        assert_eq!(store.len(), 2);
        assert!(store.contains(&a));
        assert!(!store.contains(&b));
        assert!(store.contains(&c));
    }

    #[test]
    fn idle_entries_expire() {
        let store = ConversationStore::new(EvictionPolicy {
            max_conversations: None,
            idle_ttl: Some(Duration::from_millis(1)),
        });
        let id = ConversationId::new();
        store.put(id.clone(), conversation("hello"));
        std::thread::sleep(Duration::from_millis(10));

        assert!(store.get(&id).is_none());
        assert!(store.is_empty());
    }
}
