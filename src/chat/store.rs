use std::{collections::HashMap, sync::Mutex};

use serde::Serialize;
use uuid::Uuid;

use crate::auth::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    Sent,
}

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub id: Uuid,
    pub sender_id: UserId,
    pub recipient_id: UserId,
    pub content: String,
    /// unix millis
    pub timestamp: i64,
    pub state: DeliveryState,
}

/// Unordered pair key so both directions of a conversation share one log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct Conversation(UserId, UserId);

impl Conversation {
    fn of(a: UserId, b: UserId) -> Self {
        if a <= b { Self(a, b) } else { Self(b, a) }
    }
}

#[derive(Default)]
struct Log {
    last_timestamp: i64,
    conversations: HashMap<Conversation, Vec<Message>>,
}

/// Append-only message history, kept in process memory.
#[derive(Default)]
pub struct MessageStore {
    log: Mutex<Log>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, sender_id: UserId, recipient_id: UserId, content: impl Into<String>) -> Message {
        let mut log = self.log.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        // wall clock can step backwards; history must not
        let timestamp = now_millis().max(log.last_timestamp);
        log.last_timestamp = timestamp;

        let message = Message {
            id: Uuid::now_v7(),
            sender_id,
            recipient_id,
            content: content.into(),
            timestamp,
            state: DeliveryState::Sent,
        };
        log.conversations
            .entry(Conversation::of(sender_id, recipient_id))
            .or_default()
            .push(message.clone());

        message
    }

    /// Both directions between `a` and `b`, oldest first.
    pub fn between(&self, a: UserId, b: UserId) -> Vec<Message> {
        let log = self.log.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut messages = log
            .conversations
            .get(&Conversation::of(a, b))
            .cloned()
            .unwrap_or_default();
        drop(log);

        // stable, so equal timestamps keep insertion order
        messages.sort_by_key(|m| m.timestamp);
        messages
    }
}

pub(crate) fn now_millis() -> i64 {
    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn between_is_symmetric_and_ordered() {
        let store = MessageStore::new();
        let (alice, bob, carol) = (UserId(1), UserId(2), UserId(3));

        store.append(alice, bob, "hi bob");
        store.append(bob, alice, "hi alice");
        store.append(alice, carol, "hi carol");
        store.append(alice, bob, "how are you");

        let forward: Vec<_> = store.between(alice, bob).into_iter().map(|m| m.content).collect();
        let backward: Vec<_> = store.between(bob, alice).into_iter().map(|m| m.content).collect();

        assert_eq!(forward, vec!["hi bob", "hi alice", "how are you"]);
        assert_eq!(forward, backward);
        assert_eq!(store.between(alice, carol).len(), 1);
        assert!(store.between(bob, carol).is_empty());
    }

    #[test]
    fn timestamps_never_decrease_and_ties_keep_insertion_order() {
        let store = MessageStore::new();
        let (alice, bob) = (UserId(1), UserId(2));

        for i in 0..200 {
            store.append(alice, bob, format!("m{i}"));
        }

        let history = store.between(alice, bob);
        assert_eq!(history.len(), 200);
        for pair in history.windows(2) {
            assert!(pair[0].timestamp <= pair[1].timestamp);
        }
        let contents: Vec<_> = history.iter().map(|m| m.content.clone()).collect();
        let expected: Vec<_> = (0..200).map(|i| format!("m{i}")).collect();
        assert_eq!(contents, expected);
    }

    #[test]
    fn appended_message_is_returned_as_stored() {
        let store = MessageStore::new();
        let message = store.append(UserId(1), UserId(2), "hello");

        assert_eq!(message.sender_id, UserId(1));
        assert_eq!(message.recipient_id, UserId(2));
        assert_eq!(message.state, DeliveryState::Sent);
        assert_eq!(store.between(UserId(2), UserId(1))[0].id, message.id);
    }

    #[test]
    fn message_to_self_is_its_own_conversation() {
        let store = MessageStore::new();
        store.append(UserId(1), UserId(1), "note to self");

        assert_eq!(store.between(UserId(1), UserId(1)).len(), 1);
        assert!(store.between(UserId(1), UserId(2)).is_empty());
    }
}
