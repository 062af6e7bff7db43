use std::sync::Arc;

use crate::auth::{Directory, User, UserId};

use super::{
    msg::{ChatRequest, ServerFrame},
    registry::{ConnectionId, ConnectionRegistry, Delivery, QueueHandle},
    store::MessageStore,
    RelayError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    RecipientOffline,
    UnknownRecipient,
    /// the sender id does not resolve; nothing is stored
    UnknownSender,
}

/// The routing core shared by every connection. Cloning is cheap.
#[derive(Clone)]
pub struct Relay {
    directory: Arc<dyn Directory>,
    store: Arc<MessageStore>,
    registry: Arc<ConnectionRegistry>,
}

impl Relay {
    pub fn new(directory: Arc<dyn Directory>) -> Self {
        Self {
            directory,
            store: Arc::new(MessageStore::new()),
            registry: Arc::new(ConnectionRegistry::new()),
        }
    }

    pub fn directory(&self) -> &dyn Directory {
        &*self.directory
    }

    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn authenticate(&self, token: &str) -> Result<User, RelayError> {
        self.directory
            .resolve(token)
            .and_then(|id| self.directory.by_id(id))
            .ok_or(RelayError::Unauthorized)
    }

    pub fn on_connect(&self, user: &User) -> QueueHandle {
        self.registry.register(user.id)
    }

    /// Turns one inbound text frame into the acknowledgement for its sender.
    pub fn on_frame(&self, sender: &User, raw: &str) -> ServerFrame {
        let request = match ChatRequest::parse(raw) {
            Ok(request) => request,
            Err(err) => {
                tracing::debug!(user_id = %sender.id, error = ?err, "rejected inbound frame");
                return ServerFrame::error(err.to_string());
            }
        };

        let (outcome, recipient) = self.deliver(sender, request.to, request.content);
        match (outcome, recipient) {
            (DeliveryOutcome::Delivered, Some(recipient)) => ServerFrame::sent(&recipient.username),
            (DeliveryOutcome::RecipientOffline, Some(recipient)) => ServerFrame::undelivered(&recipient.username, recipient.id),
            _ => ServerFrame::error(RelayError::UnknownRecipient(request.to).to_string()),
        }
    }

    pub fn on_disconnect(&self, user_id: UserId, id: ConnectionId) {
        self.registry.unregister(user_id, id);
    }

    pub fn route(&self, sender_id: UserId, recipient_id: UserId, text: impl Into<String>) -> DeliveryOutcome {
        let Some(sender) = self.directory.by_id(sender_id) else {
            tracing::warn!(from = %sender_id, to = %recipient_id, "unknown sender");
            return DeliveryOutcome::UnknownSender;
        };
        self.deliver(&sender, recipient_id, text.into()).0
    }

    fn deliver(&self, sender: &User, recipient_id: UserId, text: String) -> (DeliveryOutcome, Option<User>) {
        let Some(recipient) = self.directory.by_id(recipient_id) else {
            tracing::info!(from = %sender.id, to = %recipient_id, "unknown recipient");
            return (DeliveryOutcome::UnknownRecipient, None);
        };

        let message = self.store.append(sender.id, recipient.id, text);

        let delivered = self.registry.lookup(recipient.id).is_some_and(|outbox| {
            outbox.push(Delivery {
                from: sender.username.clone(),
                to: recipient.username.clone(),
                message,
            })
        });

        let outcome = if delivered {
            DeliveryOutcome::Delivered
        } else {
            DeliveryOutcome::RecipientOffline
        };
        tracing::debug!(from = %sender.id, to = %recipient.id, ?outcome, "routed");

        (outcome, Some(recipient))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{auth::MemoryDirectory, chat::msg::FrameType};

    fn relay_with_users() -> (Relay, User, User) {
        let directory = Arc::new(MemoryDirectory::new());
        let alice = directory.register("alice", "alice@example.com", "secret1").unwrap();
        let bob = directory.register("bob", "bob@example.com", "secret2").unwrap();
        (Relay::new(directory), alice, bob)
    }

    #[tokio::test]
    async fn online_recipient_gets_message_and_history_keeps_it() {
        let (relay, alice, bob) = relay_with_users();
        let mut bob_handle = relay.on_connect(&bob);

        assert_eq!(relay.route(alice.id, bob.id, "hi"), DeliveryOutcome::Delivered);
        assert_eq!(relay.route(alice.id, bob.id, "again"), DeliveryOutcome::Delivered);

        let first = bob_handle.inbox.next().await.unwrap();
        assert_eq!(first.from, "alice");
        assert_eq!(first.message.content, "hi");
        assert_eq!(bob_handle.inbox.next().await.unwrap().message.content, "again");

        let history = relay.store().between(alice.id, bob.id);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "hi");
    }

    #[tokio::test]
    async fn offline_recipient_still_gets_history() {
        let (relay, alice, bob) = relay_with_users();

        assert_eq!(relay.route(alice.id, bob.id, "are you there"), DeliveryOutcome::RecipientOffline);

        let history = relay.store().between(bob.id, alice.id);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "are you there");
    }

    #[tokio::test]
    async fn unknown_recipient_is_not_persisted() {
        let (relay, alice, _bob) = relay_with_users();

        assert_eq!(relay.route(alice.id, UserId(999), "hello?"), DeliveryOutcome::UnknownRecipient);
        assert!(relay.store().between(alice.id, UserId(999)).is_empty());

        let ack = relay.on_frame(&alice, r#"{"to": "999", "content": "hello?"}"#);
        assert_eq!(ack.kind, FrameType::Error);
        assert_eq!(ack.content, "User not found");
        assert!(relay.store().between(alice.id, UserId(999)).is_empty());
    }

    #[tokio::test]
    async fn unknown_sender_is_refused() {
        let (relay, _alice, bob) = relay_with_users();
        let mut bob_handle = relay.on_connect(&bob);

        assert_eq!(relay.route(UserId(42), bob.id, "spoofed"), DeliveryOutcome::UnknownSender);
        assert!(relay.store().between(UserId(42), bob.id).is_empty());

        let nothing = tokio::time::timeout(Duration::from_millis(50), bob_handle.inbox.next()).await;
        assert!(nothing.is_err());
    }

    #[tokio::test]
    async fn on_frame_acknowledges_each_outcome() {
        let (relay, alice, bob) = relay_with_users();

        let offline = relay.on_frame(&alice, r#"{"to": 2, "content": "ping"}"#);
        assert_eq!(offline.kind, FrameType::MessageUndelivered);
        assert_eq!(offline.to.as_deref(), Some("bob"));

        let _bob_handle = relay.on_connect(&bob);
        let sent = relay.on_frame(&alice, r#"{"to": 2, "content": "ping"}"#);
        assert_eq!(sent.kind, FrameType::MessageSent);
        assert_eq!(sent.content, "Message delivered");

        let malformed = relay.on_frame(&alice, "{oops");
        assert_eq!(malformed.kind, FrameType::Error);
        assert_eq!(malformed.content, "Invalid message format");
    }

    #[tokio::test]
    async fn disconnect_takes_user_offline() {
        let (relay, alice, bob) = relay_with_users();
        let alice_handle = relay.on_connect(&alice);
        assert!(relay.registry().online_users().contains(&alice.id));

        relay.on_disconnect(alice.id, alice_handle.id);

        assert!(!relay.registry().online_users().contains(&alice.id));
        assert_eq!(relay.route(bob.id, alice.id, "bye"), DeliveryOutcome::RecipientOffline);
        assert_eq!(relay.store().between(alice.id, bob.id).len(), 1);
    }

    #[tokio::test]
    async fn reconnect_routes_to_newest_connection() {
        let (relay, alice, bob) = relay_with_users();
        let mut old = relay.on_connect(&bob);
        let mut new = relay.on_connect(&bob);

        assert_eq!(relay.route(alice.id, bob.id, "hi"), DeliveryOutcome::Delivered);

        assert!(old.inbox.next().await.is_none());
        let delivered = tokio::time::timeout(Duration::from_secs(1), new.inbox.next()).await.unwrap();
        assert_eq!(delivered.unwrap().message.content, "hi");
    }

    #[test]
    fn authenticate_resolves_tokens() {
        let directory = Arc::new(MemoryDirectory::new());
        let alice = directory.register("alice", "alice@example.com", "secret1").unwrap();
        let (token, _) = directory.login("alice", "secret1").unwrap();
        let relay = Relay::new(directory);

        assert_eq!(relay.authenticate(&token.0).unwrap().id, alice.id);
        assert!(matches!(relay.authenticate("bogus"), Err(RelayError::Unauthorized)));
    }
}
