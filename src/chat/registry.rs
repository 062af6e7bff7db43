use std::{collections::BTreeSet, fmt, sync::atomic::{AtomicU64, Ordering}};

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};

use crate::auth::UserId;

use super::store::Message;

/// One queued delivery: the stored message plus the sender's display name.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub from: String,
    pub to: String,
    pub message: Message,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

struct Entry {
    id: ConnectionId,
    queue: mpsc::UnboundedSender<Delivery>,
    revoke: oneshot::Sender<()>,
}

impl Entry {
    fn close(self) {
        // receiver may already be gone if the session died first
        let _ = self.revoke.send(());
    }
}

/// Producer end of a user's delivery queue, handed to the router by `lookup`.
#[derive(Clone)]
pub struct Outbox {
    pub id: ConnectionId,
    queue: mpsc::UnboundedSender<Delivery>,
}

impl Outbox {
    /// Never blocks. Fails only if the owning session has already let go of the queue.
    pub fn push(&self, delivery: Delivery) -> bool {
        self.queue.send(delivery).is_ok()
    }
}

/// Consumer end, drained only by the session that registered it.
pub struct Inbox {
    queue: mpsc::UnboundedReceiver<Delivery>,
    revoked: oneshot::Receiver<()>,
    closed: bool,
}

impl Inbox {
    /// Next delivery in FIFO order, or `None` once the entry has been evicted
    /// or unregistered.
    pub async fn next(&mut self) -> Option<Delivery> {
        if self.closed {
            return None;
        }

        let delivery = tokio::select! {
            biased;
            _ = &mut self.revoked => None,
            delivery = self.queue.recv() => delivery,
        };

        if delivery.is_none() {
            self.shut();
        }
        delivery
    }

    /// Refuses further pushes and discards whatever was still buffered. The
    /// discarded messages remain in the store.
    fn shut(&mut self) -> usize {
        self.closed = true;
        self.queue.close();

        let mut dropped = 0;
        while self.queue.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            tracing::debug!(dropped, "discarded buffered deliveries on close");
        }
        dropped
    }
}

/// What a session gets back from `register`.
pub struct QueueHandle {
    pub user_id: UserId,
    pub id: ConnectionId,
    pub inbox: Inbox,
}

/// Live user -> connection map. At most one entry per user; the newest
/// registration wins and the one it displaces is closed.
#[derive(Default)]
pub struct ConnectionRegistry {
    next_id: AtomicU64,
    entries: DashMap<UserId, Entry>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, user_id: UserId) -> QueueHandle {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let (revoke_tx, revoke_rx) = oneshot::channel();

        let entry = Entry {
            id,
            queue: queue_tx,
            revoke: revoke_tx,
        };

        // insert swaps under the shard lock, so there is never a moment with
        // two live entries for one user
        if let Some(old) = self.entries.insert(user_id, entry) {
            tracing::info!(user_id = %user_id, evicted = %old.id, replaced_by = %id, "connection superseded");
            old.close();
        }
        tracing::debug!(user_id = %user_id, connection = %id, "connection registered");

        QueueHandle {
            user_id,
            id,
            inbox: Inbox {
                queue: queue_rx,
                revoked: revoke_rx,
                closed: false,
            },
        }
    }

    pub fn lookup(&self, user_id: UserId) -> Option<Outbox> {
        self.entries.get(&user_id).map(|entry| Outbox {
            id: entry.id,
            queue: entry.queue.clone(),
        })
    }

    /// Removes the entry only if it still belongs to connection `id`.
    /// Returns whether anything was removed.
    pub fn unregister(&self, user_id: UserId, id: ConnectionId) -> bool {
        match self.entries.remove_if(&user_id, |_, entry| entry.id == id) {
            Some((_, entry)) => {
                entry.close();
                tracing::debug!(user_id = %user_id, connection = %id, "connection unregistered");
                true
            }
            None => {
                tracing::debug!(user_id = %user_id, connection = %id, "stale unregister ignored");
                false
            }
        }
    }

    pub fn is_online(&self, user_id: UserId) -> bool {
        self.entries.contains_key(&user_id)
    }

    pub fn online_users(&self) -> BTreeSet<UserId> {
        self.entries.iter().map(|entry| *entry.key()).collect()
    }
}
