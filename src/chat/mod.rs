mod history;
mod msg;
mod registry;
mod relay;
mod session;
mod store;
mod ws;

use axum::{routing::get, Router};
use thiserror::Error;

use crate::{auth::UserId, AppState};

pub use msg::{ChatRequest, FrameType, ServerFrame};
pub use registry::{ConnectionId, ConnectionRegistry, Delivery, Inbox, Outbox, QueueHandle};
pub use relay::{DeliveryOutcome, Relay};
pub use session::{accept, run, Frame, SessionEnd, CLOSE_NORMAL, CLOSE_POLICY_VIOLATION, CLOSE_SUPERSEDED};
pub use store::{DeliveryState, Message, MessageStore};

/// Everything that can go wrong between a socket and the relay. Only
/// `Unauthorized` and `TransportFailure` end a session.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Unauthorized")]
    Unauthorized,
    #[error("User not found")]
    UnknownRecipient(UserId),
    #[error("Invalid message format")]
    MalformedFrame(String),
    #[error("User is offline")]
    RecipientOffline(UserId),
    #[error("transport failure: {0}")]
    TransportFailure(String),
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/ws", get(ws::chat_ws))
        .route("/users", get(history::roster))
        .route("/history/{peer_id}", get(history::history))
}
