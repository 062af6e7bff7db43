use axum::{debug_handler, extract::{ws::{CloseFrame, Message, WebSocket}, Query, State, WebSocketUpgrade}, response::IntoResponse};
use futures_util::{future, SinkExt, StreamExt};
use serde::Deserialize;

use super::{session::{self, Frame, CLOSE_NORMAL}, Relay};

#[derive(Deserialize)]
pub(crate) struct WsQuery {
    token: Option<String>,
}

impl From<Frame> for Message {
    fn from(frame: Frame) -> Self {
        match frame {
            Frame::Text(text) => Message::Text(text.into()),
            Frame::Binary(bytes) => Message::Binary(bytes.into()),
            Frame::Close { code, reason } => Message::Close(Some(CloseFrame {
                code,
                reason: reason.into(),
            })),
        }
    }
}

/// Pings and pongs are answered by axum itself; everything else becomes a
/// `Frame`. Binary payloads pass through untouched and are decoded by the
/// session, which answers invalid UTF-8 with a malformed-frame reply.
fn to_frame(message: Message) -> Option<Frame> {
    match message {
        Message::Text(text) => Some(Frame::Text(text.as_str().to_owned())),
        Message::Binary(bytes) => Some(Frame::Binary(bytes.to_vec())),
        Message::Close(frame) => Some(match frame {
            Some(CloseFrame { code, reason }) => Frame::Close { code, reason: reason.as_str().to_owned() },
            None => Frame::Close { code: CLOSE_NORMAL, reason: String::new() },
        }),
        Message::Ping(_) | Message::Pong(_) => None,
    }
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn chat_ws(
    State(relay): State<Relay>,
    Query(WsQuery { token }): Query<WsQuery>,

    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket: WebSocket| async move {
        let (sender, receiver) = socket.split();

        let sink = sender.with(|frame: Frame| future::ready(Ok::<_, axum::Error>(Message::from(frame))));
        let stream = receiver.filter_map(|message| {
            future::ready(match message {
                Ok(message) => to_frame(message).map(Ok),
                Err(e) => Some(Err(e)),
            })
        });

        let _ = session::accept(relay, token.as_deref().unwrap_or_default(), sink, stream).await;
    })
}
