use std::fmt;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;

use crate::auth::{User, UserId};

use super::{
    msg::ServerFrame,
    registry::{Inbox, QueueHandle},
    Relay, RelayError,
};

pub const CLOSE_NORMAL: u16 = 1000;
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;
pub const CLOSE_SUPERSEDED: u16 = 4000;

/// Transport-neutral frame. The websocket layer maps its own messages onto this.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    /// raw payload, decoded as UTF-8 by the inbound duty
    Binary(Vec<u8>),
    Close { code: u16, reason: String },
}

impl Frame {
    fn close(code: u16, reason: &str) -> Self {
        Frame::Close {
            code,
            reason: reason.to_owned(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// the peer closed or its stream ran out
    RemoteClosed,
    /// a newer connection for the same user took over
    Superseded,
}

/// Authenticates a fresh connection and, if the token is good, runs it until
/// it closes. A bad token gets a policy-violation close and nothing else.
pub async fn accept<Si, St, E>(relay: Relay, token: &str, mut sink: Si, stream: St) -> Result<SessionEnd, RelayError>
where
    Si: Sink<Frame> + Unpin + Send + 'static,
    Si::Error: fmt::Display,
    St: Stream<Item = Result<Frame, E>> + Unpin + Send + 'static,
    E: fmt::Display + Send + 'static,
{
    let user = match relay.authenticate(token) {
        Ok(user) => user,
        Err(err) => {
            tracing::warn!("websocket rejected: {err}");
            let _ = sink.send(Frame::close(CLOSE_POLICY_VIOLATION, &err.to_string())).await;
            let _ = sink.close().await;
            return Err(err);
        }
    };

    run(relay, user, sink, stream).await
}

/// Drives one authenticated connection: an outbound duty draining the user's
/// queue into `sink` and an inbound duty feeding `stream` to the relay. When
/// either finishes the other is aborted and the registry entry is released.
pub async fn run<Si, St, E>(relay: Relay, user: User, sink: Si, stream: St) -> Result<SessionEnd, RelayError>
where
    Si: Sink<Frame> + Unpin + Send + 'static,
    Si::Error: fmt::Display,
    St: Stream<Item = Result<Frame, E>> + Unpin + Send + 'static,
    E: fmt::Display + Send + 'static,
{
    let QueueHandle { user_id, id, inbox } = relay.on_connect(&user);
    tracing::info!(user_id = %user_id, connection = %id, username = %user.username, "session active");

    let (reply_tx, reply_rx) = mpsc::unbounded_channel();
    let _ = reply_tx.send(ServerFrame::connected(&user.username));

    let mut send_task = tokio::spawn(outbound(sink, inbox, reply_rx, user_id));
    let mut recv_task = tokio::spawn(inbound(relay.clone(), user, stream, reply_tx));

    let joined = tokio::select! {
        result = &mut send_task => {
            recv_task.abort();
            result
        }
        result = &mut recv_task => {
            send_task.abort();
            result
        }
    };

    relay.on_disconnect(user_id, id);

    let end = joined.unwrap_or_else(|e| Err(RelayError::TransportFailure(e.to_string())));
    match &end {
        Ok(reason) => tracing::info!(user_id = %user_id, connection = %id, ?reason, "session closed"),
        Err(err) => tracing::warn!(user_id = %user_id, connection = %id, "session failed: {err}"),
    }
    end
}

async fn outbound<Si>(
    mut sink: Si,
    mut inbox: Inbox,
    mut replies: mpsc::UnboundedReceiver<ServerFrame>,
    user_id: UserId,
) -> Result<SessionEnd, RelayError>
where
    Si: Sink<Frame> + Unpin,
    Si::Error: fmt::Display,
{
    loop {
        let frame = tokio::select! {
            biased;
            Some(reply) = replies.recv() => reply,
            delivery = inbox.next() => match delivery {
                Some(delivery) => ServerFrame::from(delivery),
                None => {
                    tracing::debug!(user_id = %user_id, "queue closed, closing socket");
                    let _ = sink.send(Frame::close(CLOSE_SUPERSEDED, "Connected from another location")).await;
                    let _ = sink.close().await;
                    return Ok(SessionEnd::Superseded);
                }
            },
        };

        sink.send(Frame::Text(frame.to_json()))
            .await
            .map_err(|e| RelayError::TransportFailure(e.to_string()))?;
    }
}

async fn inbound<St, E>(
    relay: Relay,
    user: User,
    mut stream: St,
    replies: mpsc::UnboundedSender<ServerFrame>,
) -> Result<SessionEnd, RelayError>
where
    St: Stream<Item = Result<Frame, E>> + Unpin,
    E: fmt::Display,
{
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Frame::Text(raw)) => {
                if replies.send(relay.on_frame(&user, &raw)).is_err() {
                    break;
                }
            }
            Ok(Frame::Binary(bytes)) => {
                let ack = match String::from_utf8(bytes) {
                    Ok(raw) => relay.on_frame(&user, &raw),
                    Err(e) => {
                        tracing::debug!(user_id = %user.id, error = %e, "binary frame is not utf-8");
                        ServerFrame::error(RelayError::MalformedFrame(e.to_string()).to_string())
                    }
                };
                if replies.send(ack).is_err() {
                    break;
                }
            }
            Ok(Frame::Close { code, reason }) => {
                tracing::debug!(user_id = %user.id, code, reason = %reason, "peer closed");
                return Ok(SessionEnd::RemoteClosed);
            }
            Err(e) => return Err(RelayError::TransportFailure(e.to_string())),
        }
    }
    Ok(SessionEnd::RemoteClosed)
}
