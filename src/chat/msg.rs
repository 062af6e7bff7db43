use serde::{Deserialize, Serialize};

use crate::auth::UserId;

use super::{registry::Delivery, store::now_millis, RelayError};

pub(crate) const SERVER: &str = "server";

/// `to` may arrive as `2` or `"2"`.
#[derive(Deserialize)]
#[serde(untagged)]
enum RecipientRef {
    Id(u64),
    Text(String),
}

#[derive(Deserialize)]
struct RawChatRequest {
    to: RecipientRef,
    content: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRequest {
    pub to: UserId,
    pub content: String,
}

impl ChatRequest {
    pub fn parse(raw: &str) -> Result<ChatRequest, RelayError> {
        let RawChatRequest { to, content } = serde_json::from_str(raw)
            .map_err(|e| RelayError::MalformedFrame(e.to_string()))?;

        let to = match to {
            RecipientRef::Id(id) => UserId(id),
            RecipientRef::Text(text) => text
                .trim()
                .parse()
                .map(UserId)
                .map_err(|_| RelayError::MalformedFrame(format!("recipient {text:?} is not a user id")))?,
        };

        if content.trim().is_empty() {
            return Err(RelayError::MalformedFrame("empty content".to_owned()));
        }

        Ok(ChatRequest { to, content })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameType {
    Connected,
    Message,
    MessageSent,
    MessageUndelivered,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerFrame {
    #[serde(rename = "type")]
    pub kind: FrameType,
    pub from: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub to: Option<String>,
    pub content: String,
    pub timestamp: i64,
}

impl ServerFrame {
    fn server(kind: FrameType, to: Option<String>, content: impl Into<String>) -> Self {
        ServerFrame {
            kind,
            from: SERVER.to_owned(),
            to,
            content: content.into(),
            timestamp: now_millis(),
        }
    }

    pub fn connected(username: &str) -> Self {
        Self::server(FrameType::Connected, Some(username.to_owned()), format!("Connected as {username}"))
    }

    pub fn sent(recipient: &str) -> Self {
        Self::server(FrameType::MessageSent, Some(recipient.to_owned()), "Message delivered")
    }

    pub fn undelivered(recipient: &str, recipient_id: UserId) -> Self {
        Self::server(
            FrameType::MessageUndelivered,
            Some(recipient.to_owned()),
            RelayError::RecipientOffline(recipient_id).to_string(),
        )
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self::server(FrameType::Error, None, content)
    }

    pub fn to_json(&self) -> String {
        // a struct of strings and ints cannot fail to serialize
        serde_json::to_string(self).unwrap_or_default()
    }
}

impl From<Delivery> for ServerFrame {
    fn from(Delivery { from, to, message }: Delivery) -> Self {
        ServerFrame {
            kind: FrameType::Message,
            from,
            to: Some(to),
            content: message.content,
            timestamp: message.timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parses_numeric_and_string_recipients() {
        let numeric = ChatRequest::parse(r#"{"to": 2, "content": "hi"}"#).unwrap();
        let text = ChatRequest::parse(r#"{"to": "2", "content": "hi"}"#).unwrap();

        assert_eq!(numeric, ChatRequest { to: UserId(2), content: "hi".to_owned() });
        assert_eq!(numeric, text);
    }

    #[test]
    fn rejects_malformed_requests() {
        for raw in [
            "not json",
            r#"{"content": "hi"}"#,
            r#"{"to": 2}"#,
            r#"{"to": "bob", "content": "hi"}"#,
            r#"{"to": 2, "content": "   "}"#,
        ] {
            assert!(
                matches!(ChatRequest::parse(raw), Err(RelayError::MalformedFrame(_))),
                "{raw} should be malformed"
            );
        }
    }

    #[test]
    fn server_frames_serialize_with_type_tag() {
        let frame = serde_json::to_value(ServerFrame::sent("bob")).unwrap();
        assert_eq!(frame["type"], "message_sent");
        assert_eq!(frame["from"], "server");
        assert_eq!(frame["to"], "bob");
        assert_eq!(frame["content"], "Message delivered");
        assert!(frame["timestamp"].is_i64());

        let error = serde_json::to_value(ServerFrame::error("User not found")).unwrap();
        assert_eq!(error["type"], "error");
        assert!(error.get("to").is_none());
    }

    #[test]
    fn delivery_becomes_message_frame() {
        let store = crate::chat::store::MessageStore::new();
        let message = store.append(UserId(1), UserId(2), "hi");
        let timestamp = message.timestamp;

        let frame = ServerFrame::from(Delivery {
            from: "alice".to_owned(),
            to: "bob".to_owned(),
            message,
        });

        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            json!({
                "type": "message",
                "from": "alice",
                "to": "bob",
                "content": "hi",
                "timestamp": timestamp,
            })
        );
    }
}
