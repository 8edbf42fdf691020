use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{
    domain::{MessageId, MessageKind, MessageStatus, SessionId},
    error::{ApiError, ValidationError},
};

/// A chat message as held in a session timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub session_id: SessionId,
    pub message_id: MessageId,
    /// Client-assigned, milliseconds. Survives the placeholder -> confirmed swap.
    pub created_at: i64,
    pub updated_at: i64,
    pub status: MessageStatus,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub content: String,
    pub from_id: String,
    pub to_id: String,
}

/// Message record as delivered by the host bridge, before validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<MessageId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<MessageStatus>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<MessageKind>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub from_id: String,
    #[serde(default)]
    pub to_id: String,
}

impl From<Message> for InboundMessage {
    fn from(value: Message) -> Self {
        Self {
            session_id: Some(value.session_id),
            message_id: Some(value.message_id),
            created_at: Some(value.created_at),
            updated_at: Some(value.updated_at),
            status: Some(value.status),
            kind: Some(value.kind),
            content: value.content,
            from_id: value.from_id,
            to_id: value.to_id,
        }
    }
}

impl TryFrom<InboundMessage> for Message {
    type Error = ValidationError;

    fn try_from(value: InboundMessage) -> Result<Self, Self::Error> {
        let session_id = value
            .session_id
            .ok_or(ValidationError::MissingField("sessionId"))?;
        if session_id.as_str().is_empty() {
            return Err(ValidationError::EmptyField { field: "sessionId" });
        }
        let message_id = value
            .message_id
            .ok_or(ValidationError::MissingField("messageId"))?;
        if message_id.as_str().is_empty() {
            return Err(ValidationError::EmptyField { field: "messageId" });
        }
        let created_at = value
            .created_at
            .ok_or(ValidationError::MissingField("createdAt"))?;

        Ok(Self {
            session_id,
            message_id,
            created_at,
            updated_at: value.updated_at.unwrap_or(created_at),
            status: value.status.unwrap_or(MessageStatus::Sent),
            kind: value.kind.unwrap_or(MessageKind::Text),
            content: value.content,
            from_id: value.from_id,
            to_id: value.to_id,
        })
    }
}

/// Outbound send. `created_at` is the placeholder's timestamp so the
/// confirmation and any echo of it correlate back to the placeholder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    pub session_id: SessionId,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub content: String,
    pub created_at: i64,
    pub from_id: String,
    pub to_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpload {
    pub path: PathBuf,
    pub file_name: String,
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedFileRef {
    pub file_id: String,
    pub file_name: String,
    pub size_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum BridgeEvent {
    /// A new message from a peer, or the echo of one we sent.
    MessageReceived { message: InboundMessage },
    MessageAcked { message: InboundMessage },
    MessageFailed {
        message: InboundMessage,
        error: ApiError,
    },
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
