use shared::{domain::MessageId, error::ValidationError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to send message {message_id}: {source}")]
    Send {
        message_id: MessageId,
        source: anyhow::Error,
    },
    #[error("failed to upload attachment for message {message_id}: {source}")]
    Upload {
        message_id: MessageId,
        source: anyhow::Error,
    },
    #[error("rejected inbound message: {0}")]
    InvalidMessage(#[from] ValidationError),
    #[error("no failed message {0} to act on")]
    NoFailedMessage(MessageId),
    #[error(transparent)]
    Api(#[from] anyhow::Error),
}

impl ClientError {
    /// The placeholder this error was recorded against, if any.
    pub fn message_id(&self) -> Option<&MessageId> {
        match self {
            Self::Send { message_id, .. }
            | Self::Upload { message_id, .. }
            | Self::NoFailedMessage(message_id) => Some(message_id),
            Self::InvalidMessage(_) | Self::Api(_) => None,
        }
    }
}
