use thiserror::Error;

use crate::model::MessageId;
use crate::transport::TransportError;

/// Shown for any failure that never reached the application layer.
pub const UNEXPECTED_ERROR: &str = "An unexpected error occurred";

pub const LOAD_FAILED: &str = "Failed to load messages";
pub const SEND_FAILED: &str = "Failed to send message";
pub const DELETE_FAILED: &str = "Failed to delete message";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatSyncError {
    #[error("message has no text and no attachments")]
    EmptyMessage,
    #[error("a message is already being sent")]
    SendInFlight,
    #[error("no conversation is bound")]
    NotBound,
    #[error("no user is logged in")]
    NoCurrentUser,
    #[error("message {0} has not been confirmed yet")]
    PendingMessage(MessageId),
    #[error("message {0} is not in this conversation")]
    UnknownMessage(MessageId),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("request rejected: {}", .message.as_deref().unwrap_or("no reason given"))]
    Rejected { message: Option<String> },
    #[error("conversation changed before the response arrived")]
    Superseded,
}

impl ChatSyncError {
    /// Text suitable for the user. `fallback` covers a refusal that carried
    /// no server message.
    pub fn user_message(&self, fallback: &str) -> String {
        match self {
            ChatSyncError::Transport(_) => UNEXPECTED_ERROR.to_string(),
            ChatSyncError::Rejected { message } => message
                .as_deref()
                .filter(|m| !m.trim().is_empty())
                .unwrap_or(fallback)
                .to_string(),
            other => other.to_string(),
        }
    }

    /// Whether the failure was raised locally, before any transport call.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            ChatSyncError::EmptyMessage
                | ChatSyncError::SendInFlight
                | ChatSyncError::NotBound
                | ChatSyncError::NoCurrentUser
                | ChatSyncError::PendingMessage(_)
                | ChatSyncError::UnknownMessage(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_failures_read_as_unexpected() {
        let err = ChatSyncError::from(TransportError::Network("connection reset".into()));
        assert_eq!(err.user_message(SEND_FAILED), UNEXPECTED_ERROR);
    }

    #[test]
    fn rejections_prefer_server_text() {
        let with_text = ChatSyncError::Rejected {
            message: Some("Task is closed".into()),
        };
        let blank = ChatSyncError::Rejected {
            message: Some("  ".into()),
        };
        let without = ChatSyncError::Rejected { message: None };
        assert_eq!(with_text.user_message(LOAD_FAILED), "Task is closed");
        assert_eq!(blank.user_message(LOAD_FAILED), LOAD_FAILED);
        assert_eq!(without.user_message(DELETE_FAILED), DELETE_FAILED);
    }

    #[test]
    fn preconditions_are_flagged() {
        assert!(ChatSyncError::EmptyMessage.is_precondition());
        assert!(!ChatSyncError::Superseded.is_precondition());
    }
}
