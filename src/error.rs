use thiserror::Error;

use crate::model::TempId;

pub type ChatResult<T> = Result<T, ChatError>;

/// Per-operation failures. None of them is fatal; every variant leaves the
/// state it was raised against untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    #[error("invalid message target")]
    InvalidTarget,
    #[error("message {0} is still being sent")]
    NotConfirmed(TempId),
    #[error("unauthorized: {0}")]
    Unauthorized(&'static str),
    #[error("both participants are required")]
    MissingParticipant,
    #[error("message store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("message {temp_id} could not be sent: {reason}")]
    SendFailed { temp_id: TempId, reason: String },
    #[error("message {0} not found")]
    UnknownMessage(String),
    #[error("invalid reaction symbol")]
    InvalidSymbol,
    #[error("message text is empty")]
    EmptyMessage,
}

impl ChatError {
    /// Stable identifier used in wire replies.
    pub fn code(&self) -> &'static str {
        match self {
            ChatError::InvalidTarget => "invalid_target",
            ChatError::NotConfirmed(_) => "not_confirmed",
            ChatError::Unauthorized(_) => "unauthorized",
            ChatError::MissingParticipant => "missing_participant",
            ChatError::StoreUnavailable(_) => "store_unavailable",
            ChatError::SendFailed { .. } => "send_failed",
            ChatError::UnknownMessage(_) => "unknown_message",
            ChatError::InvalidSymbol => "invalid_symbol",
            ChatError::EmptyMessage => "empty_message",
        }
    }

    /// Whether the caller should offer the user a retry. The core itself
    /// never retries.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ChatError::StoreUnavailable(_) | ChatError::SendFailed { .. }
        )
    }
}
