//! Error types for the stock chat orchestrator

use crate::models::Conversation;
use thiserror::Error;

/// Result type alias for chat operations
pub type Result<T> = std::result::Result<T, ChatError>;

#[derive(Error, Debug)]
pub enum ChatError {

    // =============================
    // Model Provider Errors
    // =============================

    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Streaming reply was not drained before the conversation advanced")]
    StreamNotDrained,

    // =============================
    // Tool Loop Errors
    // =============================

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Duplicate tool registration: {0}")]
    DuplicateTool(String),

    #[error("Malformed tool arguments for {tool}: {reason}")]
    MalformedToolArguments { tool: String, reason: String },

    #[error("Argument validation failed for {tool}: {reason}")]
    ArgumentValidationFailed { tool: String, reason: String },

    #[error("Tool loop exceeded after {iterations} iterations")]
    ToolLoopExceeded {
        iterations: u32,
        history: Box<Conversation>,
    },

    // =============================
    // Price Store Errors
    // =============================

    #[error("Invalid price: {0}")]
    InvalidPrice(f64),

    #[error("Invalid stock name: {0:?}")]
    InvalidSymbol(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    // =============================
    // Collaborator Errors
    // =============================

    #[error("Fetch error: {0}")]
    FetchError(String),

    #[error("Media generation error: {0}")]
    MediaError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("SQL error: {0}")]
    SqlError(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ChatError {
    /// Short text that is safe to show in the chat surface.
    pub fn user_message(&self) -> &'static str {
        match self {
            ChatError::ProviderUnavailable(_) | ChatError::HttpError(_) => {
                "Sorry, I couldn't reach the assistant just now. Please try again."
            }
            ChatError::ToolLoopExceeded { .. } => {
                "Sorry, I got stuck looking that up. Please try asking again."
            }
            ChatError::FetchError(_) => "Sorry, I couldn't read that page.",
            _ => "Sorry, something went wrong while answering.",
        }
    }

    /// Partial history kept by a turn that failed after making progress.
    pub fn partial_history(&self) -> Option<&Conversation> {
        match self {
            ChatError::ToolLoopExceeded { history, .. } => Some(history),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_message_hides_details() {
        let err = ChatError::ProviderUnavailable("401 Unauthorized: invalid key sk-123".into());
        assert!(!err.user_message().contains("sk-123"));
        assert!(err.user_message().contains("try again"));
    }

    #[test]
    fn test_partial_history_only_for_loop_exceeded() {
        let err = ChatError::ToolLoopExceeded {
            iterations: 8,
            history: Box::new(Conversation::new()),
        };
        assert!(err.partial_history().is_some());
        assert!(ChatError::UnknownTool("x".into()).partial_history().is_none());
    }
}
