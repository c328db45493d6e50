use thiserror::Error;

/// Malformed input rejected before anything is persisted.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Invalid message type: {0} (expected text, image or location)")]
    UnknownMessageType(String),

    #[error("Invalid metadata for message type {kind}: {reason}")]
    InvalidMetadata { kind: &'static str, reason: String },

    #[error("Cannot send message to yourself")]
    SelfMessage,

    #[error("Message text is required")]
    EmptyText,

    #[error("Message text exceeds {max} characters")]
    TextTooLong { max: usize },

    #[error("Unknown {kind}: {value}")]
    UnknownVariant { kind: &'static str, value: String },

    #[error("{0}")]
    Other(String),
}
