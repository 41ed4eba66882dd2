use thiserror::Error;

/// Errors raised while encoding or decoding envelopes.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The message body is not a well-formed envelope.
    #[error("Malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The envelope type is known but its payload does not match.
    #[error("Invalid payload for '{message_type}': {source}")]
    InvalidPayload {
        message_type: String,
        #[source]
        source: serde_json::Error,
    },

    /// A required builder field was never set.
    #[error("Missing envelope field: {0}")]
    MissingField(&'static str),
}

/// Result type for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;
