//! Error types for port operations.

/// Storage failure, with the operation that hit it.
#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error("Storage error in {operation}: {message}")]
    Database {
        operation: &'static str,
        message: String,
    },

    /// A stored record could not be encoded or decoded.
    #[error("Corrupt record: {0}")]
    Serialization(String),
}

impl RepoError {
    pub fn database(operation: &'static str, message: impl ToString) -> Self {
        Self::Database {
            operation,
            message: message.to_string(),
        }
    }

    pub fn serialization(message: impl ToString) -> Self {
        Self::Serialization(message.to_string())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum LlmError {
    #[error("Model server unreachable: {0}")]
    Unreachable(String),

    #[error("Model server answered {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed completion: {0}")]
    Malformed(String),
}
