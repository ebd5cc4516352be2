use thiserror::Error;

use crate::gateway::GatewayError;

#[derive(Debug, Error)]
pub enum RelayError {
    /// Referenced group or contact does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Requester is not allowed to perform the operation.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// A durable read or write failed. The operation was aborted before any
    /// delivery took place.
    #[error("Persistence failure: {0}")]
    Persistence(#[from] GatewayError),
}

impl RelayError {
    /// Text safe to show to the client that triggered the failure.
    ///
    /// Storage details stay in the server log.
    pub fn client_message(&self) -> String {
        match self {
            RelayError::Persistence(_) => "Persistence failure".to_string(),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
