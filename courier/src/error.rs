use thiserror::Error as ThisError;
use uuid::Uuid;

/// Result type for webhook delivery operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the webhook delivery subsystem.
///
/// Delivery-level failures (transport errors, non-2xx responses) never
/// surface through this type: they are captured into the delivery record and
/// drive the retry state machine. This enum covers the synchronous failures
/// a caller of `emit` or the registry can observe.
#[derive(Debug, ThisError)]
pub enum Error {
    /// Endpoint not found in the registry
    #[error("endpoint {0} not found")]
    EndpointNotFound(Uuid),

    /// Endpoint configuration rejected at create/update time
    #[error("invalid endpoint configuration: {0}")]
    InvalidEndpoint(String),

    /// Payload encryption failed; the event is not enqueued
    #[error("payload encryption failed: {0}")]
    Encryption(String),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
