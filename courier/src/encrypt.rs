//! Pluggable payload encryption boundary.
//!
//! Compliance-flagged payloads pass through an [`Encryptor`] before they are
//! enqueued. The default [`NoopEncryptor`] performs no cryptographic
//! transformation — it exists so the `metadata.encrypted` flag and the
//! propagation path are exercised end to end. Production deployments must
//! supply a real implementation.

use serde_json::Value;

use crate::error::Result;

/// Transforms event data before it is embedded in the envelope.
///
/// Implementations decide the algorithm and key management; the subsystem
/// only guarantees that an error here surfaces synchronously to the caller
/// of `emit` and that the event is not silently dropped.
pub trait Encryptor: Send + Sync {
    fn encrypt(&self, data: &Value) -> Result<Value>;
}

/// Default encryptor: passes data through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEncryptor;

impl Encryptor for NoopEncryptor {
    fn encrypt(&self, data: &Value) -> Result<Value> {
        Ok(data.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noop_passes_data_through() {
        let data = serde_json::json!({"mood": 4, "note": "tired"});
        let encrypted = NoopEncryptor.encrypt(&data).unwrap();
        assert_eq!(encrypted, data);
    }
}
