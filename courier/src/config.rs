//! Configuration for the webhook delivery subsystem.
//!
//! Plain serde structs with defaults; the host application deserializes these
//! from its own configuration source and hands them to [`crate::service::WebhookService`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::signing::SignatureAlgorithm;

/// Top-level configuration for the webhook subsystem.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CourierConfig {
    /// Scheduler and delivery executor settings
    pub dispatcher: DispatcherConfig,
    /// Compliance-driven payload handling
    pub compliance: ComplianceConfig,
    /// Maximum delivery log entries retained (ring buffer, default: 1000)
    pub log_capacity: usize,
    /// Maximum alerts retained (ring buffer, default: 500)
    pub alert_capacity: usize,
}

impl Default for CourierConfig {
    fn default() -> Self {
        Self {
            dispatcher: DispatcherConfig::default(),
            compliance: ComplianceConfig::default(),
            log_capacity: 1000,
            alert_capacity: 500,
        }
    }
}

/// Scheduler and delivery executor configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DispatcherConfig {
    /// How often the scheduler claims due deliveries (default: 1s)
    #[serde(with = "humantime_serde")]
    pub tick_interval: Duration,
    /// Maximum deliveries dispatched concurrently per tick (default: 10)
    pub max_concurrent_deliveries: usize,
    /// Internal channel buffer capacity for send requests and results (default: 200)
    pub channel_capacity: usize,
    /// User-Agent header on outbound requests
    pub user_agent: String,
    /// How long a claimed delivery stays unclaimable. If the process dies with
    /// a delivery in flight, it becomes re-claimable after this window
    /// (default: 5m).
    #[serde(with = "humantime_serde")]
    pub claim_timeout: Duration,
    /// HMAC algorithm for the signature header (default: sha256)
    pub signature_algorithm: SignatureAlgorithm,
    /// Consecutive failures on one endpoint before a high-error-rate alert
    /// is raised (default: 10)
    pub failure_streak_threshold: u32,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            max_concurrent_deliveries: 10,
            channel_capacity: 200,
            user_agent: format!("courier-webhooks/{}", env!("CARGO_PKG_VERSION")),
            claim_timeout: Duration::from_secs(300),
            signature_algorithm: SignatureAlgorithm::Sha256,
            failure_streak_threshold: 10,
        }
    }
}

/// Compliance-driven payload handling.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ComplianceConfig {
    /// Encrypt sensitive payloads (wellness and therapy events) through the
    /// configured encryptor before enqueueing. Crisis events are always
    /// encrypted regardless of this flag. (default: false)
    pub encrypt_sensitive_payloads: bool,
    /// Value of the X-Compliance header on sensitive deliveries (default: "HIPAA")
    pub compliance_tag: String,
    /// Environment stamped into event metadata when the emitter leaves it unset
    pub environment: String,
}

impl Default for ComplianceConfig {
    fn default() -> Self {
        Self {
            encrypt_sensitive_payloads: false,
            compliance_tag: "HIPAA".to_string(),
            environment: "development".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatcher_config_defaults() {
        let config = DispatcherConfig::default();
        assert_eq!(config.tick_interval, Duration::from_secs(1));
        assert_eq!(config.max_concurrent_deliveries, 10);
        assert_eq!(config.channel_capacity, 200);
        assert_eq!(config.claim_timeout, Duration::from_secs(300));
        assert_eq!(config.signature_algorithm, SignatureAlgorithm::Sha256);
        assert_eq!(config.failure_streak_threshold, 10);
    }

    #[test]
    fn test_config_roundtrips_through_serde() {
        let config = CourierConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: CourierConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.dispatcher.tick_interval, config.dispatcher.tick_interval);
        assert_eq!(parsed.compliance.compliance_tag, "HIPAA");
    }

    #[test]
    fn test_humantime_durations_accepted() {
        let config: DispatcherConfig =
            serde_json::from_str(r#"{"tick_interval": "250ms", "claim_timeout": "2m"}"#).unwrap();
        assert_eq!(config.tick_interval, Duration::from_millis(250));
        assert_eq!(config.claim_timeout, Duration::from_secs(120));
    }
}
