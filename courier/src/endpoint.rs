//! Webhook endpoint configuration and the in-memory registry.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::events::EventType;
use crate::filter::FieldCondition;
use crate::signing;

/// Endpoint ID type alias for type safety.
pub type EndpointId = Uuid;

/// Retry behavior for one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryPolicy {
    /// Retries after the initial attempt; total attempts = max_retries + 1
    pub max_retries: u32,
    /// Delay before the first retry
    #[serde(with = "humantime_serde")]
    pub backoff: Duration,
    /// Factor by which the delay grows with each retry
    pub backoff_factor: u32,
    /// Ceiling on the computed delay
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            backoff: Duration::from_secs(1),
            backoff_factor: 2,
            max_backoff: Duration::from_secs(3600),
        }
    }
}

impl RetryPolicy {
    /// Backoff delay before retrying attempt `attempt + 1`, where `attempt`
    /// is the 1-based attempt that just failed:
    /// `min(backoff * backoff_factor^(attempt-1), max_backoff)`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let millis = (self.backoff.as_millis() as u64)
            .saturating_mul((self.backoff_factor as u64).saturating_pow(exponent));
        Duration::from_millis(millis.min(self.max_backoff.as_millis() as u64))
    }
}

/// Fixed-window rate limit for one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    /// Requests allowed per window
    pub requests: u32,
    #[serde(with = "humantime_serde")]
    pub window: Duration,
}

/// A registered webhook subscriber.
#[derive(Debug, Clone)]
pub struct WebhookEndpoint {
    pub id: EndpointId,
    pub url: String,
    /// `whsec_` prefixed shared secret used for payload signing
    pub secret: String,
    pub events: HashSet<EventType>,
    pub enabled: bool,
    /// Static headers added to every delivery
    pub headers: HashMap<String, String>,
    /// Per-request timeout; a slower response counts as a failed attempt
    pub timeout: Duration,
    pub retry_policy: RetryPolicy,
    /// All conditions must match the envelope for the endpoint to receive it
    pub filters: Vec<FieldCondition>,
    pub rate_limit: Option<RateLimit>,
    pub description: Option<String>,
    pub total_deliveries: u64,
    pub successful_deliveries: u64,
    pub failed_deliveries: u64,
    pub consecutive_failures: u32,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WebhookEndpoint {
    /// Check if this endpoint should receive the given event type.
    pub fn accepts_event(&self, event: EventType) -> bool {
        self.enabled && self.events.contains(&event)
    }

    /// Evaluate all filter conditions against the serialized envelope.
    pub fn matches_filters(&self, envelope: &serde_json::Value) -> bool {
        self.filters.iter().all(|condition| condition.matches(envelope))
    }
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_enabled() -> bool {
    true
}

/// Request to register a new endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointCreate {
    pub url: String,
    pub events: HashSet<EventType>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(default)]
    pub retry_policy: RetryPolicy,
    #[serde(default)]
    pub filters: Vec<FieldCondition>,
    #[serde(default)]
    pub rate_limit: Option<RateLimit>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Request to update an endpoint. `None` leaves a field untouched; the
/// double-Option fields distinguish "leave as is" from "clear".
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EndpointUpdate {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub events: Option<HashSet<EventType>>,
    #[serde(default)]
    pub headers: Option<HashMap<String, String>>,
    #[serde(default, with = "humantime_serde::option")]
    pub timeout: Option<Duration>,
    #[serde(default)]
    pub retry_policy: Option<RetryPolicy>,
    #[serde(default)]
    pub filters: Option<Vec<FieldCondition>>,
    #[serde(default)]
    pub rate_limit: Option<Option<RateLimit>>,
    #[serde(default)]
    pub description: Option<Option<String>>,
}

/// In-memory store of endpoint configuration.
///
/// All mutation happens under one write lock; delivery attempts mutate only
/// the counter fields through [`record_success`](Self::record_success) and
/// [`record_failure`](Self::record_failure).
#[derive(Default)]
pub struct EndpointRegistry {
    endpoints: RwLock<HashMap<EndpointId, WebhookEndpoint>>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new endpoint with a generated id and secret.
    pub fn create(&self, request: EndpointCreate) -> Result<WebhookEndpoint> {
        if request.url.is_empty() {
            return Err(Error::InvalidEndpoint("URL must not be empty".to_string()));
        }
        if !request.url.starts_with("http://") && !request.url.starts_with("https://") {
            return Err(Error::InvalidEndpoint(format!(
                "URL must use http or https: {}",
                request.url
            )));
        }
        if request.events.is_empty() {
            return Err(Error::InvalidEndpoint(
                "endpoint must subscribe to at least one event".to_string(),
            ));
        }

        let now = Utc::now();
        let endpoint = WebhookEndpoint {
            id: Uuid::new_v4(),
            url: request.url,
            secret: signing::generate_secret(),
            events: request.events,
            enabled: request.enabled,
            headers: request.headers,
            timeout: request.timeout,
            retry_policy: request.retry_policy,
            filters: request.filters,
            rate_limit: request.rate_limit,
            description: request.description,
            total_deliveries: 0,
            successful_deliveries: 0,
            failed_deliveries: 0,
            consecutive_failures: 0,
            last_success: None,
            last_failure: None,
            created_at: now,
            updated_at: now,
        };

        self.endpoints.write().insert(endpoint.id, endpoint.clone());
        tracing::info!(endpoint_id = %endpoint.id, url = %endpoint.url, "Registered webhook endpoint");
        Ok(endpoint)
    }

    /// Merge an update into an existing endpoint. Validation happens before
    /// any field is touched, so a rejected update leaves the endpoint as is.
    pub fn update(&self, id: EndpointId, request: EndpointUpdate) -> Result<WebhookEndpoint> {
        if request.url.as_ref().is_some_and(|url| url.is_empty()) {
            return Err(Error::InvalidEndpoint("URL must not be empty".to_string()));
        }
        if request.events.as_ref().is_some_and(|events| events.is_empty()) {
            return Err(Error::InvalidEndpoint(
                "endpoint must subscribe to at least one event".to_string(),
            ));
        }

        let mut endpoints = self.endpoints.write();
        let endpoint = endpoints.get_mut(&id).ok_or(Error::EndpointNotFound(id))?;

        if let Some(url) = request.url {
            endpoint.url = url;
        }
        if let Some(enabled) = request.enabled {
            endpoint.enabled = enabled;
            // Re-enabling clears the failure streak
            if enabled {
                endpoint.consecutive_failures = 0;
            }
        }
        if let Some(events) = request.events {
            endpoint.events = events;
        }
        if let Some(headers) = request.headers {
            endpoint.headers = headers;
        }
        if let Some(timeout) = request.timeout {
            endpoint.timeout = timeout;
        }
        if let Some(retry_policy) = request.retry_policy {
            endpoint.retry_policy = retry_policy;
        }
        if let Some(filters) = request.filters {
            endpoint.filters = filters;
        }
        if let Some(rate_limit) = request.rate_limit {
            endpoint.rate_limit = rate_limit;
        }
        if let Some(description) = request.description {
            endpoint.description = description;
        }
        endpoint.updated_at = Utc::now();

        Ok(endpoint.clone())
    }

    /// Remove an endpoint. The caller is responsible for purging its queued
    /// deliveries.
    pub fn delete(&self, id: EndpointId) -> bool {
        let removed = self.endpoints.write().remove(&id).is_some();
        if removed {
            tracing::info!(endpoint_id = %id, "Deleted webhook endpoint");
        }
        removed
    }

    pub fn get(&self, id: EndpointId) -> Option<WebhookEndpoint> {
        self.endpoints.read().get(&id).cloned()
    }

    pub fn list(&self) -> Vec<WebhookEndpoint> {
        self.endpoints.read().values().cloned().collect()
    }

    /// Rotate an endpoint's shared secret, returning the updated endpoint.
    pub fn rotate_secret(&self, id: EndpointId) -> Result<WebhookEndpoint> {
        let mut endpoints = self.endpoints.write();
        let endpoint = endpoints.get_mut(&id).ok_or(Error::EndpointNotFound(id))?;
        endpoint.secret = signing::generate_secret();
        endpoint.updated_at = Utc::now();
        Ok(endpoint.clone())
    }

    /// Record a successful delivery attempt and reset the failure streak.
    pub fn record_success(&self, id: EndpointId, at: DateTime<Utc>) {
        if let Some(endpoint) = self.endpoints.write().get_mut(&id) {
            endpoint.total_deliveries += 1;
            endpoint.successful_deliveries += 1;
            endpoint.consecutive_failures = 0;
            endpoint.last_success = Some(at);
        }
    }

    /// Record a failed delivery attempt.
    ///
    /// Returns the new consecutive-failure streak, or `None` if the endpoint
    /// was deleted while the delivery was in flight.
    pub fn record_failure(&self, id: EndpointId, at: DateTime<Utc>) -> Option<u32> {
        let mut endpoints = self.endpoints.write();
        let endpoint = endpoints.get_mut(&id)?;
        endpoint.total_deliveries += 1;
        endpoint.failed_deliveries += 1;
        endpoint.consecutive_failures += 1;
        endpoint.last_failure = Some(at);
        Some(endpoint.consecutive_failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_request(url: &str) -> EndpointCreate {
        EndpointCreate {
            url: url.to_string(),
            events: HashSet::from([EventType::WellnessMoodEntry]),
            enabled: true,
            headers: HashMap::new(),
            timeout: Duration::from_secs(30),
            retry_policy: RetryPolicy::default(),
            filters: Vec::new(),
            rate_limit: None,
            description: None,
        }
    }

    #[test]
    fn test_create_assigns_id_secret_and_zeroed_counters() {
        let registry = EndpointRegistry::new();
        let endpoint = registry.create(create_request("https://example.com/hook")).unwrap();

        assert!(endpoint.secret.starts_with(signing::SECRET_PREFIX));
        assert_eq!(endpoint.total_deliveries, 0);
        assert_eq!(endpoint.successful_deliveries, 0);
        assert_eq!(endpoint.failed_deliveries, 0);
        assert!(endpoint.enabled);
        assert_eq!(registry.list().len(), 1);
    }

    #[test]
    fn test_create_rejects_bad_config() {
        let registry = EndpointRegistry::new();
        assert!(registry.create(create_request("")).is_err());
        assert!(registry.create(create_request("ftp://example.com")).is_err());

        let mut no_events = create_request("https://example.com/hook");
        no_events.events.clear();
        assert!(registry.create(no_events).is_err());
    }

    #[test]
    fn test_update_merges_fields_and_bumps_timestamp() {
        let registry = EndpointRegistry::new();
        let endpoint = registry.create(create_request("https://example.com/hook")).unwrap();

        let updated = registry
            .update(
                endpoint.id,
                EndpointUpdate {
                    enabled: Some(false),
                    description: Some(Some("paused".to_string())),
                    ..Default::default()
                },
            )
            .unwrap();

        assert!(!updated.enabled);
        assert_eq!(updated.description.as_deref(), Some("paused"));
        assert_eq!(updated.url, endpoint.url);
        assert!(updated.updated_at >= endpoint.updated_at);
    }

    #[test]
    fn test_update_missing_endpoint_is_not_found() {
        let registry = EndpointRegistry::new();
        let result = registry.update(Uuid::new_v4(), EndpointUpdate::default());
        assert!(matches!(result, Err(Error::EndpointNotFound(_))));
    }

    #[test]
    fn test_rotate_secret_changes_secret() {
        let registry = EndpointRegistry::new();
        let endpoint = registry.create(create_request("https://example.com/hook")).unwrap();
        let rotated = registry.rotate_secret(endpoint.id).unwrap();
        assert_ne!(rotated.secret, endpoint.secret);
        assert!(rotated.secret.starts_with(signing::SECRET_PREFIX));
    }

    #[test]
    fn test_delete_returns_whether_removed() {
        let registry = EndpointRegistry::new();
        let endpoint = registry.create(create_request("https://example.com/hook")).unwrap();
        assert!(registry.delete(endpoint.id));
        assert!(!registry.delete(endpoint.id));
        assert!(registry.get(endpoint.id).is_none());
    }

    #[test]
    fn test_counters_and_streaks() {
        let registry = EndpointRegistry::new();
        let endpoint = registry.create(create_request("https://example.com/hook")).unwrap();
        let now = Utc::now();

        assert_eq!(registry.record_failure(endpoint.id, now), Some(1));
        assert_eq!(registry.record_failure(endpoint.id, now), Some(2));
        registry.record_success(endpoint.id, now);

        let endpoint = registry.get(endpoint.id).unwrap();
        assert_eq!(endpoint.total_deliveries, 3);
        assert_eq!(endpoint.failed_deliveries, 2);
        assert_eq!(endpoint.successful_deliveries, 1);
        assert_eq!(endpoint.consecutive_failures, 0);
        assert!(endpoint.last_success.is_some());
        assert!(endpoint.last_failure.is_some());

        assert_eq!(registry.record_failure(Uuid::new_v4(), now), None);
    }

    #[test]
    fn test_backoff_delay_formula() {
        let policy = RetryPolicy {
            max_retries: 5,
            backoff: Duration::from_millis(1000),
            backoff_factor: 2,
            max_backoff: Duration::from_millis(5000),
        };

        assert_eq!(policy.backoff_delay(1), Duration::from_millis(1000));
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(2000));
        assert_eq!(policy.backoff_delay(3), Duration::from_millis(4000));
        // Capped at max_backoff
        assert_eq!(policy.backoff_delay(4), Duration::from_millis(5000));
        assert_eq!(policy.backoff_delay(10), Duration::from_millis(5000));
    }

    #[test]
    fn test_backoff_delay_non_decreasing() {
        let policy = RetryPolicy::default();
        let mut previous = Duration::ZERO;
        for attempt in 1..=20 {
            let delay = policy.backoff_delay(attempt);
            assert!(delay >= previous, "delay decreased at attempt {}", attempt);
            previous = delay;
        }
    }

    #[test]
    fn test_accepts_event_requires_enabled_and_subscription() {
        let registry = EndpointRegistry::new();
        let endpoint = registry.create(create_request("https://example.com/hook")).unwrap();

        assert!(endpoint.accepts_event(EventType::WellnessMoodEntry));
        assert!(!endpoint.accepts_event(EventType::CrisisAlertTriggered));

        let disabled = registry
            .update(
                endpoint.id,
                EndpointUpdate {
                    enabled: Some(false),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(!disabled.accepts_event(EventType::WellnessMoodEntry));
    }
}
