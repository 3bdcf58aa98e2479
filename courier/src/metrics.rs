//! Derived delivery metrics.
//!
//! Always recomputed on demand from endpoint counters, emit-time event
//! counts and the log window — never stored. Low-level delivery counters are
//! additionally published through the `metrics` facade by the dispatcher.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::endpoint::{EndpointId, WebhookEndpoint};
use crate::logs::{DeliveryLog, LogOutcome};

/// How many distinct error messages to surface in the metrics view.
const TOP_ERROR_LIMIT: usize = 5;

#[derive(Debug, Clone, Serialize)]
pub struct ErrorCount {
    pub error: String,
    pub count: u64,
}

/// Aggregate view over the whole subsystem.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookMetrics {
    pub total_endpoints: usize,
    pub enabled_endpoints: usize,
    pub total_deliveries: u64,
    pub successful_deliveries: u64,
    pub failed_deliveries: u64,
    /// Successful / total attempts across all endpoints, 1.0 when idle
    pub success_rate: f64,
    /// Failed attempts / attempts within the log window
    pub error_rate: f64,
    /// Mean response time over log entries that recorded one
    pub average_response_time_ms: f64,
    pub endpoint_success_rates: HashMap<EndpointId, f64>,
    /// Emit-time counts keyed by event wire name
    pub events_emitted: HashMap<String, u64>,
    pub top_errors: Vec<ErrorCount>,
    pub generated_at: DateTime<Utc>,
}

impl WebhookMetrics {
    /// Recompute the aggregate view.
    pub fn compute(
        endpoints: &[WebhookEndpoint],
        logs: &[DeliveryLog],
        events_emitted: HashMap<String, u64>,
    ) -> Self {
        let total_deliveries: u64 = endpoints.iter().map(|e| e.total_deliveries).sum();
        let successful_deliveries: u64 = endpoints.iter().map(|e| e.successful_deliveries).sum();
        let failed_deliveries: u64 = endpoints.iter().map(|e| e.failed_deliveries).sum();

        let success_rate = if total_deliveries == 0 {
            1.0
        } else {
            successful_deliveries as f64 / total_deliveries as f64
        };

        let endpoint_success_rates = endpoints
            .iter()
            .map(|endpoint| {
                let rate = if endpoint.total_deliveries == 0 {
                    1.0
                } else {
                    endpoint.successful_deliveries as f64 / endpoint.total_deliveries as f64
                };
                (endpoint.id, rate)
            })
            .collect();

        let failures_in_window = logs
            .iter()
            .filter(|entry| entry.outcome != LogOutcome::Success)
            .count();
        let error_rate = if logs.is_empty() {
            0.0
        } else {
            failures_in_window as f64 / logs.len() as f64
        };

        let timed: Vec<u64> = logs.iter().filter_map(|entry| entry.response_time_ms).collect();
        let average_response_time_ms = if timed.is_empty() {
            0.0
        } else {
            timed.iter().sum::<u64>() as f64 / timed.len() as f64
        };

        let mut error_counts: HashMap<&str, u64> = HashMap::new();
        for entry in logs {
            if let Some(error) = entry.error.as_deref() {
                *error_counts.entry(error).or_insert(0) += 1;
            }
        }
        let mut top_errors: Vec<ErrorCount> = error_counts
            .into_iter()
            .map(|(error, count)| ErrorCount {
                error: error.to_string(),
                count,
            })
            .collect();
        top_errors.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.error.cmp(&b.error)));
        top_errors.truncate(TOP_ERROR_LIMIT);

        Self {
            total_endpoints: endpoints.len(),
            enabled_endpoints: endpoints.iter().filter(|e| e.enabled).count(),
            total_deliveries,
            successful_deliveries,
            failed_deliveries,
            success_rate,
            error_rate,
            average_response_time_ms,
            endpoint_success_rates,
            events_emitted,
            top_errors,
            generated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::{EndpointCreate, EndpointRegistry, RetryPolicy};
    use crate::events::{EventMetadata, EventPayload, EventType};
    use std::collections::HashSet;
    use std::time::Duration;
    use uuid::Uuid;

    fn endpoint_with_counters(success: u64, failed: u64) -> WebhookEndpoint {
        let registry = EndpointRegistry::new();
        let endpoint = registry
            .create(EndpointCreate {
                url: "https://example.com/hook".to_string(),
                events: HashSet::from([EventType::WellnessMoodEntry]),
                enabled: true,
                headers: Default::default(),
                timeout: Duration::from_secs(30),
                retry_policy: RetryPolicy::default(),
                filters: Vec::new(),
                rate_limit: None,
                description: None,
            })
            .unwrap();
        let now = Utc::now();
        for _ in 0..success {
            registry.record_success(endpoint.id, now);
        }
        for _ in 0..failed {
            registry.record_failure(endpoint.id, now);
        }
        registry.get(endpoint.id).unwrap()
    }

    fn log(outcome: LogOutcome, response_time_ms: Option<u64>, error: Option<&str>) -> DeliveryLog {
        DeliveryLog {
            id: Uuid::new_v4(),
            delivery_id: Uuid::new_v4(),
            endpoint_id: Uuid::new_v4(),
            outcome,
            attempt: 1,
            response_status: None,
            response_time_ms,
            error: error.map(String::from),
            payload: EventPayload::new(
                EventType::WellnessMoodEntry,
                serde_json::json!({}),
                EventMetadata::default(),
            ),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_compute_rates_and_counts() {
        let endpoints = vec![endpoint_with_counters(3, 1), endpoint_with_counters(0, 0)];
        let logs = vec![
            log(LogOutcome::Success, Some(10), None),
            log(LogOutcome::Retry, Some(30), Some("HTTP 500")),
            log(LogOutcome::Failure, None, Some("HTTP 500")),
            log(LogOutcome::Timeout, Some(200), Some("request timed out")),
        ];
        let events = HashMap::from([("wellness.mood_entry".to_string(), 4u64)]);

        let metrics = WebhookMetrics::compute(&endpoints, &logs, events);

        assert_eq!(metrics.total_endpoints, 2);
        assert_eq!(metrics.enabled_endpoints, 2);
        assert_eq!(metrics.total_deliveries, 4);
        assert_eq!(metrics.successful_deliveries, 3);
        assert_eq!(metrics.failed_deliveries, 1);
        assert!((metrics.success_rate - 0.75).abs() < f64::EPSILON);
        assert!((metrics.error_rate - 0.75).abs() < f64::EPSILON);
        assert!((metrics.average_response_time_ms - 80.0).abs() < f64::EPSILON);

        // Endpoint with no traffic reports a perfect rate
        let idle_rate = metrics.endpoint_success_rates[&endpoints[1].id];
        assert!((idle_rate - 1.0).abs() < f64::EPSILON);

        assert_eq!(metrics.events_emitted["wellness.mood_entry"], 4);
        assert_eq!(metrics.top_errors[0].error, "HTTP 500");
        assert_eq!(metrics.top_errors[0].count, 2);
    }

    #[test]
    fn test_compute_on_idle_system() {
        let metrics = WebhookMetrics::compute(&[], &[], HashMap::new());
        assert_eq!(metrics.total_deliveries, 0);
        assert!((metrics.success_rate - 1.0).abs() < f64::EPSILON);
        assert!((metrics.error_rate - 0.0).abs() < f64::EPSILON);
        assert!(metrics.top_errors.is_empty());
    }
}
