//! Delivery records and the retry state machine.
//!
//! One delivery exists per (endpoint, event) pairing at emit time. It is
//! mutated in place as attempts proceed:
//!
//! ```text
//! pending ──▶ delivered            (2xx)
//!    ▲   └──▶ retrying ──(backoff elapsed)──▶ pending
//!    │              └──▶ failed               (attempts exhausted)
//!    └────── cancelled                        (endpoint gone/disabled)
//! ```
//!
//! `delivered`, `failed` and `cancelled` are terminal: the record is dropped
//! from the queue once it reaches them, leaving only a log entry behind.

use std::collections::HashMap;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::endpoint::{EndpointId, RetryPolicy, WebhookEndpoint};
use crate::events::EventPayload;

/// Delivery ID type alias for type safety.
pub type DeliveryId = Uuid;

/// Delivery status state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    /// Waiting for the scheduler to claim it
    Pending,
    /// Failed but will be retried once its backoff elapses
    Retrying,
    /// Successfully delivered (terminal)
    Delivered,
    /// All attempts exhausted (terminal)
    Failed,
    /// Abandoned without exhausting attempts, e.g. endpoint deleted (terminal)
    Cancelled,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Retrying => "retrying",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::Failed | Self::Cancelled)
    }
}

/// Snapshot of the subscriber's HTTP response, kept for diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseSnapshot {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
    pub duration_ms: u64,
}

/// What to do with a delivery after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Re-queued; eligible again at the contained time
    Retry(DateTime<Utc>),
    /// Attempts exhausted; the delivery is terminally failed
    Exhausted,
}

/// One attempted transmission of an envelope to one endpoint.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub id: DeliveryId,
    pub endpoint_id: EndpointId,
    pub payload: EventPayload,
    pub status: DeliveryStatus,
    /// Attempts performed so far; never exceeds `max_attempts`
    pub attempts: u32,
    /// `retry_policy.max_retries + 1`
    pub max_attempts: u32,
    /// When this delivery next becomes claimable; `None` means immediately
    pub next_retry: Option<DateTime<Utc>>,
    pub last_attempt: Option<DateTime<Utc>>,
    pub response: Option<ResponseSnapshot>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Delivery {
    /// Build a pending delivery for one endpoint.
    pub fn new(endpoint: &WebhookEndpoint, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            endpoint_id: endpoint.id,
            payload,
            status: DeliveryStatus::Pending,
            attempts: 0,
            max_attempts: endpoint.retry_policy.max_retries + 1,
            next_retry: None,
            last_attempt: None,
            response: None,
            error: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Whether this delivery is claimable at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.next_retry.map_or(true, |at| at <= now)
    }

    /// Start an attempt: bump the counter and stamp the attempt time.
    pub fn begin_attempt(&mut self, now: DateTime<Utc>) {
        debug_assert!(self.attempts < self.max_attempts);
        self.attempts += 1;
        self.last_attempt = Some(now);
    }

    /// Terminal success: record the response snapshot.
    pub fn mark_delivered(&mut self, response: ResponseSnapshot, now: DateTime<Utc>) {
        self.status = DeliveryStatus::Delivered;
        self.response = Some(response);
        self.error = None;
        self.next_retry = None;
        self.completed_at = Some(now);
    }

    /// Failed attempt: either schedule a retry with exponential backoff or,
    /// if attempts are exhausted, fail terminally.
    ///
    /// The non-2xx response snapshot (if any) is retained for diagnostics.
    pub fn mark_failed(
        &mut self,
        error: String,
        response: Option<ResponseSnapshot>,
        policy: &RetryPolicy,
        now: DateTime<Utc>,
    ) -> FailureDisposition {
        self.error = Some(error);
        self.response = response;

        if self.attempts < self.max_attempts {
            let delay = policy.backoff_delay(self.attempts);
            let next = now
                + ChronoDuration::from_std(delay).unwrap_or_else(|_| ChronoDuration::seconds(delay.as_secs() as i64));
            self.status = DeliveryStatus::Retrying;
            self.next_retry = Some(next);
            FailureDisposition::Retry(next)
        } else {
            self.status = DeliveryStatus::Failed;
            self.next_retry = None;
            self.completed_at = Some(now);
            FailureDisposition::Exhausted
        }
    }

    /// Abandon a non-terminal delivery (endpoint deleted or disabled at
    /// dispatch time). Returns false if the delivery was already terminal.
    pub fn cancel(&mut self, reason: impl Into<String>, now: DateTime<Utc>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = DeliveryStatus::Cancelled;
        self.error = Some(reason.into());
        self.next_retry = None;
        self.completed_at = Some(now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::{EndpointCreate, EndpointRegistry};
    use crate::events::{EventMetadata, EventType};
    use std::collections::HashSet;
    use std::time::Duration;

    fn test_endpoint(policy: RetryPolicy) -> WebhookEndpoint {
        let registry = EndpointRegistry::new();
        registry
            .create(EndpointCreate {
                url: "https://example.com/hook".to_string(),
                events: HashSet::from([EventType::WellnessMoodEntry]),
                enabled: true,
                headers: Default::default(),
                timeout: Duration::from_secs(30),
                retry_policy: policy,
                filters: Vec::new(),
                rate_limit: None,
                description: None,
            })
            .unwrap()
    }

    fn test_delivery(policy: RetryPolicy) -> Delivery {
        let endpoint = test_endpoint(policy);
        let payload = EventPayload::new(
            EventType::WellnessMoodEntry,
            serde_json::json!({"mood": 3}),
            EventMetadata::default(),
        );
        Delivery::new(&endpoint, payload)
    }

    #[test]
    fn test_max_attempts_derived_from_policy() {
        let delivery = test_delivery(RetryPolicy {
            max_retries: 2,
            ..Default::default()
        });
        assert_eq!(delivery.max_attempts, 3);
        assert_eq!(delivery.status, DeliveryStatus::Pending);
        assert!(delivery.is_due(Utc::now()));
    }

    #[test]
    fn test_failure_schedules_retry_until_exhausted() {
        let policy = RetryPolicy {
            max_retries: 2,
            backoff: Duration::from_millis(1000),
            backoff_factor: 2,
            max_backoff: Duration::from_secs(60),
        };
        let mut delivery = test_delivery(policy);
        let now = Utc::now();

        delivery.begin_attempt(now);
        let disposition = delivery.mark_failed("HTTP 500".to_string(), None, &policy, now);
        let FailureDisposition::Retry(next) = disposition else {
            panic!("first failure should schedule a retry");
        };
        assert_eq!(delivery.status, DeliveryStatus::Retrying);
        assert_eq!(next, now + ChronoDuration::milliseconds(1000));
        assert!(!delivery.is_due(now));
        assert!(delivery.is_due(next));

        delivery.begin_attempt(next);
        let disposition = delivery.mark_failed("HTTP 500".to_string(), None, &policy, next);
        let FailureDisposition::Retry(second) = disposition else {
            panic!("second failure should schedule a retry");
        };
        assert_eq!(second, next + ChronoDuration::milliseconds(2000));

        delivery.begin_attempt(second);
        let disposition = delivery.mark_failed("HTTP 500".to_string(), None, &policy, second);
        assert_eq!(disposition, FailureDisposition::Exhausted);
        assert_eq!(delivery.status, DeliveryStatus::Failed);
        assert_eq!(delivery.attempts, 3);
        assert!(delivery.completed_at.is_some());
        assert!(!delivery.is_due(second + ChronoDuration::days(1)));
    }

    #[test]
    fn test_delivered_records_snapshot() {
        let mut delivery = test_delivery(RetryPolicy::default());
        let now = Utc::now();
        delivery.begin_attempt(now);
        delivery.mark_delivered(
            ResponseSnapshot {
                status: 200,
                headers: HashMap::new(),
                body: "ok".to_string(),
                duration_ms: 12,
            },
            now,
        );

        assert_eq!(delivery.status, DeliveryStatus::Delivered);
        assert_eq!(delivery.response.as_ref().unwrap().status, 200);
        assert!(delivery.error.is_none());
        assert!(delivery.completed_at.is_some());
    }

    #[test]
    fn test_cancel_only_from_non_terminal() {
        let mut delivery = test_delivery(RetryPolicy::default());
        let now = Utc::now();
        assert!(delivery.cancel("endpoint deleted", now));
        assert_eq!(delivery.status, DeliveryStatus::Cancelled);
        // Already terminal: no transition out
        assert!(!delivery.cancel("again", now));
        assert_eq!(delivery.status, DeliveryStatus::Cancelled);
    }

    #[test]
    fn test_non_2xx_snapshot_retained_on_failure() {
        let policy = RetryPolicy::default();
        let mut delivery = test_delivery(policy);
        let now = Utc::now();
        delivery.begin_attempt(now);
        delivery.mark_failed(
            "HTTP 503".to_string(),
            Some(ResponseSnapshot {
                status: 503,
                headers: HashMap::new(),
                body: "busy".to_string(),
                duration_ms: 40,
            }),
            &policy,
            now,
        );
        assert_eq!(delivery.response.as_ref().unwrap().status, 503);
        assert_eq!(delivery.error.as_deref(), Some("HTTP 503"));
    }
}
