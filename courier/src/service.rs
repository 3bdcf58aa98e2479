//! The webhook service: event emission, endpoint administration and queries.
//!
//! A [`WebhookService`] is constructed once by the host application and
//! passed by handle wherever events are produced; there is no ambient global
//! instance. Cloning is cheap — all state is shared behind `Arc`s, and the
//! dispatcher operates on a clone of the same handle.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Notify;
use tracing::instrument;
use uuid::Uuid;

use crate::alerts::{Alert, AlertDraft, AlertManager, AlertType, Severity};
use crate::config::CourierConfig;
use crate::delivery::{Delivery, DeliveryId};
use crate::encrypt::{Encryptor, NoopEncryptor};
use crate::endpoint::{EndpointCreate, EndpointId, EndpointRegistry, EndpointUpdate, WebhookEndpoint};
use crate::error::{Error, Result};
use crate::events::{EventMetadata, EventPayload, EventType, Priority};
use crate::logs::{DeliveryLog, LogStore};
use crate::metrics::WebhookMetrics;
use crate::queue::DeliveryQueue;
use crate::signing;

/// Result of a synthetic probe against one endpoint.
///
/// The probe is a side channel: it does not create a tracked delivery and
/// does not touch the endpoint's delivery counters.
#[derive(Debug, Clone, Serialize)]
pub struct EndpointTestResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

#[derive(Clone)]
pub struct WebhookService {
    pub(crate) config: Arc<CourierConfig>,
    pub(crate) registry: Arc<EndpointRegistry>,
    pub(crate) queue: Arc<DeliveryQueue>,
    pub(crate) logs: Arc<LogStore>,
    pub(crate) alerts: Arc<AlertManager>,
    pub(crate) event_counts: Arc<DashMap<EventType, u64>>,
    pub(crate) encryptor: Arc<dyn Encryptor>,
    /// Wakes the dispatcher out of its tick interval for critical events
    pub(crate) wake: Arc<Notify>,
}

impl WebhookService {
    pub fn new(config: CourierConfig) -> Self {
        Self {
            registry: Arc::new(EndpointRegistry::new()),
            queue: Arc::new(DeliveryQueue::new()),
            logs: Arc::new(LogStore::new(config.log_capacity)),
            alerts: Arc::new(AlertManager::new(config.alert_capacity)),
            event_counts: Arc::new(DashMap::new()),
            encryptor: Arc::new(NoopEncryptor),
            wake: Arc::new(Notify::new()),
            config: Arc::new(config),
        }
    }

    /// Replace the encryption boundary. The default is a no-op.
    pub fn with_encryptor(mut self, encryptor: Arc<dyn Encryptor>) -> Self {
        self.encryptor = encryptor;
        self
    }

    // ===== Endpoint administration =====

    pub fn create_endpoint(&self, request: EndpointCreate) -> Result<WebhookEndpoint> {
        self.registry.create(request)
    }

    pub fn update_endpoint(&self, id: EndpointId, request: EndpointUpdate) -> Result<WebhookEndpoint> {
        self.registry.update(id, request)
    }

    /// Delete an endpoint and purge its queued deliveries.
    pub fn delete_endpoint(&self, id: EndpointId) -> bool {
        let removed = self.registry.delete(id);
        if removed {
            let purged = self.queue.purge_endpoint(id);
            if purged > 0 {
                tracing::debug!(endpoint_id = %id, count = purged, "Purged queued deliveries for deleted endpoint");
            }
        }
        removed
    }

    pub fn get_endpoint(&self, id: EndpointId) -> Option<WebhookEndpoint> {
        self.registry.get(id)
    }

    pub fn list_endpoints(&self) -> Vec<WebhookEndpoint> {
        self.registry.list()
    }

    pub fn rotate_endpoint_secret(&self, id: EndpointId) -> Result<WebhookEndpoint> {
        self.registry.rotate_secret(id)
    }

    // ===== Event emission =====

    /// Emit a domain event, fanning out one pending delivery per matching
    /// endpoint. Returns the created delivery ids.
    ///
    /// Fire-and-forget: the caller does not block on delivery outcome.
    /// Critical events wake the dispatcher instead of waiting for the next
    /// scheduler tick.
    #[instrument(skip(self, data, metadata), fields(event = %event))]
    pub fn emit(&self, event: EventType, data: Value, mut metadata: EventMetadata) -> Result<Vec<DeliveryId>> {
        if metadata.environment.is_none() {
            metadata.environment = Some(self.config.compliance.environment.clone());
        }

        let envelope = EventPayload::new(event, data, metadata);
        let envelope_json = serde_json::to_value(&envelope)?;

        *self.event_counts.entry(event).or_insert(0) += 1;

        let mut delivery_ids = Vec::new();
        for endpoint in self.registry.list() {
            if !endpoint.accepts_event(event) || !endpoint.matches_filters(&envelope_json) {
                continue;
            }
            let delivery = Delivery::new(&endpoint, envelope.clone());
            delivery_ids.push(delivery.id);
            self.queue.push(delivery);
        }

        tracing::debug!(
            event = %event,
            payload_id = %envelope.id,
            deliveries = delivery_ids.len(),
            "Event emitted"
        );

        if event.is_critical() {
            self.wake.notify_one();
        }

        Ok(delivery_ids)
    }

    /// Emit a wellness event. The payload is always marked sensitive and is
    /// encrypted when the compliance flag is enabled.
    pub fn emit_wellness(&self, event: EventType, data: Value, mut metadata: EventMetadata) -> Result<Vec<DeliveryId>> {
        metadata.sensitive = true;
        let data = self.apply_encryption(data, &mut metadata, false)?;
        self.emit(event, data, metadata)
    }

    /// Emit a crisis event. Always sensitive, always encrypted regardless of
    /// the compliance flag, priority critical — and raises one critical
    /// security alert synchronously, independent of queue processing.
    pub fn emit_crisis(&self, event: EventType, data: Value, mut metadata: EventMetadata) -> Result<Vec<DeliveryId>> {
        metadata.sensitive = true;
        metadata.priority = Some(Priority::Critical);
        let data = self.apply_encryption(data, &mut metadata, true)?;

        self.alerts.raise(AlertDraft {
            alert_type: AlertType::SecurityIssue,
            severity: Severity::Critical,
            title: format!("Crisis event emitted: {}", event),
            description: match metadata.user_id.as_deref() {
                Some(user_id) => format!("crisis event {} for user {}", event, user_id),
                None => format!("crisis event {}", event),
            },
            endpoint_id: None,
            delivery_id: None,
        });

        self.emit(event, data, metadata)
    }

    /// Emit a therapy-session event on behalf of a client. Sensitive, keyed
    /// by the client as subject, encrypted per the compliance flag.
    pub fn emit_therapy(
        &self,
        event: EventType,
        client_id: impl Into<String>,
        data: Value,
        mut metadata: EventMetadata,
    ) -> Result<Vec<DeliveryId>> {
        metadata.sensitive = true;
        metadata.user_id = Some(client_id.into());
        let data = self.apply_encryption(data, &mut metadata, false)?;
        self.emit(event, data, metadata)
    }

    /// Run data through the encryption boundary when required. Failures
    /// surface to the caller; the event is never silently dropped.
    fn apply_encryption(&self, data: Value, metadata: &mut EventMetadata, force: bool) -> Result<Value> {
        if !force && !self.config.compliance.encrypt_sensitive_payloads {
            return Ok(data);
        }
        let encrypted = self.encryptor.encrypt(&data)?;
        metadata.encrypted = true;
        Ok(encrypted)
    }

    // ===== Queries =====

    /// Current state of a non-terminal delivery. Terminal deliveries are
    /// discarded from the queue; their outcome lives on in the log stream.
    pub fn delivery_status(&self, id: DeliveryId) -> Option<Delivery> {
        self.queue.get(id)
    }

    /// Recompute the aggregate metrics view.
    pub fn metrics(&self) -> WebhookMetrics {
        let events_emitted: HashMap<String, u64> = self
            .event_counts
            .iter()
            .map(|entry| (entry.key().as_str().to_string(), *entry.value()))
            .collect();
        WebhookMetrics::compute(&self.registry.list(), &self.logs.snapshot(), events_emitted)
    }

    pub fn logs(&self, limit: usize) -> Vec<DeliveryLog> {
        self.logs.recent(limit)
    }

    pub fn alerts(&self, acknowledged: Option<bool>) -> Vec<Alert> {
        self.alerts.list(acknowledged)
    }

    pub fn acknowledge_alert(&self, id: Uuid) -> bool {
        self.alerts.acknowledge(id)
    }

    /// Send a signed synthetic event to one endpoint and report the outcome.
    ///
    /// A side-channel probe: no delivery record is created and the
    /// endpoint's counters are left untouched.
    #[instrument(skip(self), fields(endpoint_id = %endpoint_id))]
    pub async fn test_endpoint(&self, endpoint_id: EndpointId, event: EventType) -> Result<EndpointTestResult> {
        let endpoint = self
            .registry
            .get(endpoint_id)
            .ok_or(Error::EndpointNotFound(endpoint_id))?;

        let payload = EventPayload::new(
            event,
            serde_json::json!({"test": true}),
            EventMetadata {
                source: Some("endpoint-test".to_string()),
                environment: Some(self.config.compliance.environment.clone()),
                ..Default::default()
            },
        );
        let body = serde_json::to_string(&payload)?;

        let algorithm = self.config.dispatcher.signature_algorithm;
        let signature = signing::sign_payload(algorithm, &endpoint.secret, body.as_bytes());

        let client = reqwest::Client::new();
        let start = Instant::now();

        let result = client
            .post(&endpoint.url)
            .header("Content-Type", "application/json")
            .header("User-Agent", &self.config.dispatcher.user_agent)
            .header(algorithm.header_name(), &signature)
            .header("X-Webhook-Timestamp", payload.timestamp.timestamp().to_string())
            .header("X-Webhook-Event", event.as_str())
            .header("X-Webhook-ID", payload.id.to_string())
            .body(body)
            .timeout(endpoint.timeout)
            .send()
            .await;

        let duration_ms = start.elapsed().as_millis() as u64;

        Ok(match result {
            Ok(response) => {
                let status = response.status();
                let success = status.is_success();
                EndpointTestResult {
                    success,
                    status_code: Some(status.as_u16()),
                    error: if success { None } else { Some(format!("HTTP {}", status.as_u16())) },
                    duration_ms,
                }
            }
            Err(e) => EndpointTestResult {
                success: false,
                status_code: None,
                error: Some(e.to_string()),
                duration_ms,
            },
        })
    }
}
