//! Webhook dispatch: claim, sign, send, process results.
//!
//! ```text
//! dispatcher.tick()
//!   ├─ claim_and_send()
//!   │    ├─ queue.claim_due()              // due deliveries, claim-bumped
//!   │    └─ for each claimed delivery:
//!   │         ├─ cancel if endpoint gone/disabled
//!   │         ├─ defer if rate limit window is exhausted
//!   │         ├─ sign_payload()            // HMAC over the raw body
//!   │         └─ send_tx.try_send(request) ───────────────────────┐
//!   │                                                             │
//!   │              ┌──────────────────────────────────────────────┘
//!   │              ▼
//!   │         run_sender (spawned task):
//!   │              ├─ recv from send_rx
//!   │              ├─ acquire semaphore permit (caps concurrency)
//!   │              ├─ spawn HTTP POST with per-request timeout
//!   │              └─ result_tx.send(result) ────────────────────┐
//!   │                                                            │
//!   └─ drain_results()                                           │
//!        ├─ result_rx.try_recv() ◄──────────────────────────────┘
//!        └─ for each result:
//!             ├─ Success → mark_delivered + record_success + log
//!             └─ Failure → mark_failed (retry or exhaust) + alerts
//! ```
//!
//! The sender task has no registry access and no secrets — just HTTP in,
//! result out. The run loop is sequential, so ticks never overlap; unclaimed
//! results simply wait for the next drain. Critical events wake the loop out
//! of its tick interval through the service's `Notify`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::alerts::{AlertDraft, AlertType, Severity};
use crate::delivery::{Delivery, DeliveryId, FailureDisposition, ResponseSnapshot};
use crate::endpoint::{EndpointId, RateLimit};
use crate::events::EventType;
use crate::logs::{DeliveryLog, LogOutcome};
use crate::service::WebhookService;
use crate::signing;

// --- Channel types ---

/// A pre-built webhook HTTP request ready to send.
#[derive(Debug)]
struct SendRequest {
    url: String,
    headers: Vec<(String, String)>,
    body: String,
    timeout: Duration,
    delivery_id: DeliveryId,
    endpoint_id: EndpointId,
    event: EventType,
    attempt: u32,
}

/// Outcome of a single HTTP send attempt.
#[derive(Debug)]
enum SendOutcome {
    Success {
        status: u16,
        headers: HashMap<String, String>,
        body: String,
    },
    Failure {
        status: Option<u16>,
        body: Option<String>,
        error: String,
        timed_out: bool,
    },
}

/// Result of a send attempt, sent back via the result channel.
#[derive(Debug)]
struct SendResult {
    delivery_id: DeliveryId,
    endpoint_id: EndpointId,
    attempt: u32,
    duration_ms: u64,
    outcome: SendOutcome,
}

/// Fixed-window rate limit accounting for one endpoint.
struct RateWindow {
    started: DateTime<Utc>,
    sent: u32,
    alerted: bool,
}

// --- Dispatcher ---

pub struct Dispatcher {
    service: WebhookService,
    send_tx: mpsc::Sender<SendRequest>,
    result_rx: mpsc::Receiver<SendResult>,
    rate_windows: HashMap<EndpointId, RateWindow>,
}

impl Dispatcher {
    /// Create a new dispatcher and spawn the background sender task.
    pub fn new(service: WebhookService, shutdown: CancellationToken) -> Self {
        let config = &service.config.dispatcher;
        let (send_tx, send_rx) = mpsc::channel::<SendRequest>(config.channel_capacity);
        let (result_tx, result_rx) = mpsc::channel(config.channel_capacity);

        let http_client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .expect("Failed to create webhook HTTP client");

        tokio::spawn(run_sender(
            send_rx,
            result_tx,
            http_client,
            config.max_concurrent_deliveries,
            shutdown,
        ));

        Self {
            service,
            send_tx,
            result_rx,
            rate_windows: HashMap::new(),
        }
    }

    /// Construct a dispatcher and run its scheduler loop as a background task.
    pub fn spawn(service: WebhookService, shutdown: CancellationToken) -> JoinHandle<()> {
        let dispatcher = Self::new(service, shutdown.clone());
        tokio::spawn(dispatcher.run(shutdown))
    }

    /// Scheduler loop: tick on the configured interval, immediately when a
    /// critical event wakes the service's notifier, and apply send results
    /// as they come back.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.service.config.dispatcher.tick_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            let wake = self.service.wake.clone();
            tokio::select! {
                _ = interval.tick() => {
                    self.tick().await;
                }
                _ = wake.notified() => {
                    tracing::debug!("Dispatcher woken for critical event");
                    self.tick().await;
                }
                Some(result) = self.result_rx.recv() => {
                    self.handle_result(result);
                }
                _ = shutdown.cancelled() => {
                    tracing::debug!("Dispatcher received shutdown signal");
                    break;
                }
            }
        }
    }

    /// Run one dispatch cycle: claim → sign → send → process results.
    pub async fn tick(&mut self) {
        tracing::debug!("Webhook dispatcher tick");
        self.claim_and_send();
        self.drain_results();
    }

    /// Claim deliveries that are due, sign them, and push to the sender channel.
    fn claim_and_send(&mut self) {
        let now = Utc::now();
        let claimed = self.service.queue.claim_due(
            self.service.config.dispatcher.max_concurrent_deliveries,
            now,
            self.service.config.dispatcher.claim_timeout,
        );

        if claimed.is_empty() {
            tracing::debug!("No deliveries to claim");
            return;
        }

        ::metrics::counter!("courier_deliveries_claimed_total").increment(claimed.len() as u64);
        tracing::debug!(count = claimed.len(), "Claimed deliveries for sending");

        for mut delivery in claimed {
            // Endpoint deleted since the delivery was created. The purge on
            // delete normally removes these, but guard anyway.
            let Some(endpoint) = self.service.registry.get(delivery.endpoint_id) else {
                self.abandon(delivery, "endpoint not found", now);
                continue;
            };

            // Endpoint disabled since the delivery was created
            if !endpoint.enabled {
                self.abandon(delivery, "endpoint disabled", now);
                continue;
            }

            if let Some(limit) = endpoint.rate_limit {
                if !self.admit(endpoint.id, limit, now, &mut delivery) {
                    continue;
                }
            }

            delivery.begin_attempt(now);
            self.service.queue.apply(delivery.clone());

            let body = match serde_json::to_string(&delivery.payload) {
                Ok(body) => body,
                Err(e) => {
                    self.abandon(delivery, format!("failed to serialize payload: {e}"), now);
                    continue;
                }
            };

            let algorithm = self.service.config.dispatcher.signature_algorithm;
            let signature = signing::sign_payload(algorithm, &endpoint.secret, body.as_bytes());

            let mut headers: Vec<(String, String)> = vec![
                ("Content-Type".to_string(), "application/json".to_string()),
                (algorithm.header_name().to_string(), signature),
                ("X-Webhook-Timestamp".to_string(), now.timestamp().to_string()),
                ("X-Webhook-Event".to_string(), delivery.payload.event.as_str().to_string()),
                ("X-Webhook-ID".to_string(), delivery.payload.id.to_string()),
            ];
            for (name, value) in &endpoint.headers {
                headers.push((name.clone(), value.clone()));
            }
            if delivery.payload.metadata.sensitive {
                headers.push(("X-Sensitive-Data".to_string(), "true".to_string()));
                headers.push((
                    "X-Compliance".to_string(),
                    self.service.config.compliance.compliance_tag.clone(),
                ));
            }

            let request = SendRequest {
                url: endpoint.url.clone(),
                headers,
                body,
                timeout: endpoint.timeout,
                delivery_id: delivery.id,
                endpoint_id: endpoint.id,
                event: delivery.payload.event,
                attempt: delivery.attempts,
            };

            if let Err(e) = self.send_tx.try_send(request) {
                // The claim already bumped next_retry, so this delivery will
                // be re-claimed after the claim timeout.
                tracing::warn!(
                    delivery_id = %delivery.id,
                    "Failed to push to sender channel (will retry after claim timeout): {}",
                    e
                );
            }
        }
    }

    /// Drain completed send results that accumulated since the last cycle.
    fn drain_results(&mut self) {
        let mut drained = 0u32;
        while let Ok(result) = self.result_rx.try_recv() {
            drained += 1;
            self.handle_result(result);
        }

        if drained > 0 {
            tracing::debug!(count = drained, "Drained webhook send results");
        }
    }

    /// Advance one delivery's state machine from its send result.
    fn handle_result(&mut self, result: SendResult) {
        let now = Utc::now();

        // The delivery may have been purged (endpoint deleted) while the
        // send was in flight — nothing left to update.
        let Some(mut delivery) = self.service.queue.get(result.delivery_id) else {
            tracing::debug!(
                delivery_id = %result.delivery_id,
                "Delivery purged while in flight, dropping result"
            );
            return;
        };
        if delivery.status.is_terminal() {
            return;
        }

        match result.outcome {
            SendOutcome::Success { status, headers, body } => {
                ::metrics::counter!("courier_deliveries_total", "outcome" => "success").increment(1);
                delivery.mark_delivered(
                    ResponseSnapshot {
                        status,
                        headers,
                        body,
                        duration_ms: result.duration_ms,
                    },
                    now,
                );
                self.service.registry.record_success(delivery.endpoint_id, now);
                self.log_attempt(&delivery, LogOutcome::Success, Some(status), result.duration_ms, None);
                self.service.queue.remove(delivery.id);
                tracing::debug!(
                    endpoint_id = %result.endpoint_id,
                    delivery_id = %result.delivery_id,
                    status = status,
                    attempt = result.attempt,
                    "Webhook delivered successfully"
                );
            }
            SendOutcome::Failure {
                status,
                body,
                error,
                timed_out,
            } => {
                ::metrics::counter!("courier_deliveries_total", "outcome" => "failure").increment(1);
                let policy = self
                    .service
                    .registry
                    .get(delivery.endpoint_id)
                    .map(|endpoint| endpoint.retry_policy)
                    .unwrap_or_default();
                let snapshot = status.map(|status| ResponseSnapshot {
                    status,
                    headers: HashMap::new(),
                    body: body.unwrap_or_default(),
                    duration_ms: result.duration_ms,
                });

                let disposition = delivery.mark_failed(error.clone(), snapshot, &policy, now);
                let streak = self.service.registry.record_failure(delivery.endpoint_id, now);

                match disposition {
                    FailureDisposition::Retry(next_retry) => {
                        let outcome = if timed_out { LogOutcome::Timeout } else { LogOutcome::Retry };
                        self.log_attempt(&delivery, outcome, status, result.duration_ms, Some(&error));
                        self.service.queue.apply(delivery.clone());
                        tracing::warn!(
                            endpoint_id = %result.endpoint_id,
                            delivery_id = %result.delivery_id,
                            status = ?status,
                            error = %error,
                            next_retry = %next_retry,
                            "Webhook delivery failed, retry scheduled"
                        );
                    }
                    FailureDisposition::Exhausted => {
                        let outcome = if timed_out { LogOutcome::Timeout } else { LogOutcome::Failure };
                        self.log_attempt(&delivery, outcome, status, result.duration_ms, Some(&error));
                        self.service.queue.remove(delivery.id);
                        let url = self
                            .service
                            .registry
                            .get(delivery.endpoint_id)
                            .map(|endpoint| endpoint.url)
                            .unwrap_or_default();
                        self.service.alerts.raise(AlertDraft {
                            alert_type: AlertType::EndpointFailure,
                            severity: Severity::Medium,
                            title: format!("Webhook delivery to {} failed", url),
                            description: format!(
                                "delivery {} exhausted after {} attempts, last error: {}",
                                delivery.id, delivery.attempts, error
                            ),
                            endpoint_id: Some(delivery.endpoint_id),
                            delivery_id: Some(delivery.id),
                        });
                        tracing::warn!(
                            endpoint_id = %result.endpoint_id,
                            delivery_id = %result.delivery_id,
                            attempts = delivery.attempts,
                            error = %error,
                            "Webhook delivery exhausted"
                        );
                    }
                }

                if let Some(streak) = streak {
                    let threshold = self.service.config.dispatcher.failure_streak_threshold;
                    if streak == threshold {
                        self.service.alerts.raise(AlertDraft {
                            alert_type: AlertType::HighErrorRate,
                            severity: Severity::High,
                            title: format!("{} consecutive failures on one endpoint", streak),
                            description: format!(
                                "endpoint {} has failed {} deliveries in a row",
                                delivery.endpoint_id, streak
                            ),
                            endpoint_id: Some(delivery.endpoint_id),
                            delivery_id: None,
                        });
                    }
                }
            }
        }
    }

    /// Terminally cancel a delivery whose configuration is no longer valid.
    fn abandon(&self, mut delivery: Delivery, reason: impl Into<String>, now: DateTime<Utc>) {
        let reason = reason.into();
        tracing::warn!(
            delivery_id = %delivery.id,
            endpoint_id = %delivery.endpoint_id,
            reason = %reason,
            "Cancelling delivery"
        );
        delivery.cancel(reason.clone(), now);
        self.log_attempt(&delivery, LogOutcome::Failure, None, 0, Some(&reason));
        self.service.queue.remove(delivery.id);
    }

    /// Fixed-window rate limit check. A delivery that would exceed the
    /// window is deferred to the window's end without consuming an attempt.
    fn admit(&mut self, endpoint_id: EndpointId, limit: RateLimit, now: DateTime<Utc>, delivery: &mut Delivery) -> bool {
        let window = ChronoDuration::from_std(limit.window)
            .unwrap_or_else(|_| ChronoDuration::seconds(limit.window.as_secs() as i64));

        let entry = self.rate_windows.entry(endpoint_id).or_insert(RateWindow {
            started: now,
            sent: 0,
            alerted: false,
        });
        if now - entry.started >= window {
            entry.started = now;
            entry.sent = 0;
            entry.alerted = false;
        }

        if entry.sent >= limit.requests {
            let resume_at = entry.started + window;
            delivery.next_retry = Some(resume_at);
            self.service.queue.apply(delivery.clone());
            tracing::debug!(
                endpoint_id = %endpoint_id,
                delivery_id = %delivery.id,
                resume_at = %resume_at,
                "Rate limit window exhausted, deferring delivery"
            );
            if !entry.alerted {
                entry.alerted = true;
                self.service.alerts.raise(AlertDraft {
                    alert_type: AlertType::QuotaExceeded,
                    severity: Severity::Medium,
                    title: "Endpoint rate limit reached".to_string(),
                    description: format!(
                        "endpoint {} reached {} requests per {:?}, deliveries deferred",
                        endpoint_id, limit.requests, limit.window
                    ),
                    endpoint_id: Some(endpoint_id),
                    delivery_id: None,
                });
            }
            return false;
        }

        entry.sent += 1;
        true
    }

    fn log_attempt(
        &self,
        delivery: &Delivery,
        outcome: LogOutcome,
        response_status: Option<u16>,
        response_time_ms: u64,
        error: Option<&str>,
    ) {
        self.service.logs.append(DeliveryLog {
            id: uuid::Uuid::new_v4(),
            delivery_id: delivery.id,
            endpoint_id: delivery.endpoint_id,
            outcome,
            attempt: delivery.attempts,
            response_status,
            response_time_ms: if response_time_ms > 0 { Some(response_time_ms) } else { None },
            error: error.map(String::from),
            payload: delivery.payload.clone(),
            timestamp: Utc::now(),
        });
    }
}

// --- Sender task ---

/// Long-lived task that receives signed requests and performs HTTP delivery.
/// Has no registry access and no secrets — just HTTP in, result out.
async fn run_sender(
    mut rx: mpsc::Receiver<SendRequest>,
    result_tx: mpsc::Sender<SendResult>,
    http_client: reqwest::Client,
    max_concurrent_sends: usize,
    shutdown: CancellationToken,
) {
    let semaphore = Arc::new(Semaphore::new(max_concurrent_sends));

    loop {
        let request = tokio::select! {
            req = rx.recv() => {
                match req {
                    Some(r) => r,
                    None => {
                        tracing::debug!("Webhook sender channel closed, shutting down");
                        break;
                    }
                }
            }
            _ = shutdown.cancelled() => {
                tracing::debug!("Webhook sender received shutdown signal");
                break;
            }
        };

        let permit = match semaphore.clone().acquire_owned().await {
            Ok(p) => p,
            Err(_) => {
                tracing::warn!("Webhook sender semaphore closed");
                break;
            }
        };

        let client = http_client.clone();
        let tx = result_tx.clone();

        tokio::spawn(async move {
            let _permit = permit;

            tracing::debug!(
                delivery_id = %request.delivery_id,
                url = %request.url,
                event = %request.event,
                attempt = request.attempt,
                "Sending webhook HTTP request"
            );

            let start = std::time::Instant::now();

            let mut req_builder = client.post(&request.url).timeout(request.timeout);
            for (name, value) in &request.headers {
                req_builder = req_builder.header(name, value);
            }
            req_builder = req_builder.body(request.body);

            let outcome = match req_builder.send().await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    let success = response.status().is_success();
                    let headers: HashMap<String, String> = response
                        .headers()
                        .iter()
                        .map(|(name, value)| {
                            (
                                name.to_string(),
                                String::from_utf8_lossy(value.as_bytes()).to_string(),
                            )
                        })
                        .collect();
                    let body = response.text().await.unwrap_or_default();
                    if success {
                        SendOutcome::Success { status, headers, body }
                    } else {
                        SendOutcome::Failure {
                            status: Some(status),
                            body: Some(body),
                            error: format!("HTTP {}", status),
                            timed_out: false,
                        }
                    }
                }
                Err(e) => SendOutcome::Failure {
                    status: None,
                    body: None,
                    error: e.to_string(),
                    timed_out: e.is_timeout(),
                },
            };

            let result = SendResult {
                delivery_id: request.delivery_id,
                endpoint_id: request.endpoint_id,
                attempt: request.attempt,
                duration_ms: start.elapsed().as_millis() as u64,
                outcome,
            };

            if let Err(e) = tx.send(result).await {
                tracing::warn!(delivery_id = %request.delivery_id, "Failed to send webhook result back: {}", e);
            }
        });
    }

    tracing::debug!("Webhook sender task exited");
}
