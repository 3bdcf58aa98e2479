//! Webhook delivery subsystem for wellness platform events.
//!
//! This crate turns internal domain events (user lifecycle, wellness
//! check-ins, crisis alerts, therapy-session lifecycle, system/payment
//! events) into signed HTTP callbacks delivered reliably to registered
//! endpoints:
//! - Delivery state machine with exponential backoff retries
//! - Concurrency-capped queue processing with backpressure
//! - HMAC payload signing (`X-Webhook-Signature-256: sha256=<hex>`)
//! - Compliance-aware payload encryption behind a pluggable boundary
//! - Derived metrics, a bounded delivery log, and structured alerting
//!
//! # Example
//! ```ignore
//! use courier::{CourierConfig, Dispatcher, EventMetadata, EventType, WebhookService};
//! use tokio_util::sync::CancellationToken;
//!
//! let service = WebhookService::new(CourierConfig::default());
//! let shutdown = CancellationToken::new();
//! Dispatcher::spawn(service.clone(), shutdown.clone());
//!
//! service.create_endpoint(endpoint_config)?;
//! let delivery_ids = service.emit(
//!     EventType::WellnessMoodEntry,
//!     serde_json::json!({"mood": 7}),
//!     EventMetadata::default(),
//! )?;
//! ```

pub mod alerts;
pub mod config;
pub mod delivery;
pub mod dispatcher;
pub mod encrypt;
pub mod endpoint;
pub mod error;
pub mod events;
pub mod filter;
pub mod logs;
pub mod metrics;
pub mod queue;
pub mod service;
pub mod signing;

// Re-export commonly used types
pub use alerts::{Alert, AlertType, Severity};
pub use config::{ComplianceConfig, CourierConfig, DispatcherConfig};
pub use delivery::{Delivery, DeliveryId, DeliveryStatus, ResponseSnapshot};
pub use dispatcher::Dispatcher;
pub use encrypt::{Encryptor, NoopEncryptor};
pub use endpoint::{EndpointCreate, EndpointId, EndpointUpdate, RateLimit, RetryPolicy, WebhookEndpoint};
pub use error::{Error, Result};
pub use events::{EventMetadata, EventPayload, EventType, Priority};
pub use filter::{ConditionOperator, FieldCondition};
pub use logs::{DeliveryLog, LogOutcome};
pub use metrics::WebhookMetrics;
pub use service::{EndpointTestResult, WebhookService};
pub use signing::{SignatureAlgorithm, generate_secret, sign_payload, verify_signature};
