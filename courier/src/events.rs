//! Event types and payload envelopes.
//!
//! Defines the closed set of domain events the platform emits and the
//! envelope structure distributed to subscribers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Envelope schema version sent in the payload and accepted by subscribers.
pub const ENVELOPE_VERSION: &str = "1";

/// Domain events that can be delivered over webhooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    // User lifecycle
    #[serde(rename = "user.created")]
    UserCreated,
    #[serde(rename = "user.updated")]
    UserUpdated,
    #[serde(rename = "user.deleted")]
    UserDeleted,

    // Wellness check-ins
    #[serde(rename = "wellness.mood_entry")]
    WellnessMoodEntry,
    #[serde(rename = "wellness.checkin_completed")]
    WellnessCheckinCompleted,
    #[serde(rename = "wellness.goal_achieved")]
    WellnessGoalAchieved,

    // Crisis alerts
    #[serde(rename = "crisis.alert_triggered")]
    CrisisAlertTriggered,
    #[serde(rename = "crisis.alert_resolved")]
    CrisisAlertResolved,
    #[serde(rename = "crisis.escalated")]
    CrisisEscalated,

    // Therapy session lifecycle
    #[serde(rename = "therapy.session_scheduled")]
    TherapySessionScheduled,
    #[serde(rename = "therapy.session_started")]
    TherapySessionStarted,
    #[serde(rename = "therapy.session_completed")]
    TherapySessionCompleted,
    #[serde(rename = "therapy.session_cancelled")]
    TherapySessionCancelled,

    // System and payment events
    #[serde(rename = "system.error")]
    SystemError,
    #[serde(rename = "system.performance_alert")]
    SystemPerformanceAlert,
    #[serde(rename = "payment.completed")]
    PaymentCompleted,
    #[serde(rename = "payment.failed")]
    PaymentFailed,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserCreated => "user.created",
            Self::UserUpdated => "user.updated",
            Self::UserDeleted => "user.deleted",
            Self::WellnessMoodEntry => "wellness.mood_entry",
            Self::WellnessCheckinCompleted => "wellness.checkin_completed",
            Self::WellnessGoalAchieved => "wellness.goal_achieved",
            Self::CrisisAlertTriggered => "crisis.alert_triggered",
            Self::CrisisAlertResolved => "crisis.alert_resolved",
            Self::CrisisEscalated => "crisis.escalated",
            Self::TherapySessionScheduled => "therapy.session_scheduled",
            Self::TherapySessionStarted => "therapy.session_started",
            Self::TherapySessionCompleted => "therapy.session_completed",
            Self::TherapySessionCancelled => "therapy.session_cancelled",
            Self::SystemError => "system.error",
            Self::SystemPerformanceAlert => "system.performance_alert",
            Self::PaymentCompleted => "payment.completed",
            Self::PaymentFailed => "payment.failed",
        }
    }

    /// Critical events bypass normal scheduler timing: the dispatcher is
    /// woken immediately rather than waiting for the next tick.
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            Self::CrisisAlertTriggered
                | Self::CrisisAlertResolved
                | Self::CrisisEscalated
                | Self::SystemError
                | Self::SystemPerformanceAlert
        )
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user.created" => Ok(Self::UserCreated),
            "user.updated" => Ok(Self::UserUpdated),
            "user.deleted" => Ok(Self::UserDeleted),
            "wellness.mood_entry" => Ok(Self::WellnessMoodEntry),
            "wellness.checkin_completed" => Ok(Self::WellnessCheckinCompleted),
            "wellness.goal_achieved" => Ok(Self::WellnessGoalAchieved),
            "crisis.alert_triggered" => Ok(Self::CrisisAlertTriggered),
            "crisis.alert_resolved" => Ok(Self::CrisisAlertResolved),
            "crisis.escalated" => Ok(Self::CrisisEscalated),
            "therapy.session_scheduled" => Ok(Self::TherapySessionScheduled),
            "therapy.session_started" => Ok(Self::TherapySessionStarted),
            "therapy.session_completed" => Ok(Self::TherapySessionCompleted),
            "therapy.session_cancelled" => Ok(Self::TherapySessionCancelled),
            "system.error" => Ok(Self::SystemError),
            "system.performance_alert" => Ok(Self::SystemPerformanceAlert),
            "payment.completed" => Ok(Self::PaymentCompleted),
            "payment.failed" => Ok(Self::PaymentFailed),
            _ => Err(format!("Unknown event type: {}", s)),
        }
    }
}

/// Priority attached to an event by the emitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

/// Metadata carried alongside the event data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Subsystem that produced the event (e.g. "checkin-service")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    /// Payload contains protected health information
    pub sensitive: bool,
    /// Payload data has been passed through the encryption boundary
    pub encrypted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
}

/// The immutable event record distributed to subscribers.
///
/// Serialized as the webhook request body:
/// `{id, event, timestamp, version, data, metadata}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventPayload {
    pub id: Uuid,
    pub event: EventType,
    pub timestamp: DateTime<Utc>,
    pub version: String,
    pub data: serde_json::Value,
    pub metadata: EventMetadata,
}

impl EventPayload {
    /// Build a new envelope with a generated id and the current timestamp.
    pub fn new(event: EventType, data: serde_json::Value, metadata: EventMetadata) -> Self {
        Self {
            id: Uuid::new_v4(),
            event,
            timestamp: Utc::now(),
            version: ENVELOPE_VERSION.to_string(),
            data,
            metadata,
        }
    }
}
