//! Structured alerts for delivery failures and security-relevant events.
//!
//! Alerts are never auto-resolved; acknowledgment is the only state
//! transition.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::delivery::DeliveryId;
use crate::endpoint::EndpointId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    EndpointFailure,
    HighErrorRate,
    SlowDelivery,
    SecurityIssue,
    QuotaExceeded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// A raised alert.
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub id: Uuid,
    pub alert_type: AlertType,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub endpoint_id: Option<EndpointId>,
    pub delivery_id: Option<DeliveryId>,
    pub timestamp: DateTime<Utc>,
    pub acknowledged: bool,
}

/// Fields supplied when raising an alert.
#[derive(Debug, Clone)]
pub struct AlertDraft {
    pub alert_type: AlertType,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub endpoint_id: Option<EndpointId>,
    pub delivery_id: Option<DeliveryId>,
}

/// Bounded alert list with acknowledge-only transitions.
pub struct AlertManager {
    alerts: RwLock<VecDeque<Alert>>,
    capacity: usize,
}

impl AlertManager {
    pub fn new(capacity: usize) -> Self {
        Self {
            alerts: RwLock::new(VecDeque::new()),
            capacity,
        }
    }

    /// Append a new alert, evicting the oldest past capacity.
    pub fn raise(&self, draft: AlertDraft) -> Alert {
        let alert = Alert {
            id: Uuid::new_v4(),
            alert_type: draft.alert_type,
            severity: draft.severity,
            title: draft.title,
            description: draft.description,
            endpoint_id: draft.endpoint_id,
            delivery_id: draft.delivery_id,
            timestamp: Utc::now(),
            acknowledged: false,
        };

        tracing::warn!(
            alert_id = %alert.id,
            alert_type = ?alert.alert_type,
            severity = ?alert.severity,
            title = %alert.title,
            "Webhook alert raised"
        );

        let mut alerts = self.alerts.write();
        alerts.push_back(alert.clone());
        while alerts.len() > self.capacity {
            alerts.pop_front();
        }
        alert
    }

    /// Flip the acknowledged flag. Returns false for an unknown id.
    pub fn acknowledge(&self, id: Uuid) -> bool {
        let mut alerts = self.alerts.write();
        match alerts.iter_mut().find(|alert| alert.id == id) {
            Some(alert) => {
                alert.acknowledged = true;
                true
            }
            None => false,
        }
    }

    /// Alerts most recent first, optionally filtered by acknowledged state.
    pub fn list(&self, acknowledged: Option<bool>) -> Vec<Alert> {
        self.alerts
            .read()
            .iter()
            .rev()
            .filter(|alert| acknowledged.map_or(true, |wanted| alert.acknowledged == wanted))
            .cloned()
            .collect()
    }
}
