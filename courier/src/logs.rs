//! Bounded ring buffer of per-attempt delivery logs.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::delivery::DeliveryId;
use crate::endpoint::EndpointId;
use crate::events::EventPayload;

/// Outcome of one delivery attempt as recorded in the log stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutcome {
    /// Attempt delivered (2xx)
    Success,
    /// Attempt failed terminally (exhausted or cancelled)
    Failure,
    /// Attempt failed; a retry is scheduled
    Retry,
    /// Attempt timed out at the endpoint's deadline
    Timeout,
}

/// Append-only record of one delivery attempt.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryLog {
    pub id: Uuid,
    pub delivery_id: DeliveryId,
    pub endpoint_id: EndpointId,
    pub outcome: LogOutcome,
    /// 1-based attempt number this entry describes
    pub attempt: u32,
    pub response_status: Option<u16>,
    pub response_time_ms: Option<u64>,
    pub error: Option<String>,
    /// The envelope as sent, embedded for diagnostics
    pub payload: EventPayload,
    pub timestamp: DateTime<Utc>,
}

/// Rolling window of the most recent delivery logs.
pub struct LogStore {
    entries: RwLock<VecDeque<DeliveryLog>>,
    capacity: usize,
}

impl LogStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
        }
    }

    /// Append an entry, evicting the oldest past capacity.
    pub fn append(&self, entry: DeliveryLog) {
        let mut entries = self.entries.write();
        entries.push_back(entry);
        while entries.len() > self.capacity {
            entries.pop_front();
        }
    }

    /// Most recent entries first, up to `limit`.
    pub fn recent(&self, limit: usize) -> Vec<DeliveryLog> {
        self.entries.read().iter().rev().take(limit).cloned().collect()
    }

    /// Full window, oldest first. Used for metric recomputation.
    pub fn snapshot(&self) -> Vec<DeliveryLog> {
        self.entries.read().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventMetadata, EventType};

    fn entry(attempt: u32) -> DeliveryLog {
        DeliveryLog {
            id: Uuid::new_v4(),
            delivery_id: Uuid::new_v4(),
            endpoint_id: Uuid::new_v4(),
            outcome: LogOutcome::Retry,
            attempt,
            response_status: Some(500),
            response_time_ms: Some(18),
            error: Some("HTTP 500".to_string()),
            payload: EventPayload::new(
                EventType::WellnessMoodEntry,
                serde_json::json!({}),
                EventMetadata::default(),
            ),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_ring_buffer_evicts_oldest() {
        let store = LogStore::new(3);
        for attempt in 1..=5 {
            store.append(entry(attempt));
        }

        assert_eq!(store.len(), 3);
        let recent = store.recent(10);
        assert_eq!(recent.len(), 3);
        // Most recent first
        assert_eq!(recent[0].attempt, 5);
        assert_eq!(recent[2].attempt, 3);
    }

    #[test]
    fn test_recent_respects_limit() {
        let store = LogStore::new(10);
        for attempt in 1..=4 {
            store.append(entry(attempt));
        }
        assert_eq!(store.recent(2).len(), 2);
        assert_eq!(store.recent(2)[0].attempt, 4);
    }
}
