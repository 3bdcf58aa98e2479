//! In-memory delivery queue.
//!
//! Holds every non-terminal delivery. The scheduler claims due items each
//! tick; claiming bumps `next_retry` by the claim timeout so a delivery
//! cannot be claimed twice while its HTTP attempt is in flight, and becomes
//! re-claimable if the result is never drained.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;

use crate::delivery::{Delivery, DeliveryId};
use crate::endpoint::EndpointId;

#[derive(Default)]
pub struct DeliveryQueue {
    deliveries: RwLock<HashMap<DeliveryId, Delivery>>,
}

impl DeliveryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a new delivery.
    pub fn push(&self, delivery: Delivery) {
        self.deliveries.write().insert(delivery.id, delivery);
    }

    /// Claim up to `limit` deliveries that are due at `now`.
    ///
    /// Claimed items stay in the queue with `next_retry` pushed out by
    /// `claim_timeout`; the returned clones reflect the bump.
    pub fn claim_due(&self, limit: usize, now: DateTime<Utc>, claim_timeout: Duration) -> Vec<Delivery> {
        let mut deliveries = self.deliveries.write();

        let due_ids: Vec<DeliveryId> = deliveries
            .values()
            .filter(|delivery| delivery.is_due(now))
            .take(limit)
            .map(|delivery| delivery.id)
            .collect();

        let reclaim_at = now
            + ChronoDuration::from_std(claim_timeout)
                .unwrap_or_else(|_| ChronoDuration::seconds(claim_timeout.as_secs() as i64));

        let mut claimed = Vec::with_capacity(due_ids.len());
        for id in due_ids {
            if let Some(delivery) = deliveries.get_mut(&id) {
                delivery.next_retry = Some(reclaim_at);
                claimed.push(delivery.clone());
            }
        }
        claimed
    }

    /// Write back a mutated delivery. Terminal stored entries are never
    /// overwritten, and purged deliveries are not resurrected.
    pub fn apply(&self, delivery: Delivery) -> bool {
        let mut deliveries = self.deliveries.write();
        match deliveries.get_mut(&delivery.id) {
            Some(existing) if !existing.status.is_terminal() => {
                *existing = delivery;
                true
            }
            _ => false,
        }
    }

    /// Drop a delivery, returning it if present.
    pub fn remove(&self, id: DeliveryId) -> Option<Delivery> {
        self.deliveries.write().remove(&id)
    }

    pub fn get(&self, id: DeliveryId) -> Option<Delivery> {
        self.deliveries.read().get(&id).cloned()
    }

    /// Drop every delivery addressed to the given endpoint, including any
    /// currently claimed. Returns how many were removed.
    pub fn purge_endpoint(&self, endpoint_id: EndpointId) -> usize {
        let mut deliveries = self.deliveries.write();
        let before = deliveries.len();
        deliveries.retain(|_, delivery| delivery.endpoint_id != endpoint_id);
        before - deliveries.len()
    }

    pub fn len(&self) -> usize {
        self.deliveries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.deliveries.read().is_empty()
    }
}
