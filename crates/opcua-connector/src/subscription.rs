// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Subscription and monitored item bookkeeping.
//!
//! The tracker mirrors what the server knows about this session: which
//! subscriptions exist and which monitored items live in each of them.
//! It never talks to the network; the session updates it after each
//! successful service call, and recovery code reads it to recreate state
//! after a lost subscription.

use std::sync::Arc;

use dashmap::DashMap;

use crate::error::{SubscriptionError, UaResult};
use crate::transport::{MonitoredItemHandle, MonitoredItemId, SubscriptionId};

/// Concurrent table of the monitored items of one subscription.
pub type ItemTable = Arc<DashMap<MonitoredItemId, MonitoredItemHandle>>;

/// Per-session registry of subscriptions and their monitored items.
#[derive(Default)]
pub struct SubscriptionTracker {
    subscriptions: DashMap<SubscriptionId, ItemTable>,
}

impl SubscriptionTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscription, keeping existing items if it is
    /// already known.
    pub fn register(&self, subscription_id: SubscriptionId) -> ItemTable {
        self.subscriptions
            .entry(subscription_id)
            .or_insert_with(|| Arc::new(DashMap::new()))
            .clone()
    }

    /// Returns the item table of a registered subscription.
    ///
    /// Unknown subscriptions are an error: items can only be tracked
    /// under a subscription this tracker saw being created.
    pub fn lookup(&self, subscription_id: SubscriptionId) -> UaResult<ItemTable> {
        self.subscriptions
            .get(&subscription_id)
            .map(|table| table.clone())
            .ok_or_else(|| SubscriptionError::unknown(subscription_id.value()).into())
    }

    /// Records a monitored item under its subscription.
    ///
    /// Re-adding an item that is already tracked keeps the first entry.
    pub fn add(&self, subscription_id: SubscriptionId, item: MonitoredItemHandle) {
        let table = self.register(subscription_id);
        table.entry(item.id).or_insert(item);
    }

    /// Forgets a monitored item. Unknown items are ignored.
    pub fn remove(&self, subscription_id: SubscriptionId, item_id: MonitoredItemId) {
        if let Some(table) = self.subscriptions.get(&subscription_id) {
            table.remove(&item_id);
        }
    }

    /// Forgets a subscription and all its items.
    pub fn remove_subscription(&self, subscription_id: SubscriptionId) {
        self.subscriptions.remove(&subscription_id);
    }

    /// Returns the IDs of all tracked subscriptions.
    pub fn subscription_ids(&self) -> Vec<SubscriptionId> {
        self.subscriptions.iter().map(|entry| *entry.key()).collect()
    }

    /// Returns the tracked items of a registered subscription.
    pub fn items(&self, subscription_id: SubscriptionId) -> UaResult<Vec<MonitoredItemHandle>> {
        let table = self.lookup(subscription_id)?;
        Ok(table.iter().map(|entry| entry.value().clone()).collect())
    }

    /// Returns the number of tracked subscriptions.
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    /// Returns `true` if no subscription is tracked.
    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UaError;
    use crate::transport::{AttributeId, StatusCode};

    fn handle(id: u32, node: &str) -> MonitoredItemHandle {
        MonitoredItemHandle {
            id: MonitoredItemId::new(id),
            client_handle: id,
            node_id: node.to_string(),
            attribute_id: AttributeId::Value,
            status: StatusCode::GOOD,
            revised_sampling_interval_ms: 1_000.0,
            revised_queue_size: 10,
        }
    }

    #[test]
    fn lookup_of_unknown_subscription_fails() {
        let tracker = SubscriptionTracker::new();
        let error = tracker.lookup(SubscriptionId::new(9)).unwrap_err();
        assert!(matches!(
            error,
            UaError::Subscription(SubscriptionError::Unknown { id: 9 })
        ));
    }

    #[test]
    fn register_is_idempotent() {
        let tracker = SubscriptionTracker::new();
        let subscription = SubscriptionId::new(1);
        tracker.register(subscription);
        tracker.add(subscription, handle(1, "ns=2;s=A"));
        // A second register must not drop the existing items.
        tracker.register(subscription);
        assert_eq!(tracker.items(subscription).unwrap().len(), 1);
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn re_adding_an_item_keeps_the_first_entry() {
        let tracker = SubscriptionTracker::new();
        let subscription = SubscriptionId::new(1);
        tracker.add(subscription, handle(5, "ns=2;s=First"));
        tracker.add(subscription, handle(5, "ns=2;s=Second"));
        let items = tracker.items(subscription).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].node_id, "ns=2;s=First");
    }

    #[test]
    fn remove_of_unknown_item_is_a_no_op() {
        let tracker = SubscriptionTracker::new();
        let subscription = SubscriptionId::new(1);
        tracker.register(subscription);
        tracker.remove(subscription, MonitoredItemId::new(42));
        tracker.remove(SubscriptionId::new(99), MonitoredItemId::new(42));
        assert!(tracker.items(subscription).unwrap().is_empty());
    }

    #[test]
    fn remove_subscription_drops_its_items() {
        let tracker = SubscriptionTracker::new();
        let subscription = SubscriptionId::new(1);
        tracker.add(subscription, handle(1, "ns=2;s=A"));
        tracker.add(subscription, handle(2, "ns=2;s=B"));
        tracker.remove_subscription(subscription);
        assert!(tracker.is_empty());
        assert!(tracker.lookup(subscription).is_err());
    }

    #[test]
    fn subscriptions_are_tracked_independently() {
        let tracker = SubscriptionTracker::new();
        tracker.add(SubscriptionId::new(1), handle(1, "ns=2;s=A"));
        tracker.add(SubscriptionId::new(2), handle(1, "ns=2;s=A"));
        tracker.remove(SubscriptionId::new(1), MonitoredItemId::new(1));
        assert!(tracker.items(SubscriptionId::new(1)).unwrap().is_empty());
        assert_eq!(tracker.items(SubscriptionId::new(2)).unwrap().len(), 1);
    }
}
