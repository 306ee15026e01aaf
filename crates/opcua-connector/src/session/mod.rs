// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Sessions and their lifecycle.
//!
//! A [`Session`] wraps one connected [`StackSession`] together with the
//! subscription bookkeeping for that connection. Sessions are created by
//! the [`registry::ConnectionRegistry`] through [`builder::SessionBuilder`]
//! and shared behind `Arc`; dropping the last handle does not disconnect,
//! the registry owns the lifecycle.

pub mod builder;
pub mod registry;

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::ConfigKey;
use crate::error::UaResult;
use crate::subscription::SubscriptionTracker;
use crate::transport::{
    DataChangeNotification, MonitoredItemCreateRequest, MonitoredItemHandle, MonitoredItemId,
    StackSession, StatusCode, SubscriptionId, SubscriptionSettings, TimestampsToReturn,
    ValueConsumer,
};

/// One connected session with its subscription state.
pub struct Session {
    key: ConfigKey,
    name: String,
    endpoint_url: String,
    stack: Box<dyn StackSession>,
    tracker: SubscriptionTracker,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("key", &self.key)
            .field("name", &self.name)
            .field("endpoint_url", &self.endpoint_url)
            .field("subscriptions", &self.tracker.len())
            .finish_non_exhaustive()
    }
}

impl Session {
    pub(crate) fn new(
        key: ConfigKey,
        name: String,
        endpoint_url: String,
        stack: Box<dyn StackSession>,
    ) -> Self {
        Self {
            key,
            name,
            endpoint_url,
            stack,
            tracker: SubscriptionTracker::new(),
        }
    }

    /// Returns the configuration key this session was created for.
    pub fn key(&self) -> &ConfigKey {
        &self.key
    }

    /// Returns the display name of the server configuration.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the endpoint URL the session is connected to.
    pub fn endpoint_url(&self) -> &str {
        &self.endpoint_url
    }

    /// Returns the subscription state of this session.
    pub fn tracker(&self) -> &SubscriptionTracker {
        &self.tracker
    }

    /// Closes the session.
    pub async fn disconnect(&self) -> UaResult<()> {
        debug!(endpoint_url = self.endpoint_url, "disconnecting session");
        self.stack.disconnect().await?;
        debug!(endpoint_url = self.endpoint_url, "disconnected session");
        Ok(())
    }

    /// Creates a subscription and registers it with the tracker.
    pub async fn create_subscription(
        &self,
        settings: &SubscriptionSettings,
    ) -> UaResult<SubscriptionId> {
        let subscription_id = self.stack.create_subscription(settings).await?;
        self.tracker.register(subscription_id);
        debug!(
            session = self.name,
            subscription = %subscription_id,
            interval_ms = settings.publishing_interval_ms,
            "created subscription"
        );
        Ok(subscription_id)
    }

    /// Deletes a subscription and drops its tracked items.
    pub async fn delete_subscription(
        &self,
        subscription_id: SubscriptionId,
    ) -> UaResult<StatusCode> {
        let status = self.stack.delete_subscription(subscription_id).await?;
        self.tracker.remove_subscription(subscription_id);
        debug!(
            session = self.name,
            subscription = %subscription_id,
            status = %status,
            "deleted subscription"
        );
        Ok(status)
    }

    /// Creates monitored items on a registered subscription.
    ///
    /// Servers return both timestamps for every notification. Each value
    /// change is forwarded into `sink` without blocking: when the channel
    /// is full or closed the notification is dropped with a warning,
    /// because the stack delivers values from its own task and must never
    /// be stalled by a slow consumer.
    pub async fn create_monitored_items(
        &self,
        subscription_id: SubscriptionId,
        requests: Vec<MonitoredItemCreateRequest>,
        sink: mpsc::Sender<DataChangeNotification>,
    ) -> UaResult<Vec<MonitoredItemHandle>> {
        self.tracker.lookup(subscription_id)?;
        debug!(
            session = self.name,
            subscription = %subscription_id,
            count = requests.len(),
            "creating monitored items"
        );

        let session_name = self.name.clone();
        let consumer: ValueConsumer = Arc::new(move |notification: DataChangeNotification| {
            if let Err(e) = sink.try_send(notification) {
                warn!(
                    session = session_name,
                    error = %e,
                    "dropping data change notification; consumer channel unavailable"
                );
            }
        });

        let handles = self
            .stack
            .create_monitored_items(
                subscription_id,
                TimestampsToReturn::Both,
                requests,
                consumer,
            )
            .await?;
        for handle in &handles {
            self.tracker.add(subscription_id, handle.clone());
        }
        debug!(
            session = self.name,
            subscription = %subscription_id,
            created = handles.len(),
            "created monitored items"
        );
        Ok(handles)
    }

    /// Deletes monitored items from a registered subscription.
    ///
    /// Returns one status per requested item, in request order.
    pub async fn delete_monitored_items(
        &self,
        subscription_id: SubscriptionId,
        item_ids: &[MonitoredItemId],
    ) -> UaResult<Vec<StatusCode>> {
        self.tracker.lookup(subscription_id)?;
        debug!(
            session = self.name,
            subscription = %subscription_id,
            count = item_ids.len(),
            "deleting monitored items"
        );
        let statuses = self
            .stack
            .delete_monitored_items(subscription_id, item_ids)
            .await?;
        for item_id in item_ids {
            self.tracker.remove(subscription_id, *item_id);
        }
        Ok(statuses)
    }
}
