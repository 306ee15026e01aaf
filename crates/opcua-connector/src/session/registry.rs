// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Connection registry: one shared session per server configuration.
//!
//! Sessions are expensive to establish, so the registry caches them by
//! [`ConfigKey`] and hands out `Arc` clones. Concurrent first requests
//! for the same key are serialized through a per-key async mutex; the
//! loser of the race finds the winner's session in the cache and no
//! second connection is ever made. `connect` runs exactly once per
//! session: a session whose connect failed is disconnected to stop any
//! stack-internal retry loop and then discarded.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::{ApplicationIdentity, ConfigKey, ServerConfig};
use crate::certificate::trust::TrustValidator;
use crate::error::UaResult;
use crate::session::builder::SessionBuilder;
use crate::session::Session;
use crate::transport::{SubscriptionEvent, UaStack, WorkflowEvent};

/// Caches one connected [`Session`] per server configuration.
pub struct ConnectionRegistry {
    stack: Arc<dyn UaStack>,
    identity: ApplicationIdentity,
    validator: Arc<TrustValidator>,
    workflow_tx: mpsc::UnboundedSender<WorkflowEvent>,
    sessions: Mutex<HashMap<ConfigKey, Arc<Session>>>,
    connect_locks: Mutex<HashMap<ConfigKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl ConnectionRegistry {
    /// Creates a registry.
    ///
    /// `workflow_tx` receives [`WorkflowEvent`]s the application must act
    /// on, such as subscription recreation requests.
    pub fn new(
        stack: Arc<dyn UaStack>,
        identity: ApplicationIdentity,
        validator: Arc<TrustValidator>,
        workflow_tx: mpsc::UnboundedSender<WorkflowEvent>,
    ) -> Self {
        Self {
            stack,
            identity,
            validator,
            workflow_tx,
            sessions: Mutex::new(HashMap::new()),
            connect_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the cached session for `config`, connecting if needed.
    ///
    /// A cache hit returns the existing session untouched; no
    /// re-validation, no network traffic. On a miss the configuration is
    /// validated, built and connected while holding the per-key lock, so
    /// concurrent callers for the same key share one connect attempt.
    pub async fn get_or_create(&self, config: &ServerConfig) -> UaResult<Arc<Session>> {
        if let Some(session) = self.sessions.lock().get(&config.key).cloned() {
            debug!(config = %config.key, "reusing cached session");
            return Ok(session);
        }

        let lock = self.connect_lock(&config.key);
        let _guard = lock.lock().await;

        // A concurrent caller may have connected while we waited.
        if let Some(session) = self.sessions.lock().get(&config.key).cloned() {
            debug!(config = %config.key, "session appeared while waiting for connect lock");
            return Ok(session);
        }

        let session = self.build_and_connect(config).await?;
        self.sessions
            .lock()
            .insert(config.key.clone(), session.clone());
        info!(
            config = %config.key,
            endpoint_url = session.endpoint_url(),
            "cached new session"
        );
        Ok(session)
    }

    /// Returns the cached session for a key without connecting.
    pub fn get(&self, key: &ConfigKey) -> Option<Arc<Session>> {
        self.sessions.lock().get(key).cloned()
    }

    /// Removes a session from the cache and disconnects it in the
    /// background, suppressing disconnect errors.
    ///
    /// Deleting an unknown key is a no-op.
    pub async fn delete(&self, key: &ConfigKey) {
        // The connect lock stays in place: a delete racing an in-flight
        // connect for the same key must keep serializing on the same lock.
        let removed = self.sessions.lock().remove(key);
        match removed {
            None => debug!(config = %key, "no cached session to delete"),
            Some(session) => {
                info!(config = %key, "removed session from cache");
                tokio::spawn(async move {
                    if let Err(e) = session.disconnect().await {
                        debug!(
                            endpoint_url = session.endpoint_url(),
                            error = %e,
                            "suppressed disconnect error during delete"
                        );
                    }
                });
            }
        }
    }

    /// Removes every session and disconnects each one.
    ///
    /// Disconnects are attempted independently; one failure does not
    /// prevent the others.
    pub async fn delete_all(&self) {
        let drained: Vec<(ConfigKey, Arc<Session>)> = {
            let mut sessions = self.sessions.lock();
            sessions.drain().collect()
        };
        for (key, session) in drained {
            info!(config = %key, "removed session from cache");
            if let Err(e) = session.disconnect().await {
                debug!(
                    config = %key,
                    error = %e,
                    "suppressed disconnect error during delete"
                );
            }
        }
    }

    /// Returns the number of cached sessions.
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Returns `true` if no session is cached.
    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    fn connect_lock(&self, key: &ConfigKey) -> Arc<tokio::sync::Mutex<()>> {
        self.connect_locks
            .lock()
            .entry(key.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    async fn build_and_connect(&self, config: &ServerConfig) -> UaResult<Arc<Session>> {
        let builder = SessionBuilder::new(
            self.stack.clone(),
            self.identity.clone(),
            self.validator.clone(),
        );
        let session_config = builder.build(config).await?;
        let endpoint_url = session_config.endpoint.endpoint_url.clone();

        let stack_session = self.stack.create_session(&session_config).await?;
        debug!(config = %config.key, endpoint_url, "connecting session");
        let connect_result = match tokio::time::timeout(
            session_config.request_timeout,
            stack_session.connect(),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(crate::error::UaError::connect(
                &endpoint_url,
                format!(
                    "connect did not complete within {:?}",
                    session_config.request_timeout
                ),
            )),
        };
        if let Err(connect_error) = connect_result {
            // Stop the stack from retrying a session nobody will use.
            debug!(
                config = %config.key,
                "connect failed; disconnecting to stop internal retries"
            );
            if let Err(e) = stack_session.disconnect().await {
                debug!(
                    config = %config.key,
                    error = %e,
                    "disconnect after failed connect also failed"
                );
            }
            connect_error.log("connect");
            return Err(connect_error);
        }
        debug!(config = %config.key, endpoint_url, "connected session");

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        stack_session.set_event_listener(event_tx);
        self.spawn_event_listener(config, event_rx);

        Ok(Arc::new(Session::new(
            config.key.clone(),
            config.name.clone(),
            endpoint_url,
            stack_session,
        )))
    }

    /// Consumes subscription lifecycle events for one session, logging
    /// them and turning transfer failures into recreation requests.
    fn spawn_event_listener(
        &self,
        config: &ServerConfig,
        mut events: mpsc::UnboundedReceiver<SubscriptionEvent>,
    ) {
        let name = config.name.clone();
        let key = config.key.clone();
        let workflow_tx = self.workflow_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    SubscriptionEvent::KeepAlive {
                        subscription_id,
                        publish_time,
                    } => {
                        debug!(
                            session = name,
                            subscription = %subscription_id,
                            publish_time = %publish_time,
                            "subscription keep-alive"
                        );
                    }
                    SubscriptionEvent::StatusChanged {
                        subscription_id,
                        status,
                    } => {
                        info!(
                            session = name,
                            subscription = %subscription_id,
                            status = %status,
                            "subscription status changed"
                        );
                    }
                    SubscriptionEvent::PublishFailure { message } => {
                        error!(session = name, error = message, "publish failure");
                    }
                    SubscriptionEvent::NotificationDataLost { subscription_id } => {
                        warn!(
                            session = name,
                            subscription = %subscription_id,
                            "notification data lost"
                        );
                    }
                    SubscriptionEvent::TransferFailed {
                        subscription_id,
                        status,
                    } => {
                        error!(
                            session = name,
                            subscription = %subscription_id,
                            status = %status,
                            "subscription transfer failed; requesting recreation"
                        );
                        let event = WorkflowEvent::RecreateSubscription {
                            key: key.clone(),
                            subscription_id,
                            status,
                        };
                        if workflow_tx.send(event).is_err() {
                            error!(
                                session = name,
                                subscription = %subscription_id,
                                "cannot request subscription recreation; workflow channel closed"
                            );
                        }
                    }
                }
            }
        });
    }
}
