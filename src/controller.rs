// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Controller lifecycle: cache sync, event processing and shutdown.

use crate::cache::{CacheEvents, ObjectCache};
use crate::config::Config;
use crate::error::{Result, SyncError};
use crate::sync::{Classifier, EventRouter, KubeSecretApi, Replicator, SecretApi, SecretSyncHandler};
use crate::types::ControllerState;
use kube::Client;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Owns the pipeline's lifecycle. The event chain only runs while the
/// state is [`ControllerState::Running`].
pub struct Controller {
    config: Arc<Config>,
    state: watch::Sender<ControllerState>,
}

impl Controller {
    pub fn new(config: Config) -> Self {
        let (state, _) = watch::channel(ControllerState::Initializing);
        Self {
            config: Arc::new(config),
            state,
        }
    }

    pub fn state(&self) -> ControllerState {
        *self.state.borrow()
    }

    /// Observe lifecycle transitions
    pub fn subscribe(&self) -> watch::Receiver<ControllerState> {
        self.state.subscribe()
    }

    fn transition(&self, next: ControllerState) {
        let current = self.state();
        if !current.can_transition_to(next) {
            warn!("Ignoring invalid state transition {} -> {}", current, next);
            return;
        }
        info!("Controller state: {} -> {}", current, next);
        self.state.send_replace(next);
    }

    fn check_config(&self) -> Result<()> {
        if let Err(e) = self.config.validate() {
            error!("Refusing to start: {}", e);
            self.transition(ControllerState::Stopped);
            return Err(e);
        }
        Ok(())
    }

    /// Watch the cluster and replicate until `shutdown` is cancelled.
    /// Returns an error if the caches never synced.
    pub async fn run(&self, client: Client, shutdown: CancellationToken) -> Result<()> {
        self.check_config()?;
        let (cache, writers) = ObjectCache::new();
        let (events, watches) = writers.spawn(client.clone(), self.config.resync_period);
        let api: Arc<dyn SecretApi> = Arc::new(KubeSecretApi::new(client));

        self.run_pipeline(cache, events, watches, api, shutdown).await
    }

    /// Drive an already started cache through the lifecycle.
    pub async fn run_pipeline(
        &self,
        cache: ObjectCache,
        events: CacheEvents,
        watches: Vec<JoinHandle<()>>,
        api: Arc<dyn SecretApi>,
        shutdown: CancellationToken,
    ) -> Result<()> {
        if let Err(e) = self.check_config() {
            stop_watches(&watches);
            return Err(e);
        }
        self.transition(ControllerState::WaitingForSync);
        info!("Waiting for cache sync");

        let waited = tokio::select! {
            _ = shutdown.cancelled() => None,
            r = tokio::time::timeout(self.config.sync_timeout, cache.wait_until_synced()) => Some(r),
        };

        let synced = match waited {
            None => {
                info!("Received stop signal before caches synced");
                self.transition(ControllerState::ShuttingDown);
                stop_watches(&watches);
                self.transition(ControllerState::Stopped);
                return Ok(());
            }
            Some(Ok(r)) => r,
            Some(Err(_)) => Err(SyncError::SyncTimeout(self.config.sync_timeout)),
        };

        if let Err(e) = synced {
            error!("Cache sync failed, no events were processed: {}", e);
            stop_watches(&watches);
            self.transition(ControllerState::Stopped);
            return Err(e);
        }

        info!("Caches are synced");
        self.transition(ControllerState::Running);

        let replicator = Replicator::new(self.config.clone(), cache.clone(), api);
        let handler = SecretSyncHandler::new(
            Classifier::new(&self.config),
            replicator,
            cache.clone(),
            self.config.prune_replicas,
        );
        let router = EventRouter::new(Arc::new(handler), cache, self.config.clone());
        let mut router_task = tokio::spawn(router.run(events, shutdown.clone()));

        let router_ended = tokio::select! {
            _ = shutdown.cancelled() => false,
            _ = &mut router_task => true,
        };

        self.transition(ControllerState::ShuttingDown);
        stop_watches(&watches);
        if !router_ended {
            info!("Received stop signal, waiting for in-flight work");
            if let Err(e) = router_task.await {
                error!("Event router failed: {}", e);
            }
        }
        self.transition(ControllerState::Stopped);

        if router_ended {
            error!("Cache watches ended unexpectedly");
            return Err(SyncError::CacheClosed);
        }
        Ok(())
    }
}

fn stop_watches(watches: &[JoinHandle<()>]) {
    for w in watches {
        w.abort();
    }
}
