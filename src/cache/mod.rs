// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Local mirror of cluster secrets and namespaces.

pub mod mirror;

pub use mirror::Mirror;

use crate::error::{Result, SyncError};
use crate::types::{Notification, ObjectKey};
use k8s_openapi::api::core::v1::{Namespace, Secret};
use kube::runtime::{reflector, reflector::Store, watcher, WatchStreamExt};
use kube::{Api, Client};
use kube_runtime::watcher::Config as WatcherConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Notification streams produced by the cache's apply loops
pub struct CacheEvents {
    pub secrets: mpsc::UnboundedReceiver<Notification<Secret>>,
    pub namespaces: mpsc::UnboundedReceiver<Notification<Namespace>>,
}

/// Read side of the mirror. Cheap to clone; readers get `Arc` snapshots and
/// never block the apply loops.
#[derive(Clone)]
pub struct ObjectCache {
    secrets: Store<Secret>,
    namespaces: Store<Namespace>,
    secrets_synced: watch::Receiver<bool>,
    namespaces_synced: watch::Receiver<bool>,
}

/// Write side of the mirror, consumed when the apply loops start.
pub struct CacheWriters {
    secrets: Mirror<Secret>,
    namespaces: Mirror<Namespace>,
}

impl ObjectCache {
    /// Create an empty cache and the writers that will fill it.
    pub fn new() -> (Self, CacheWriters) {
        let (secrets, secret_writer) = reflector::store();
        let (namespaces, namespace_writer) = reflector::store();
        let (secrets_synced_tx, secrets_synced) = watch::channel(false);
        let (namespaces_synced_tx, namespaces_synced) = watch::channel(false);

        let cache = Self {
            secrets,
            namespaces,
            secrets_synced,
            namespaces_synced,
        };
        let writers = CacheWriters {
            secrets: Mirror::new(secret_writer, secrets_synced_tx),
            namespaces: Mirror::new(namespace_writer, namespaces_synced_tx),
        };
        (cache, writers)
    }

    /// True once both kinds have completed their initial list.
    pub fn has_synced(&self) -> bool {
        *self.secrets_synced.borrow() && *self.namespaces_synced.borrow()
    }

    /// Resolve once both kinds have synced. Fails if an apply loop stops
    /// before its initial list completed.
    pub async fn wait_until_synced(&self) -> Result<()> {
        let mut secrets = self.secrets_synced.clone();
        let mut namespaces = self.namespaces_synced.clone();
        secrets
            .wait_for(|s| *s)
            .await
            .map_err(|_| SyncError::CacheClosed)?;
        namespaces
            .wait_for(|s| *s)
            .await
            .map_err(|_| SyncError::CacheClosed)?;
        Ok(())
    }

    pub fn list_namespaces(&self) -> Vec<Arc<Namespace>> {
        self.namespaces.state()
    }

    pub fn get_namespace(&self, name: &str) -> Option<Arc<Namespace>> {
        self.namespaces
            .get(&ObjectKey::cluster_scoped(name).object_ref())
    }

    pub fn get_secret(&self, namespace: &str, name: &str) -> Option<Arc<Secret>> {
        self.secrets
            .get(&ObjectKey::namespaced(namespace, name).object_ref())
    }

    /// All cached secrets in `namespace`
    pub fn list_secrets(&self, namespace: &str) -> Vec<Arc<Secret>> {
        self.secrets
            .state()
            .into_iter()
            .filter(|s| s.metadata.namespace.as_deref() == Some(namespace))
            .collect()
    }

    /// All cached secrets in every namespace
    pub fn all_secrets(&self) -> Vec<Arc<Secret>> {
        self.secrets.state()
    }
}

impl CacheWriters {
    /// Start one watch-apply loop per kind against the cluster.
    pub fn spawn(
        self,
        client: Client,
        resync_period: Duration,
    ) -> (CacheEvents, Vec<JoinHandle<()>>) {
        let secret_api: Api<Secret> = Api::all(client.clone());
        let namespace_api: Api<Namespace> = Api::all(client);

        let secret_stream = watcher(secret_api, WatcherConfig::default()).default_backoff();
        let namespace_stream =
            watcher(namespace_api, WatcherConfig::default()).default_backoff();

        self.spawn_streams(secret_stream, namespace_stream, resync_period)
    }

    /// Start the apply loops on arbitrary watch streams.
    pub fn spawn_streams<S, N>(
        self,
        secret_stream: S,
        namespace_stream: N,
        resync_period: Duration,
    ) -> (CacheEvents, Vec<JoinHandle<()>>)
    where
        S: futures::Stream<Item = std::result::Result<watcher::Event<Secret>, watcher::Error>>
            + Send
            + 'static,
        N: futures::Stream<Item = std::result::Result<watcher::Event<Namespace>, watcher::Error>>
            + Send
            + 'static,
    {
        let (secret_tx, secrets) = mpsc::unbounded_channel();
        let (namespace_tx, namespaces) = mpsc::unbounded_channel();

        let handles = vec![
            tokio::spawn(self.secrets.run(secret_stream, secret_tx, resync_period)),
            tokio::spawn(
                self.namespaces
                    .run(namespace_stream, namespace_tx, resync_period),
            ),
        ];

        (
            CacheEvents {
                secrets,
                namespaces,
            },
            handles,
        )
    }
}
