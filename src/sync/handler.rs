// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Secret event handling, decoupled from the watch transport.

use crate::cache::ObjectCache;
use crate::sync::classifier::Classifier;
use crate::sync::replicator::Replicator;
use crate::sync::secrets::replica_source;
use crate::types::{DeletedObject, ObjectKey};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Receives routed secret events. Calls for the same key never overlap and
/// arrive in the order the cache observed them.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn on_add(&self, secret: Arc<Secret>);

    async fn on_update(&self, old: Arc<Secret>, new: Arc<Secret>);

    async fn on_delete(&self, deleted: DeletedObject<Secret>);

    /// Copy the secret `secret` into the newly created `namespace`
    async fn on_backfill(&self, secret: ObjectKey, namespace: String);
}

/// Replicates in-scope secrets and retracts replicas of deleted ones.
pub struct SecretSyncHandler {
    classifier: Classifier,
    replicator: Replicator,
    cache: ObjectCache,
    prune_replicas: bool,
}

impl SecretSyncHandler {
    pub fn new(
        classifier: Classifier,
        replicator: Replicator,
        cache: ObjectCache,
        prune_replicas: bool,
    ) -> Self {
        Self {
            classifier,
            replicator,
            cache,
            prune_replicas,
        }
    }

    async fn handle_secret_change(&self, secret: &Secret) {
        if !self.classifier.is_in_scope(secret) {
            if self.prune_replicas && replica_source(secret).is_some() {
                self.prune_if_orphaned(secret).await;
                return;
            }
            debug!(
                "Skipping secret {}/{}: not in scope",
                secret.namespace().unwrap_or_default(),
                secret.name_any()
            );
            return;
        }

        let report = self.replicator.replicate(secret).await;
        if !report.is_success() {
            warn!(
                "Secret {} not replicated to {:?}, will retry on next resync",
                secret.name_any(),
                report.failed
            );
        }
    }

    /// Replicas show up here on the initial list and on every resync, which
    /// catches sources deleted while nothing was watching.
    async fn prune_if_orphaned(&self, replica: &Secret) {
        match self.replicator.prune_orphan(replica).await {
            Ok(true) => {}
            Ok(false) => debug!("Replica {} still has its source", replica.name_any()),
            Err(e) => warn!(
                "Failed to remove orphaned replica {}/{}: {}",
                replica.namespace().unwrap_or_default(),
                replica.name_any(),
                e
            ),
        }
    }

    async fn retract(&self, key: &ObjectKey) {
        if !self.prune_replicas {
            debug!("Replica pruning disabled, keeping replicas of {}", key);
            return;
        }
        info!("Source secret {} deleted, removing replicas", key);
        self.replicator.retract(key).await;
    }
}

#[async_trait]
impl EventHandler for SecretSyncHandler {
    async fn on_add(&self, secret: Arc<Secret>) {
        self.handle_secret_change(&secret).await;
    }

    async fn on_update(&self, old: Arc<Secret>, new: Arc<Secret>) {
        if Arc::ptr_eq(&old, &new) {
            debug!("Resync of {}", new.name_any());
        }
        self.handle_secret_change(&new).await;
    }

    async fn on_delete(&self, deleted: DeletedObject<Secret>) {
        match deleted {
            // The type is not checked on delete: a secret re-tagged before
            // deletion still owns its replicas. Only replicas annotated with
            // this exact source are touched.
            DeletedObject::Known(secret) => {
                if let Some(key) = ObjectKey::from_resource(secret.as_ref()) {
                    if key.is_in_namespace(self.classifier.source_namespace()) {
                        self.retract(&key).await;
                    }
                }
            }
            DeletedObject::UnknownFinalState(key) => {
                if key.is_in_namespace(self.classifier.source_namespace()) {
                    self.retract(&key).await;
                }
            }
        }
    }

    async fn on_backfill(&self, secret: ObjectKey, namespace: String) {
        let Some(source_namespace) = secret.namespace.as_deref() else {
            return;
        };
        let Some(current) = self.cache.get_secret(source_namespace, &secret.name) else {
            debug!("Secret {} gone before backfill into {}", secret, namespace);
            return;
        };
        if !self.classifier.is_in_scope(&current) {
            return;
        }
        if self.cache.get_namespace(&namespace).is_none() {
            debug!("Namespace {} gone before backfill of {}", namespace, secret);
            return;
        }

        match self.replicator.replicate_to(&current, &namespace).await {
            Ok(outcome) => debug!("Backfilled {} into {}: {:?}", secret, namespace, outcome),
            Err(e) => warn!(
                "Failed to backfill secret {} into namespace {}: {}",
                secret, namespace, e
            ),
        }
    }
}
