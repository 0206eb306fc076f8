// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Fan-out of a source secret into every target namespace.

use crate::cache::ObjectCache;
use crate::config::{Config, RetryPolicy};
use crate::error::{Result, SyncError};
use crate::sync::secrets::{build_replica, is_up_to_date, replica_source, SecretApi};
use crate::types::ObjectKey;
use futures::{stream, StreamExt};
use k8s_openapi::api::core::v1::{Namespace, Secret};
use kube::ResourceExt;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

/// Result of writing one replica
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
    Unchanged,
}

/// Per-namespace tally of one replicate or retract pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplicationReport {
    pub created: Vec<String>,
    pub updated: Vec<String>,
    pub unchanged: Vec<String>,
    pub deleted: Vec<String>,
    pub failed: Vec<String>,
}

impl ReplicationReport {
    fn record(&mut self, namespace: String, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Created => self.created.push(namespace),
            UpsertOutcome::Updated => self.updated.push(namespace),
            UpsertOutcome::Unchanged => self.unchanged.push(namespace),
        }
    }

    fn sort(&mut self) {
        self.created.sort();
        self.updated.sort();
        self.unchanged.sort();
        self.deleted.sort();
        self.failed.sort();
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Replication targets: every namespace except the blacklisted ones and the
/// source namespace.
pub fn compute_targets<'a, I>(config: &Config, namespaces: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = &'a str>,
{
    namespaces
        .into_iter()
        .filter(|ns| config.is_target(ns))
        .map(str::to_string)
        .collect()
}

fn is_terminating(namespace: &Namespace) -> bool {
    namespace.metadata.deletion_timestamp.is_some()
        || namespace
            .status
            .as_ref()
            .and_then(|s| s.phase.as_deref())
            .is_some_and(|p| p == "Terminating")
}

/// Writes sanitized copies of source secrets into target namespaces. Reads
/// namespaces from the cache; never writes to it.
pub struct Replicator {
    config: Arc<Config>,
    cache: ObjectCache,
    api: Arc<dyn SecretApi>,
}

impl Replicator {
    pub fn new(config: Arc<Config>, cache: ObjectCache, api: Arc<dyn SecretApi>) -> Self {
        Self { config, cache, api }
    }

    fn retry_policy(&self) -> &RetryPolicy {
        &self.config.retry
    }

    /// Current targets from the namespace cache, skipping namespaces being
    /// deleted.
    pub fn target_namespaces(&self) -> BTreeSet<String> {
        let namespaces = self.cache.list_namespaces();
        compute_targets(
            &self.config,
            namespaces
                .iter()
                .filter(|ns| !is_terminating(ns))
                .filter_map(|ns| ns.metadata.name.as_deref()),
        )
    }

    /// Upsert `secret` into every target namespace. Failures are confined to
    /// their namespace and reported; they never stop the rest of the fan-out.
    #[instrument(skip(self, secret), fields(secret = %format!("{}/{}", secret.namespace().unwrap_or_default(), secret.name_any())))]
    pub async fn replicate(&self, secret: &Secret) -> ReplicationReport {
        let targets = self.target_namespaces();
        debug!("Replicating to {} namespaces", targets.len());

        let results: Vec<(String, Result<UpsertOutcome>)> = stream::iter(targets)
            .map(|namespace| {
                let replica = build_replica(secret, &namespace);
                async move {
                    let outcome = self.upsert(&replica, &namespace).await;
                    (namespace, outcome)
                }
            })
            .buffer_unordered(self.config.max_concurrent_writes.max(1))
            .collect()
            .await;

        let mut report = ReplicationReport::default();
        for (namespace, outcome) in results {
            match outcome {
                Ok(o) => report.record(namespace, o),
                Err(e) => {
                    error!(
                        "Failed to replicate secret {} to namespace {}: {}",
                        secret.name_any(),
                        namespace,
                        e
                    );
                    report.failed.push(namespace);
                }
            }
        }
        report.sort();

        info!(
            "Replicated secret {}: {} created, {} updated, {} unchanged, {} failed",
            secret.name_any(),
            report.created.len(),
            report.updated.len(),
            report.unchanged.len(),
            report.failed.len()
        );
        report
    }

    /// Upsert `secret` into a single namespace, if it is a target.
    pub async fn replicate_to(&self, secret: &Secret, namespace: &str) -> Result<UpsertOutcome> {
        if !self.config.is_target(namespace) {
            debug!("Skipping namespace on blacklist: {}", namespace);
            return Ok(UpsertOutcome::Unchanged);
        }
        let replica = build_replica(secret, namespace);
        self.upsert(&replica, namespace).await
    }

    /// Create-or-update `desired` in `namespace`, re-reading and retrying on
    /// conflicts and transient errors.
    async fn upsert(&self, desired: &Secret, namespace: &str) -> Result<UpsertOutcome> {
        let key = ObjectKey::namespaced(namespace, &desired.name_any());
        self.with_retry(&key, || self.try_upsert(desired, namespace))
            .await
    }

    async fn try_upsert(&self, desired: &Secret, namespace: &str) -> Result<UpsertOutcome> {
        let name = desired.name_any();

        match self.api.get(namespace, &name).await? {
            None => {
                self.api.create(namespace, desired).await?;
                info!("Created secret {}/{}", namespace, name);
                Ok(UpsertOutcome::Created)
            }
            Some(existing) if is_up_to_date(&existing, desired) => {
                debug!("Secret {}/{} is up to date", namespace, name);
                Ok(UpsertOutcome::Unchanged)
            }
            Some(existing) => {
                let mut update = desired.clone();
                // The target's own version, never the source's
                update.metadata.resource_version = existing.metadata.resource_version.clone();
                self.api.replace(namespace, &update).await?;
                info!("Updated secret {}/{}", namespace, name);
                Ok(UpsertOutcome::Updated)
            }
        }
    }

    /// Delete every replica this operator created from `source`. Replicas
    /// are looked up both in the cache and through the API, so copies the
    /// watch has not delivered yet are found too.
    #[instrument(skip(self), fields(secret = %source))]
    pub async fn retract(&self, source: &ObjectKey) -> ReplicationReport {
        let source_ref = source.to_string();
        let wanted = source_ref.as_str();

        let mut candidates = self.cache.all_secrets();
        match self.with_retry(source, || self.api.list_managed()).await {
            Ok(listed) => candidates.extend(listed.into_iter().map(Arc::new)),
            Err(e) => warn!(
                "Failed to list replicas of {}, using cached view only: {}",
                source, e
            ),
        }

        let namespaces: BTreeSet<String> = candidates
            .iter()
            .filter(|s| s.name_any() == source.name)
            .filter(|s| replica_source(s) == Some(wanted))
            .filter_map(|s| s.namespace())
            .filter(|ns| self.config.is_target(ns))
            .collect();

        let results: Vec<(String, Result<bool>)> = stream::iter(namespaces)
            .map(|namespace| async move {
                let key = ObjectKey::namespaced(&namespace, &source.name);
                let outcome = self
                    .with_retry(&key, || self.try_delete_replica(&key, wanted))
                    .await;
                (namespace, outcome)
            })
            .buffer_unordered(self.config.max_concurrent_writes.max(1))
            .collect()
            .await;

        let mut report = ReplicationReport::default();
        for (namespace, outcome) in results {
            match outcome {
                Ok(true) => report.deleted.push(namespace),
                Ok(false) => report.unchanged.push(namespace),
                Err(e) => {
                    error!("Failed to remove replica {}/{}: {}", namespace, source.name, e);
                    report.failed.push(namespace);
                }
            }
        }
        report.sort();

        info!(
            "Retracted secret {}: {} deleted, {} failed",
            source,
            report.deleted.len(),
            report.failed.len()
        );
        report
    }

    /// Delete `replica` if the source secret it was copied from no longer
    /// exists in the cache. Returns whether it was deleted.
    pub async fn prune_orphan(&self, replica: &Secret) -> Result<bool> {
        let Some(source) = replica_source(replica) else {
            return Ok(false);
        };
        let source_key: ObjectKey = source.parse()?;
        let Some(namespace) = replica.namespace() else {
            return Ok(false);
        };
        if self.source_exists(&source_key) || !self.config.is_target(&namespace) {
            return Ok(false);
        }

        info!(
            "Source {} of replica {}/{} is gone, removing it",
            source_key,
            namespace,
            replica.name_any()
        );
        let key = ObjectKey::namespaced(&namespace, &replica.name_any());
        let (this, key_ref, source_ref) = (self, &key, &source_key);
        self.with_retry(&key, move || async move {
            // The source may have come back since the last attempt
            if this.source_exists(source_ref) {
                return Ok(false);
            }
            this.try_delete_replica(key_ref, source).await
        })
        .await
    }

    fn source_exists(&self, source: &ObjectKey) -> bool {
        source
            .namespace
            .as_deref()
            .and_then(|ns| self.cache.get_secret(ns, &source.name))
            .is_some()
    }

    /// Delete one replica if it is still ours. Returns whether it was deleted.
    async fn try_delete_replica(&self, key: &ObjectKey, source: &str) -> Result<bool> {
        let namespace = key.namespace.as_deref().unwrap_or_default();
        let Some(current) = self.api.get(namespace, &key.name).await? else {
            return Ok(false);
        };
        if replica_source(&current) != Some(source) {
            debug!("Secret {} is no longer a replica of {}, keeping it", key, source);
            return Ok(false);
        }

        match self
            .api
            .delete(namespace, &key.name, current.metadata.resource_version.as_deref())
            .await
        {
            Ok(()) => {
                info!("Deleted replica {}", key);
                Ok(true)
            }
            Err(SyncError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Run `op` until it succeeds, fails permanently, or the retry budget is
    /// spent, backing off between attempts.
    async fn with_retry<T, F, Fut>(&self, key: &ObjectKey, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let policy = self.retry_policy();
        let mut attempt = 1;

        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                    let delay = policy.backoff(attempt);
                    warn!(
                        "Attempt {} on {} failed: {}, retrying in {:?}",
                        attempt, key, e, delay
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
