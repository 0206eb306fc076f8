// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Replica construction and the secret write API.

use crate::constants::{annotations, labels, OPERATOR_NAME};
use crate::error::{Result, SyncError};
use crate::types::ObjectKey;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::{
    api::{DeleteParams, ListParams, ObjectMeta, PostParams, Preconditions},
    Api, Client, ResourceExt,
};
use std::collections::BTreeMap;
use tracing::{debug, instrument};

/// Remote secret operations the replicator needs, scoped by namespace.
#[async_trait]
pub trait SecretApi: Send + Sync {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Secret>>;

    /// Create; an existing object surfaces as [`SyncError::Conflict`].
    async fn create(&self, namespace: &str, secret: &Secret) -> Result<Secret>;

    /// Replace, guarded by `secret.metadata.resource_version`.
    async fn replace(&self, namespace: &str, secret: &Secret) -> Result<Secret>;

    /// Delete, guarded by `resource_version` when given.
    async fn delete(&self, namespace: &str, name: &str, resource_version: Option<&str>)
        -> Result<()>;

    /// Every secret in the cluster carrying this operator's managed-by label.
    async fn list_managed(&self) -> Result<Vec<Secret>>;
}

/// [`SecretApi`] backed by the cluster API.
#[derive(Clone)]
pub struct KubeSecretApi {
    client: Client,
}

impl KubeSecretApi {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn post_params() -> PostParams {
    PostParams {
        field_manager: Some(OPERATOR_NAME.to_string()),
        ..Default::default()
    }
}

#[async_trait]
impl SecretApi for KubeSecretApi {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        Ok(self.api(namespace).get_opt(name).await?)
    }

    #[instrument(skip(self, secret), fields(secret = %format!("{}/{}", namespace, secret.name_any())))]
    async fn create(&self, namespace: &str, secret: &Secret) -> Result<Secret> {
        let key = ObjectKey::namespaced(namespace, &secret.name_any());
        self.api(namespace)
            .create(&post_params(), secret)
            .await
            .map_err(|e| SyncError::from_kube(e, &key))
    }

    #[instrument(skip(self, secret), fields(secret = %format!("{}/{}", namespace, secret.name_any())))]
    async fn replace(&self, namespace: &str, secret: &Secret) -> Result<Secret> {
        let name = secret.name_any();
        let key = ObjectKey::namespaced(namespace, &name);
        self.api(namespace)
            .replace(&name, &post_params(), secret)
            .await
            .map_err(|e| SyncError::from_kube(e, &key))
    }

    #[instrument(skip(self))]
    async fn delete(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<&str>,
    ) -> Result<()> {
        let key = ObjectKey::namespaced(namespace, name);
        let dp = DeleteParams {
            preconditions: resource_version.map(|rv| Preconditions {
                resource_version: Some(rv.to_string()),
                uid: None,
            }),
            ..Default::default()
        };
        self.api(namespace)
            .delete(name, &dp)
            .await
            .map_err(|e| SyncError::from_kube(e, &key))?;
        debug!("Deleted secret {}", key);
        Ok(())
    }

    async fn list_managed(&self) -> Result<Vec<Secret>> {
        let selector = format!("{}={}", labels::MANAGED_BY, OPERATOR_NAME);
        let list = Api::<Secret>::all(self.client.clone())
            .list(&ListParams::default().labels(&selector))
            .await?;
        Ok(list.items)
    }
}

/// Build the replica of `source` for `target_namespace`: same name, type and
/// payload, none of the source's identity or version metadata, stamped
/// with the managed-by label and the source annotation.
pub fn build_replica(source: &Secret, target_namespace: &str) -> Secret {
    let source_key = format!(
        "{}/{}",
        source.namespace().unwrap_or_default(),
        source.name_any()
    );

    let mut replica_labels = source.metadata.labels.clone().unwrap_or_default();
    replica_labels.insert(labels::MANAGED_BY.to_string(), OPERATOR_NAME.to_string());

    let mut replica_annotations: BTreeMap<String, String> = source
        .metadata
        .annotations
        .as_ref()
        .map(|a| {
            a.iter()
                .filter(|(k, _)| k.as_str() != annotations::LAST_APPLIED)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        })
        .unwrap_or_default();
    replica_annotations.insert(annotations::SOURCE.to_string(), source_key);

    Secret {
        metadata: ObjectMeta {
            name: source.metadata.name.clone(),
            namespace: Some(target_namespace.to_string()),
            labels: Some(replica_labels),
            annotations: Some(replica_annotations),
            ..Default::default()
        },
        data: source.data.clone(),
        string_data: None,
        type_: source.type_.clone(),
        immutable: source.immutable,
    }
}

/// Source secret a replica was copied from, if this operator wrote it.
pub fn replica_source(secret: &Secret) -> Option<&str> {
    let managed = secret
        .labels()
        .get(labels::MANAGED_BY)
        .is_some_and(|v| v == OPERATOR_NAME);
    if !managed {
        return None;
    }
    secret
        .annotations()
        .get(annotations::SOURCE)
        .map(String::as_str)
}

/// Whether `existing` already carries everything `desired` would write.
pub fn is_up_to_date(existing: &Secret, desired: &Secret) -> bool {
    existing.data == desired.data
        && existing.type_ == desired.type_
        && existing.immutable == desired.immutable
        && is_subset(desired.labels(), existing.labels())
        && is_subset(desired.annotations(), existing.annotations())
}

fn is_subset(wanted: &BTreeMap<String, String>, have: &BTreeMap<String, String>) -> bool {
    wanted.iter().all(|(k, v)| have.get(k) == Some(v))
}
