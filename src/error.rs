// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use std::time::Duration;
use thiserror::Error;

use crate::types::ObjectKey;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Failed to load kubeconfig: {0}")]
    KubeconfigError(String),

    #[error("Write conflict on {0}")]
    Conflict(ObjectKey),

    #[error("Object not found: {0}")]
    NotFound(ObjectKey),

    #[error("Invalid object key: {0:?}")]
    InvalidKey(String),

    #[error("Timed out after {0:?} waiting for cache sync")]
    SyncTimeout(Duration),

    #[error("Cache watch stopped")]
    CacheClosed,

    #[error("Invalid configuration: {0}")]
    ConfigError(String),
}

impl SyncError {
    /// Map a write error against `key`, lifting optimistic-concurrency
    /// conflicts and vanished objects into their own variants.
    pub fn from_kube(err: kube::Error, key: &ObjectKey) -> Self {
        match &err {
            kube::Error::Api(resp) if resp.code == 409 => SyncError::Conflict(key.clone()),
            kube::Error::Api(resp) if resp.code == 404 => SyncError::NotFound(key.clone()),
            _ => SyncError::KubeError(err),
        }
    }

    /// Whether another attempt may succeed without outside intervention.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Conflict(_) | SyncError::NotFound(_) => true,
            SyncError::KubeError(kube::Error::Api(resp)) => {
                resp.code == 429 || resp.code >= 500
            }
            SyncError::KubeError(kube::Error::HyperError(_))
            | SyncError::KubeError(kube::Error::Service(_)) => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
