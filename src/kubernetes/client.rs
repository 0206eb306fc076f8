// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Cluster client creation from an explicit kubeconfig or in-cluster credentials

use crate::error::{Result, SyncError};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config as KConfig};
use std::path::Path;
use tracing::{info, instrument};

/// Create a Kubernetes client. An explicit kubeconfig path (from the flag or
/// `KUBECONFIG`) wins; otherwise the in-cluster service account is used.
#[instrument]
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client> {
    let config = match kubeconfig {
        Some(path) => {
            info!("Loading kubeconfig from {}", path.display());
            let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
                SyncError::KubeconfigError(format!(
                    "Failed to read kubeconfig {}: {}",
                    path.display(),
                    e
                ))
            })?;
            config_from_kubeconfig(&raw).await?
        }
        None => {
            info!("No kubeconfig given, using in-cluster configuration");
            KConfig::incluster().map_err(|e| {
                SyncError::KubeconfigError(format!("Failed to load in-cluster config: {}", e))
            })?
        }
    };

    Client::try_from(config)
        .map_err(|e| SyncError::KubeconfigError(format!("Failed to create client: {}", e)))
}

/// Build a client configuration from kubeconfig contents
async fn config_from_kubeconfig(kubeconfig: &str) -> Result<KConfig> {
    let kubeconfig_parsed: Kubeconfig = serde_yaml::from_str(kubeconfig)
        .map_err(|e| SyncError::KubeconfigError(format!("Failed to parse kubeconfig: {}", e)))?;

    KConfig::from_custom_kubeconfig(kubeconfig_parsed, &KubeConfigOptions::default())
        .await
        .map_err(|e| SyncError::KubeconfigError(format!("Failed to create config: {}", e)))
}
