// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use anyhow::{Context, Result};
use clap::Parser;
use std::collections::BTreeSet;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::constants::{
    dispatch, retry, timing, DEFAULT_SECRET_TYPE, DEFAULT_SOURCE_NAMESPACE, SYSTEM_NAMESPACES,
};
use crate::error::SyncError;

/// Replicate tagged secrets from the source namespace into every other namespace
#[derive(Parser, Debug, Clone)]
#[command(name = "secretsync", version, about)]
pub struct Args {
    /// Path to a kubeconfig file; in-cluster credentials are used when unset
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,
}

/// Backoff schedule for retried writes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based): doubles each time, capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: retry::MAX_ATTEMPTS,
            initial_backoff: Duration::from_millis(retry::INITIAL_BACKOFF_MS),
            max_backoff: Duration::from_millis(retry::MAX_BACKOFF_MS),
        }
    }
}

/// Operator configuration, defaults overridable from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Namespace whose tagged secrets are replicated
    pub source_namespace: String,
    /// Secret type marking a secret for replication
    pub type_tag: String,
    /// Namespaces never written to; always contains the source namespace
    pub blacklist: BTreeSet<String>,
    pub sync_timeout: Duration,
    pub resync_period: Duration,
    pub shutdown_grace: Duration,
    pub max_concurrent_writes: usize,
    pub workers: usize,
    /// Delete replicas when their source secret is deleted
    pub prune_replicas: bool,
    /// Copy in-scope secrets into namespaces created after startup
    pub backfill_new_namespaces: bool,
    pub retry: RetryPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self::new(DEFAULT_SOURCE_NAMESPACE, DEFAULT_SECRET_TYPE, SYSTEM_NAMESPACES)
    }
}

impl Config {
    /// Build a configuration for the given scope rules with default timings.
    pub fn new<S: AsRef<str>>(source_namespace: &str, type_tag: &str, blacklist: &[S]) -> Self {
        let mut blacklist: BTreeSet<String> =
            blacklist.iter().map(|s| s.as_ref().to_string()).collect();
        blacklist.insert(source_namespace.to_string());

        Config {
            source_namespace: source_namespace.to_string(),
            type_tag: type_tag.to_string(),
            blacklist,
            sync_timeout: Duration::from_secs(timing::CACHE_SYNC_TIMEOUT_SECS),
            resync_period: Duration::from_secs(timing::RESYNC_PERIOD_SECS),
            shutdown_grace: Duration::from_secs(timing::SHUTDOWN_GRACE_SECS),
            max_concurrent_writes: dispatch::MAX_CONCURRENT_WRITES,
            workers: dispatch::WORKERS,
            prune_replicas: true,
            backfill_new_namespaces: true,
            retry: RetryPolicy::default(),
        }
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration from `lookup`, which maps a variable name to its
    /// value if set.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let source_namespace =
            lookup("SOURCE_NAMESPACE").unwrap_or_else(|| DEFAULT_SOURCE_NAMESPACE.to_string());
        let type_tag = lookup("SECRET_TYPE").unwrap_or_else(|| DEFAULT_SECRET_TYPE.to_string());
        let blacklist: Vec<String> = match lookup("NAMESPACE_BLACKLIST") {
            Some(raw) => parse_list(&raw),
            None => SYSTEM_NAMESPACES.iter().map(|s| s.to_string()).collect(),
        };

        let mut config = Config::new(&source_namespace, &type_tag, blacklist.as_slice());

        if let Some(secs) = parse_var::<u64, _>(&lookup, "CACHE_SYNC_TIMEOUT_SECS")? {
            config.sync_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "RESYNC_PERIOD_SECS")? {
            config.resync_period = Duration::from_secs(secs);
        }
        if let Some(n) = parse_var::<usize, _>(&lookup, "MAX_CONCURRENT_WRITES")? {
            config.max_concurrent_writes = n.max(1);
        }
        if let Some(n) = parse_var::<usize, _>(&lookup, "DISPATCH_WORKERS")? {
            config.workers = n.max(1);
        }
        if let Some(b) = parse_var::<bool, _>(&lookup, "PRUNE_REPLICAS")? {
            config.prune_replicas = b;
        }
        if let Some(b) = parse_var::<bool, _>(&lookup, "BACKFILL_NEW_NAMESPACES")? {
            config.backfill_new_namespaces = b;
        }

        config
            .validate()
            .context("Configuration from environment rejected")?;
        Ok(config)
    }

    /// Check values the controller cannot run with.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.source_namespace.is_empty() {
            return Err(SyncError::ConfigError(
                "source namespace must not be empty".to_string(),
            ));
        }
        if self.type_tag.is_empty() {
            return Err(SyncError::ConfigError("secret type must not be empty".to_string()));
        }
        if self.sync_timeout.is_zero() {
            return Err(SyncError::ConfigError(
                "CACHE_SYNC_TIMEOUT_SECS must be greater than zero".to_string(),
            ));
        }
        if self.resync_period.is_zero() {
            return Err(SyncError::ConfigError(
                "RESYNC_PERIOD_SECS must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether `namespace` may receive replicas.
    pub fn is_target(&self, namespace: &str) -> bool {
        namespace != self.source_namespace && !self.blacklist.contains(namespace)
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_var<T, F>(lookup: &F, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("{} has an invalid value: {:?}", name, raw)),
        None => Ok(None),
    }
}
