// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

/// Namespace whose tagged secrets are replicated
pub const DEFAULT_SOURCE_NAMESPACE: &str = "secretsync";

/// Secret type a source secret must carry to be replicated
pub const DEFAULT_SECRET_TYPE: &str = "k8s.ziwon.dev/secretsync";

/// System namespaces never used as replication targets
pub const SYSTEM_NAMESPACES: &[&str] = &["kube-system", "kube-public"];

/// The operator name, used as field manager and managed-by label value
pub const OPERATOR_NAME: &str = "secretsync";

/// Metadata stamped onto every replica
pub mod labels {
    /// Marks a secret as written by this operator
    pub const MANAGED_BY: &str = "app.kubernetes.io/managed-by";
}

pub mod annotations {
    /// `<namespace>/<name>` of the source secret a replica was copied from
    pub const SOURCE: &str = "k8s.ziwon.dev/secretsync-source";
    /// Client-side apply bookkeeping, never carried over to replicas
    pub const LAST_APPLIED: &str = "kubectl.kubernetes.io/last-applied-configuration";
}

/// Controller timing defaults
pub mod timing {
    /// Upper bound on waiting for the initial list of both caches
    pub const CACHE_SYNC_TIMEOUT_SECS: u64 = 60;
    /// Interval at which every cached object is re-dispatched
    pub const RESYNC_PERIOD_SECS: u64 = 600;
    /// Grace period for in-flight work after shutdown is requested
    pub const SHUTDOWN_GRACE_SECS: u64 = 30;
}

/// Write retry defaults
pub mod retry {
    pub const MAX_ATTEMPTS: u32 = 5;
    /// Initial backoff in milliseconds
    pub const INITIAL_BACKOFF_MS: u64 = 200;
    /// Maximum backoff in milliseconds (exponential backoff cap)
    pub const MAX_BACKOFF_MS: u64 = 5_000;
}

/// Fan-out and dispatch defaults
pub mod dispatch {
    pub const MAX_CONCURRENT_WRITES: usize = 16;
    pub const WORKERS: usize = 4;
}
