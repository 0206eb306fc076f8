// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Secret classification, event routing and replication.

pub mod classifier;
pub mod handler;
pub mod replicator;
pub mod router;
pub mod secrets;

pub use classifier::Classifier;
pub use handler::{EventHandler, SecretSyncHandler};
pub use replicator::{compute_targets, ReplicationReport, Replicator, UpsertOutcome};
pub use router::{EventRouter, WorkItem};
pub use secrets::{build_replica, KubeSecretApi, SecretApi};
