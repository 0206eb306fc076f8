// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Decides which secrets are replicated.

use crate::config::Config;
use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;

/// Scope rule: a secret is replicated iff it lives in the source namespace
/// and carries the replication type.
#[derive(Debug, Clone)]
pub struct Classifier {
    source_namespace: String,
    type_tag: String,
}

impl Classifier {
    pub fn new(config: &Config) -> Self {
        Self {
            source_namespace: config.source_namespace.clone(),
            type_tag: config.type_tag.clone(),
        }
    }

    pub fn source_namespace(&self) -> &str {
        &self.source_namespace
    }

    pub fn is_in_scope(&self, secret: &Secret) -> bool {
        secret.namespace().as_deref() == Some(self.source_namespace.as_str())
            && secret.type_.as_deref() == Some(self.type_tag.as_str())
    }
}
