// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Stable identity of a watched object.

use kube::runtime::reflector::ObjectRef;
use kube::Resource;
use std::fmt;
use std::str::FromStr;

use crate::error::SyncError;

/// `namespace/name` identity of a watched object. Cluster-scoped objects
/// carry no namespace and render as their bare name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn namespaced(namespace: &str, name: &str) -> Self {
        Self {
            namespace: Some(namespace.to_string()),
            name: name.to_string(),
        }
    }

    pub fn cluster_scoped(name: &str) -> Self {
        Self {
            namespace: None,
            name: name.to_string(),
        }
    }

    /// Derive the key from an object's metadata. Returns `None` when the
    /// object carries no name.
    pub fn from_resource<K: Resource>(obj: &K) -> Option<Self> {
        let meta = obj.meta();
        let name = meta.name.as_deref().filter(|n| !n.is_empty())?;
        Some(Self {
            namespace: meta.namespace.clone().filter(|ns| !ns.is_empty()),
            name: name.to_string(),
        })
    }

    pub fn is_in_namespace(&self, namespace: &str) -> bool {
        self.namespace.as_deref() == Some(namespace)
    }

    /// Reflector store lookup reference for this key
    pub fn object_ref<K>(&self) -> ObjectRef<K>
    where
        K: Resource,
        K::DynamicType: Default,
    {
        let r = ObjectRef::new(&self.name);
        match &self.namespace {
            Some(ns) => r.within(ns),
            None => r,
        }
    }
}

impl<K: Resource> From<&ObjectRef<K>> for ObjectKey {
    fn from(r: &ObjectRef<K>) -> Self {
        Self {
            namespace: r.namespace.clone(),
            name: r.name.clone(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

impl FromStr for ObjectKey {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (namespace, name) = match s.split_once('/') {
            Some((ns, name)) if !ns.is_empty() => (Some(ns.to_string()), name),
            Some(_) => return Err(SyncError::InvalidKey(s.to_string())),
            None => (None, s),
        };

        if name.is_empty() || name.contains('/') {
            return Err(SyncError::InvalidKey(s.to_string()));
        }

        Ok(Self {
            namespace,
            name: name.to_string(),
        })
    }
}
