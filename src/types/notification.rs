// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Change notifications emitted by the object cache.

use kube::Resource;
use std::sync::Arc;

use super::key::ObjectKey;

/// A single observed change of a cached object.
#[derive(Debug, Clone)]
pub enum Notification<K> {
    /// The object appeared in the cache. `initial_list` is set for objects
    /// delivered by the very first list, before the cache reported synced.
    Added { object: Arc<K>, initial_list: bool },
    /// The object changed, or a periodic resync re-delivered it (`old == new`).
    Updated { old: Arc<K>, new: Arc<K> },
    /// The object is gone.
    Deleted(DeletedObject<K>),
}

/// Final state of a deleted object, when it is known.
#[derive(Debug, Clone)]
pub enum DeletedObject<K> {
    /// The delete was observed with the object's last state.
    Known(Arc<K>),
    /// The object vanished while the watch was down; only its key survives.
    UnknownFinalState(ObjectKey),
}

impl<K: Resource> DeletedObject<K> {
    pub fn key(&self) -> Option<ObjectKey> {
        match self {
            DeletedObject::Known(obj) => ObjectKey::from_resource(obj.as_ref()),
            DeletedObject::UnknownFinalState(key) => Some(key.clone()),
        }
    }
}

impl<K: Resource> Notification<K> {
    /// Key of the object this notification is about. `None` when the
    /// delivered object has no name and cannot be routed.
    pub fn key(&self) -> Option<ObjectKey> {
        match self {
            Notification::Added { object, .. } => ObjectKey::from_resource(object.as_ref()),
            Notification::Updated { new, .. } => ObjectKey::from_resource(new.as_ref()),
            Notification::Deleted(deleted) => deleted.key(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Notification::Added { .. } => "add",
            Notification::Updated { .. } => "update",
            Notification::Deleted(_) => "delete",
        }
    }
}
