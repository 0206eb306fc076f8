// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! A single-kind mirror: applies watch events to a reflector store and turns
//! them into add / update / delete notifications.

use crate::types::{DeletedObject, Notification, ObjectKey};
use futures::{Stream, StreamExt};
use kube::runtime::reflector::{store::Writer, ObjectRef, Store};
use kube::runtime::watcher;
use kube::Resource;
use std::collections::HashSet;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Owns the store writer for one resource kind. Only the apply loop touches
/// it, so the store is never written concurrently.
pub struct Mirror<K>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    writer: Writer<K>,
    store: Store<K>,
    synced_tx: watch::Sender<bool>,
    /// Keys present before the current relist that it has not delivered yet
    relist_pending: Option<HashSet<ObjectRef<K>>>,
}

impl<K> Mirror<K>
where
    K: Resource<DynamicType = ()> + Clone + Debug + Send + Sync + 'static,
{
    pub fn new(writer: Writer<K>, synced_tx: watch::Sender<bool>) -> Self {
        let store = writer.as_reader();
        Self {
            writer,
            store,
            synced_tx,
            relist_pending: None,
        }
    }

    pub fn has_synced(&self) -> bool {
        *self.synced_tx.borrow()
    }

    /// Apply one watch event to the store and return the notifications it
    /// produces, in order.
    pub fn apply(&mut self, event: watcher::Event<K>) -> Vec<Notification<K>> {
        let mut out = Vec::new();

        match &event {
            watcher::Event::Apply(obj) => {
                let new = Arc::new(obj.clone());
                match self.store.get(&ObjectRef::from_obj(obj)) {
                    Some(old) => out.push(Notification::Updated { old, new }),
                    None => out.push(Notification::Added {
                        object: new,
                        initial_list: false,
                    }),
                }
            }
            watcher::Event::Delete(obj) => {
                out.push(Notification::Deleted(DeletedObject::Known(Arc::new(
                    obj.clone(),
                ))));
            }
            watcher::Event::Init => {
                let known = self
                    .store
                    .state()
                    .iter()
                    .map(|o| ObjectRef::from_obj(o.as_ref()))
                    .collect();
                self.relist_pending = Some(known);
            }
            watcher::Event::InitApply(obj) => {
                let r = ObjectRef::from_obj(obj);
                if let Some(pending) = self.relist_pending.as_mut() {
                    pending.remove(&r);
                }
                let new = Arc::new(obj.clone());
                match self.store.get(&r) {
                    Some(old) if old.meta().resource_version == obj.meta().resource_version => {}
                    Some(old) => out.push(Notification::Updated { old, new }),
                    None => out.push(Notification::Added {
                        object: new,
                        initial_list: !self.has_synced(),
                    }),
                }
            }
            watcher::Event::InitDone => {
                // Anything the relist did not return was deleted while we
                // were not watching.
                if let Some(pending) = self.relist_pending.take() {
                    let mut gone: Vec<ObjectKey> = pending.iter().map(ObjectKey::from).collect();
                    gone.sort();
                    for key in gone {
                        debug!("Object {} missing from relist", key);
                        out.push(Notification::Deleted(DeletedObject::UnknownFinalState(key)));
                    }
                }
            }
        }

        self.writer.apply_watcher_event(&event);

        if matches!(event, watcher::Event::InitDone) && !self.has_synced() {
            info!(
                "Initial list of {} complete ({} objects)",
                K::kind(&()),
                self.store.state().len()
            );
            self.synced_tx.send_replace(true);
        }

        out
    }

    /// Re-deliver every cached object as an unchanged update.
    pub fn resync(&self) -> Vec<Notification<K>> {
        self.store
            .state()
            .into_iter()
            .map(|obj| Notification::Updated {
                old: obj.clone(),
                new: obj,
            })
            .collect()
    }

    /// Drive the mirror from a watch stream until the stream ends or the
    /// receiver goes away. Stream errors are logged and skipped; the stream
    /// is expected to back off and resume on its own.
    pub async fn run<S>(
        mut self,
        stream: S,
        tx: mpsc::UnboundedSender<Notification<K>>,
        resync_period: Duration,
    ) where
        S: Stream<Item = Result<watcher::Event<K>, watcher::Error>> + Send,
    {
        let kind = K::kind(&()).to_string();
        let mut stream = std::pin::pin!(stream);
        // A zero period disables resync; the interval still needs a non-zero one.
        let resync_enabled = !resync_period.is_zero();
        if !resync_enabled {
            warn!("{} resync disabled: period is zero", kind);
        }
        let period = if resync_enabled {
            resync_period
        } else {
            Duration::from_secs(3600)
        };
        let mut resync =
            tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        resync.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            let notifications = tokio::select! {
                next = stream.next() => match next {
                    Some(Ok(event)) => self.apply(event),
                    Some(Err(e)) => {
                        warn!("{} watch error: {}", kind, e);
                        continue;
                    }
                    None => {
                        warn!("{} watch stream ended", kind);
                        return;
                    }
                },
                _ = resync.tick(), if resync_enabled && self.has_synced() => {
                    debug!("Resyncing {} cache", kind);
                    self.resync()
                }
            };

            for n in notifications {
                if tx.send(n).is_err() {
                    debug!("{} notification receiver dropped, stopping", kind);
                    return;
                }
            }
        }
    }
}
