// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Routes cache notifications to the handler with per-key ordering.

use crate::cache::{CacheEvents, ObjectCache};
use crate::config::Config;
use crate::sync::classifier::Classifier;
use crate::sync::handler::EventHandler;
use crate::types::{Notification, ObjectKey};
use k8s_openapi::api::core::v1::{Namespace, Secret};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Unit of work executed by a worker
#[derive(Debug)]
pub enum WorkItem {
    Secret(Notification<Secret>),
    /// Copy one source secret into a namespace created after startup
    Backfill { secret: ObjectKey, namespace: String },
}

/// Fans notifications out over a fixed set of workers. Every key maps to one
/// worker, so events for the same object are handled in order and never
/// concurrently, while different objects proceed in parallel.
pub struct EventRouter {
    handler: Arc<dyn EventHandler>,
    cache: ObjectCache,
    classifier: Classifier,
    config: Arc<Config>,
}

impl EventRouter {
    pub fn new(
        handler: Arc<dyn EventHandler>,
        cache: ObjectCache,
        config: Arc<Config>,
    ) -> Self {
        Self {
            handler,
            cache,
            classifier: Classifier::new(&config),
            config,
        }
    }

    /// Dispatch notifications until `shutdown` fires or both streams end.
    /// Workers finish the item in hand before stopping.
    pub async fn run(self, mut events: CacheEvents, shutdown: CancellationToken) {
        let worker_count = self.config.workers.max(1);
        let mut shards = Vec::with_capacity(worker_count);
        let mut workers = Vec::with_capacity(worker_count);
        for id in 0..worker_count {
            let (tx, rx) = mpsc::unbounded_channel();
            shards.push(tx);
            workers.push(spawn_worker(id, self.handler.clone(), rx, shutdown.clone()));
        }
        info!("Event router started with {} workers", worker_count);

        let mut secrets_open = true;
        let mut namespaces_open = true;
        while secrets_open || namespaces_open {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                n = events.secrets.recv(), if secrets_open => match n {
                    Some(n) => self.route_secret(n, &shards),
                    None => secrets_open = false,
                },
                n = events.namespaces.recv(), if namespaces_open => match n {
                    Some(n) => self.route_namespace(n, &shards),
                    None => namespaces_open = false,
                },
            }
        }

        drop(shards);
        self.drain(workers).await;
    }

    async fn drain(&self, workers: Vec<JoinHandle<()>>) {
        let grace = self.config.shutdown_grace;
        let all = futures::future::join_all(workers);
        match tokio::time::timeout(grace, all).await {
            Ok(results) => {
                for r in results {
                    if let Err(e) = r {
                        error!("Event worker failed: {}", e);
                    }
                }
                info!("Event router stopped");
            }
            Err(_) => warn!(
                "Event workers still busy after {:?}, abandoning in-flight work",
                grace
            ),
        }
    }

    fn route_secret(&self, n: Notification<Secret>, shards: &[mpsc::UnboundedSender<WorkItem>]) {
        let Some(key) = n.key() else {
            warn!("Discarding secret {} notification without a name", n.kind());
            return;
        };
        debug!("on {}: {}", n.kind(), key);
        enqueue(shards, &key, WorkItem::Secret(n));
    }

    fn route_namespace(
        &self,
        n: Notification<Namespace>,
        shards: &[mpsc::UnboundedSender<WorkItem>],
    ) {
        let Some(key) = n.key() else {
            warn!("Discarding namespace {} notification without a name", n.kind());
            return;
        };

        if !matches!(
            n,
            Notification::Added {
                initial_list: false,
                ..
            }
        ) {
            debug!("on namespace {}: {}", n.kind(), key);
            return;
        }

        let namespace = key.name;
        if !self.config.backfill_new_namespaces || !self.config.is_target(&namespace) {
            debug!("Not backfilling namespace {}", namespace);
            return;
        }

        let sources: Vec<ObjectKey> = self
            .cache
            .list_secrets(&self.config.source_namespace)
            .iter()
            .filter(|s| self.classifier.is_in_scope(s))
            .filter_map(|s| ObjectKey::from_resource(s.as_ref()))
            .collect();
        info!(
            "Namespace {} created, backfilling {} secrets",
            namespace,
            sources.len()
        );

        // Queue on each secret's own shard so backfills stay ordered with
        // that secret's updates.
        for secret in sources {
            let item = WorkItem::Backfill {
                secret: secret.clone(),
                namespace: namespace.clone(),
            };
            enqueue(shards, &secret, item);
        }
    }
}

fn shard_for(key: &ObjectKey, shards: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % shards as u64) as usize
}

fn enqueue(shards: &[mpsc::UnboundedSender<WorkItem>], key: &ObjectKey, item: WorkItem) {
    let shard = shard_for(key, shards.len());
    if shards[shard].send(item).is_err() {
        warn!("Worker {} is gone, dropping event for {}", shard, key);
    }
}

fn spawn_worker(
    id: usize,
    handler: Arc<dyn EventHandler>,
    mut rx: mpsc::UnboundedReceiver<WorkItem>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let item = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                item = rx.recv() => match item {
                    Some(item) => item,
                    None => break,
                },
            };
            // Not raced against shutdown: an item that started runs to the end.
            dispatch(handler.as_ref(), item).await;
        }
        debug!("Event worker {} stopped", id);
    })
}

async fn dispatch(handler: &dyn EventHandler, item: WorkItem) {
    match item {
        WorkItem::Secret(Notification::Added { object, .. }) => handler.on_add(object).await,
        WorkItem::Secret(Notification::Updated { old, new }) => handler.on_update(old, new).await,
        WorkItem::Secret(Notification::Deleted(deleted)) => handler.on_delete(deleted).await,
        WorkItem::Backfill { secret, namespace } => handler.on_backfill(secret, namespace).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::testing::synced_cache;
    use crate::test_utils::{make_namespace, make_secret};
    use crate::types::DeletedObject;
    use async_trait::async_trait;
    use kube::ResourceExt;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Upper bound on waiting for the router to stop
    const SETTLE: Duration = Duration::from_millis(200);

    /// Records every call as `op:key[:detail]`
    #[derive(Default)]
    struct RecordingHandler {
        calls: Mutex<Vec<String>>,
        delay: Option<Duration>,
    }

    impl RecordingHandler {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        async fn record(&self, call: String) {
            if let Some(d) = self.delay {
                tokio::time::sleep(d).await;
            }
            self.calls.lock().unwrap().push(call);
        }
    }

    fn payload(s: &Secret) -> String {
        s.data
            .as_ref()
            .and_then(|d| d.get("password"))
            .map(|b| String::from_utf8_lossy(&b.0).into_owned())
            .unwrap_or_default()
    }

    #[async_trait]
    impl EventHandler for RecordingHandler {
        async fn on_add(&self, secret: Arc<Secret>) {
            self.record(format!("add:{}:{}", secret.name_any(), payload(&secret)))
                .await;
        }

        async fn on_update(&self, _old: Arc<Secret>, new: Arc<Secret>) {
            self.record(format!("update:{}:{}", new.name_any(), payload(&new)))
                .await;
        }

        async fn on_delete(&self, deleted: DeletedObject<Secret>) {
            let key = deleted.key().map(|k| k.to_string()).unwrap_or_default();
            self.record(format!("delete:{}", key)).await;
        }

        async fn on_backfill(&self, secret: ObjectKey, namespace: String) {
            self.record(format!("backfill:{}:{}", secret, namespace)).await;
        }
    }

    struct Harness {
        secrets: mpsc::UnboundedSender<Notification<Secret>>,
        namespaces: mpsc::UnboundedSender<Notification<Namespace>>,
        shutdown: CancellationToken,
        router: JoinHandle<()>,
    }

    fn start(handler: Arc<RecordingHandler>, cache: ObjectCache, config: Config) -> Harness {
        let (secrets_tx, secrets) = mpsc::unbounded_channel();
        let (namespaces_tx, namespaces) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let router = EventRouter::new(handler, cache, Arc::new(config));
        let events = CacheEvents {
            secrets,
            namespaces,
        };
        let router = tokio::spawn(router.run(events, shutdown.clone()));
        Harness {
            secrets: secrets_tx,
            namespaces: namespaces_tx,
            shutdown,
            router,
        }
    }

    fn added<K>(obj: K) -> Notification<K> {
        Notification::Added {
            object: Arc::new(obj),
            initial_list: false,
        }
    }

    fn updated(obj: Secret) -> Notification<Secret> {
        let obj = Arc::new(obj);
        Notification::Updated {
            old: obj.clone(),
            new: obj,
        }
    }

    #[test]
    fn test_shard_is_stable_per_key() {
        let key = ObjectKey::namespaced("secretsync", "db-creds");
        let first = shard_for(&key, 8);
        for _ in 0..10 {
            assert_eq!(shard_for(&key, 8), first);
        }
        assert!(first < 8);
    }

    #[tokio::test]
    async fn test_same_key_events_stay_ordered() {
        let handler = Arc::new(RecordingHandler {
            delay: Some(Duration::from_millis(1)),
            ..Default::default()
        });
        let mut config = Config::default();
        config.workers = 4;
        let h = start(handler.clone(), synced_cache(vec![], vec![]), config);

        h.secrets.send(added(make_secret("a", "secretsync", "1"))).unwrap();
        for v in 2..=5 {
            h.secrets
                .send(updated(make_secret("a", "secretsync", &v.to_string())))
                .unwrap();
            h.secrets
                .send(updated(make_secret(&format!("other-{v}"), "secretsync", "x")))
                .unwrap();
        }
        h.secrets
            .send(Notification::Deleted(DeletedObject::UnknownFinalState(
                ObjectKey::namespaced("secretsync", "a"),
            )))
            .unwrap();
        drop(h.secrets);
        drop(h.namespaces);
        h.router.await.unwrap();

        let for_a: Vec<String> = handler
            .calls()
            .into_iter()
            .filter(|c| c.contains(":a:") || c.ends_with("/a"))
            .collect();
        assert_eq!(
            for_a,
            vec![
                "add:a:1",
                "update:a:2",
                "update:a:3",
                "update:a:4",
                "update:a:5",
                "delete:secretsync/a",
            ]
        );
        assert_eq!(handler.calls().len(), 10);
    }

    #[tokio::test]
    async fn test_nameless_notification_is_discarded() {
        let handler = Arc::new(RecordingHandler::default());
        let h = start(handler.clone(), synced_cache(vec![], vec![]), Config::default());

        h.secrets.send(added(Secret::default())).unwrap();
        h.secrets.send(added(make_secret("a", "secretsync", "1"))).unwrap();
        drop(h.secrets);
        drop(h.namespaces);
        h.router.await.unwrap();

        assert_eq!(handler.calls(), vec!["add:a:1"]);
    }

    #[tokio::test]
    async fn test_new_namespace_backfills_in_scope_secrets() {
        let mut untagged = make_secret("plain", "secretsync", "x");
        untagged.type_ = Some("Opaque".to_string());
        let cache = synced_cache(
            vec![
                make_secret("db-creds", "secretsync", "x"),
                make_secret("api-key", "secretsync", "x"),
                untagged,
                make_secret("elsewhere", "team-a", "x"),
            ],
            vec![make_namespace("secretsync"), make_namespace("team-a")],
        );
        let handler = Arc::new(RecordingHandler::default());
        let h = start(handler.clone(), cache, Config::default());

        h.namespaces.send(added(make_namespace("team-b"))).unwrap();
        drop(h.secrets);
        drop(h.namespaces);
        h.router.await.unwrap();

        let mut calls = handler.calls();
        calls.sort();
        assert_eq!(
            calls,
            vec![
                "backfill:secretsync/api-key:team-b",
                "backfill:secretsync/db-creds:team-b",
            ]
        );
    }

    #[tokio::test]
    async fn test_initial_and_blacklisted_namespaces_do_not_backfill() {
        let cache = synced_cache(vec![make_secret("db-creds", "secretsync", "x")], vec![]);
        let handler = Arc::new(RecordingHandler::default());
        let h = start(handler.clone(), cache, Config::default());

        h.namespaces
            .send(Notification::Added {
                object: Arc::new(make_namespace("team-a")),
                initial_list: true,
            })
            .unwrap();
        h.namespaces.send(added(make_namespace("kube-system"))).unwrap();
        drop(h.secrets);
        drop(h.namespaces);
        h.router.await.unwrap();

        assert!(handler.calls().is_empty());
    }

    #[tokio::test]
    async fn test_backfill_disabled() {
        let cache = synced_cache(vec![make_secret("db-creds", "secretsync", "x")], vec![]);
        let handler = Arc::new(RecordingHandler::default());
        let mut config = Config::default();
        config.backfill_new_namespaces = false;
        let h = start(handler.clone(), cache, config);

        h.namespaces.send(added(make_namespace("team-b"))).unwrap();
        drop(h.secrets);
        drop(h.namespaces);
        h.router.await.unwrap();

        assert!(handler.calls().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_finishes_in_flight_event() {
        let handler = Arc::new(RecordingHandler {
            delay: Some(Duration::from_millis(50)),
            ..Default::default()
        });
        let mut config = Config::default();
        config.workers = 1;
        let h = start(handler.clone(), synced_cache(vec![], vec![]), config);

        h.secrets.send(added(make_secret("a", "secretsync", "1"))).unwrap();
        h.secrets.send(added(make_secret("b", "secretsync", "1"))).unwrap();
        // Let the worker pick up the first item, then stop
        tokio::time::sleep(Duration::from_millis(10)).await;
        h.shutdown.cancel();
        tokio::time::timeout(SETTLE, h.router).await.unwrap().unwrap();

        assert_eq!(handler.calls(), vec!["add:a:1"]);
    }
}
