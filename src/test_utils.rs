// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Test utilities: a mock API server for the kube client, an in-memory
//! secret store, and object builders.

use crate::constants::{labels, DEFAULT_SECRET_TYPE, OPERATOR_NAME};
use crate::error::{Result, SyncError};
use crate::sync::SecretApi;
use crate::types::ObjectKey;
use async_trait::async_trait;
use http::{Request, Response};
use http_body_util::BodyExt;
use k8s_openapi::api::core::v1::{Namespace, Secret};
use k8s_openapi::ByteString;
use kube::api::ObjectMeta;
use kube::client::Body;
use kube::core::ErrorResponse;
use kube::{Client, ResourceExt};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tower::Service;

/// A request seen by [`MockService`]
#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub query: String,
    pub body: String,
}

/// A mock HTTP service that returns predefined responses based on request
/// method and path, and records every request it serves.
#[derive(Clone)]
pub struct MockService {
    responses: Arc<Mutex<HashMap<(String, String), (u16, String)>>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockService {
    pub fn new() -> Self {
        Self {
            responses: Arc::new(Mutex::new(HashMap::new())),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Add a response for requests with `method` matching the exact path
    pub fn on(self, method: &str, path: &str, status: u16, body: &str) -> Self {
        self.responses.lock().unwrap().insert(
            (method.to_string(), path.to_string()),
            (status, body.to_string()),
        );
        self
    }

    pub fn on_get(self, path: &str, status: u16, body: &str) -> Self {
        self.on("GET", path, status, body)
    }

    pub fn on_post(self, path: &str, status: u16, body: &str) -> Self {
        self.on("POST", path, status, body)
    }

    pub fn on_put(self, path: &str, status: u16, body: &str) -> Self {
        self.on("PUT", path, status, body)
    }

    pub fn on_delete(self, path: &str, status: u16, body: &str) -> Self {
        self.on("DELETE", path, status, body)
    }

    /// Requests served so far, in arrival order
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Build a kube Client from this mock service
    pub fn into_client(self) -> Client {
        Client::new(self, "default")
    }

    fn find_response(&self, method: &str, path: &str) -> Option<(u16, String)> {
        let responses = self.responses.lock().unwrap();
        responses
            .get(&(method.to_string(), path.to_string()))
            .cloned()
    }
}

impl Default for MockService {
    fn default() -> Self {
        Self::new()
    }
}

impl Service<Request<Body>> for MockService {
    type Response = Response<Body>;
    type Error = tower::BoxError;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = std::result::Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let method = req.method().to_string();
        let path = req.uri().path().to_string();
        let query = req.uri().query().unwrap_or_default().to_string();
        let response = self.find_response(&method, &path);
        let requests = self.requests.clone();

        Box::pin(async move {
            let body = req
                .into_body()
                .collect()
                .await
                .map(|c| String::from_utf8_lossy(&c.to_bytes()).into_owned())
                .unwrap_or_default();
            requests
                .lock()
                .unwrap()
                .push(RecordedRequest {
                    method,
                    path,
                    query,
                    body,
                });

            let (status, body) =
                response.unwrap_or_else(|| (404, not_found_json("resource", "unknown")));
            Ok(Response::builder()
                .status(status)
                .header("content-type", "application/json")
                .body(Body::from(body.into_bytes()))
                .unwrap())
        })
    }
}

/// A source-style secret with the replication type and one payload key
pub fn make_secret(name: &str, namespace: &str, password: &str) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            "password".to_string(),
            ByteString(password.as_bytes().to_vec()),
        )])),
        type_: Some(DEFAULT_SECRET_TYPE.to_string()),
        ..Default::default()
    }
}

pub fn make_namespace(name: &str) -> Namespace {
    Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Create a mock secret JSON response
pub fn secret_json(name: &str, namespace: &str, resource_version: &str) -> String {
    serde_json::json!({
        "apiVersion": "v1",
        "kind": "Secret",
        "metadata": {
            "name": name,
            "namespace": namespace,
            "resourceVersion": resource_version,
            "uid": "test-uid"
        },
        "type": DEFAULT_SECRET_TYPE
    })
    .to_string()
}

/// Create a failure Status response
pub fn status_json(code: u16, reason: &str, message: &str) -> String {
    serde_json::json!({
        "kind": "Status",
        "apiVersion": "v1",
        "status": "Failure",
        "message": message,
        "reason": reason,
        "code": code
    })
    .to_string()
}

/// Create a 404 not found response
pub fn not_found_json(resource: &str, name: &str) -> String {
    status_json(
        404,
        "NotFound",
        &format!("{} \"{}\" not found", resource, name),
    )
}

/// Failure to inject into [`FakeSecretApi`]
#[derive(Clone, Copy, Debug)]
pub enum Fault {
    Conflict,
    Forbidden,
}

struct Injected {
    op: &'static str,
    namespace: String,
    remaining: u32,
    fault: Fault,
}

#[derive(Default)]
struct FakeState {
    objects: BTreeMap<(String, String), Secret>,
    next_version: u64,
    calls: BTreeMap<&'static str, usize>,
    faults: Vec<Injected>,
}

impl FakeState {
    fn bump(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }

    fn record(&mut self, op: &'static str, namespace: &str, name: &str) -> Result<()> {
        *self.calls.entry(op).or_default() += 1;
        let hit = self
            .faults
            .iter_mut()
            .find(|f| f.op == op && f.namespace == namespace && f.remaining > 0);
        let Some(injected) = hit else {
            return Ok(());
        };
        injected.remaining -= 1;
        let key = ObjectKey::namespaced(namespace, name);
        Err(match injected.fault {
            Fault::Conflict => SyncError::Conflict(key),
            Fault::Forbidden => SyncError::KubeError(kube::Error::Api(ErrorResponse {
                status: "Failure".to_string(),
                message: format!("secrets is forbidden in {}", namespace),
                reason: "Forbidden".to_string(),
                code: 403,
            })),
        })
    }
}

/// In-memory [`SecretApi`] with per-object resource versions and
/// optimistic-concurrency checks like the real API server.
#[derive(Default)]
pub struct FakeSecretApi {
    state: Mutex<FakeState>,
}

impl FakeSecretApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an object as if it already existed, with a fresh version
    pub fn seed(&self, mut secret: Secret) -> Secret {
        let mut state = self.state.lock().unwrap();
        secret.metadata.resource_version = Some(state.bump());
        let key = (secret.namespace().unwrap_or_default(), secret.name_any());
        state.objects.insert(key, secret.clone());
        secret
    }

    /// Fail the next `times` calls of `op` in `namespace`
    pub fn inject(&self, op: &'static str, namespace: &str, times: u32, fault: Fault) {
        self.state.lock().unwrap().faults.push(Injected {
            op,
            namespace: namespace.to_string(),
            remaining: times,
            fault,
        });
    }

    pub fn secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.state
            .lock()
            .unwrap()
            .objects
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Namespaces holding a secret called `name`
    pub fn namespaces_with(&self, name: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .objects
            .keys()
            .filter(|(_, n)| n == name)
            .map(|(ns, _)| ns.clone())
            .collect()
    }

    pub fn calls(&self, op: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .get(op)
            .copied()
            .unwrap_or_default()
    }

    /// Number of mutating calls made
    pub fn writes(&self) -> usize {
        self.calls("create") + self.calls("replace") + self.calls("delete")
    }
}

#[async_trait]
impl SecretApi for FakeSecretApi {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        let mut state = self.state.lock().unwrap();
        state.record("get", namespace, name)?;
        Ok(state
            .objects
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn create(&self, namespace: &str, secret: &Secret) -> Result<Secret> {
        let name = secret.name_any();
        let mut state = self.state.lock().unwrap();
        state.record("create", namespace, &name)?;
        let key = (namespace.to_string(), name.clone());
        if state.objects.contains_key(&key) {
            return Err(SyncError::Conflict(ObjectKey::namespaced(namespace, &name)));
        }
        let mut stored = secret.clone();
        stored.metadata.namespace = Some(namespace.to_string());
        stored.metadata.resource_version = Some(state.bump());
        stored.metadata.uid = Some(format!("uid-{}-{}", namespace, name));
        state.objects.insert(key, stored.clone());
        Ok(stored)
    }

    async fn replace(&self, namespace: &str, secret: &Secret) -> Result<Secret> {
        let name = secret.name_any();
        let mut state = self.state.lock().unwrap();
        state.record("replace", namespace, &name)?;
        let key = (namespace.to_string(), name.clone());
        let current_version = match state.objects.get(&key) {
            Some(current) => current.metadata.resource_version.clone(),
            None => return Err(SyncError::NotFound(ObjectKey::namespaced(namespace, &name))),
        };
        if secret.metadata.resource_version != current_version {
            return Err(SyncError::Conflict(ObjectKey::namespaced(namespace, &name)));
        }
        let mut stored = secret.clone();
        stored.metadata.resource_version = Some(state.bump());
        state.objects.insert(key, stored.clone());
        Ok(stored)
    }

    async fn list_managed(&self) -> Result<Vec<Secret>> {
        let mut state = self.state.lock().unwrap();
        state.record("list", "", "")?;
        Ok(state
            .objects
            .values()
            .filter(|s| s.labels().get(labels::MANAGED_BY).map(String::as_str) == Some(OPERATOR_NAME))
            .cloned()
            .collect())
    }

    async fn delete(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<&str>,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.record("delete", namespace, name)?;
        let key = (namespace.to_string(), name.to_string());
        let current_version = match state.objects.get(&key) {
            Some(current) => current.metadata.resource_version.clone(),
            None => return Err(SyncError::NotFound(ObjectKey::namespaced(namespace, name))),
        };
        if resource_version.is_some() && resource_version != current_version.as_deref() {
            return Err(SyncError::Conflict(ObjectKey::namespaced(namespace, name)));
        }
        state.objects.remove(&key);
        Ok(())
    }
}
