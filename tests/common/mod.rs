//! In-memory cluster used by the integration tests
//!
//! Pods created directly or through a Deployment come up Running at once with
//! a fixed IP. Failures can be injected per object kind.

#![allow(dead_code)]

use async_trait::async_trait;
use futures::{stream, StreamExt};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Namespace, ObjectReference, Pod, PodStatus, Service};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::error::ErrorResponse;
use serde::Serialize;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Mutex;

use e2e_k8s::e2e::{ObjectKind, ObjectRef};
use e2e_k8s::error::{E2eError, E2eResult};
use e2e_k8s::k8s::{ClusterGateway, LogStream, SuccessEvent};

pub const WORKLOAD_POD_IP: &str = "10.42.0.7";
pub const PROBE_POD_IP: &str = "10.42.1.3";

pub fn api_error(code: u16, reason: &str) -> E2eError {
    E2eError::Kubernetes(kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: format!("injected {}", reason),
        reason: reason.to_string(),
        code,
    }))
}

#[derive(Default)]
struct State {
    objects: BTreeMap<ObjectRef, serde_json::Value>,
    pods: Vec<Pod>,
    jobs: Vec<Job>,
    created: Vec<ObjectRef>,
    deleted: Vec<ObjectRef>,
    events: Vec<(ObjectReference, SuccessEvent)>,
    log_chunks: Vec<String>,
    fail_create: Option<(ObjectKind, u16)>,
    fail_delete: Option<(ObjectKind, u16)>,
    stall_create: Option<ObjectKind>,
}

#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<State>,
}

impl FakeCluster {
    /// A cluster holding the Job the run reports against, whose probe
    /// reports the flow closed once before opening
    pub fn new(job_namespace: &str, job_name: &str) -> Self {
        let cluster = Self::default();
        {
            let mut state = cluster.state.lock().unwrap();
            state.jobs.push(Job {
                metadata: ObjectMeta {
                    name: Some(job_name.to_string()),
                    namespace: Some(job_namespace.to_string()),
                    uid: Some("job-uid".to_string()),
                    ..Default::default()
                },
                ..Default::default()
            });
            state.log_chunks = vec![
                "Flow is not open\n".to_string(),
                "Flow is ope".to_string(),
                "n\n".to_string(),
            ];
        }
        cluster
    }

    pub fn with_log_chunks(self, chunks: &[&str]) -> Self {
        self.state.lock().unwrap().log_chunks = chunks.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn failing_create(self, kind: ObjectKind, code: u16) -> Self {
        self.state.lock().unwrap().fail_create = Some((kind, code));
        self
    }

    pub fn failing_delete(self, kind: ObjectKind, code: u16) -> Self {
        self.state.lock().unwrap().fail_delete = Some((kind, code));
        self
    }

    /// Creates of `kind` store the object and then never return
    pub fn stalling_create(self, kind: ObjectKind) -> Self {
        self.state.lock().unwrap().stall_create = Some(kind);
        self
    }

    /// A namespace that exists before the run starts
    pub fn with_namespace(self, name: &str, labels: Option<BTreeMap<String, String>>) -> Self {
        let namespace = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels,
                ..Default::default()
            },
            ..Default::default()
        };
        self.state.lock().unwrap().objects.insert(
            ObjectRef::namespace(name),
            serde_json::to_value(&namespace).unwrap(),
        );
        self
    }

    pub fn without_jobs(self) -> Self {
        self.state.lock().unwrap().jobs.clear();
        self
    }

    /// Objects still present on the cluster
    pub fn live_objects(&self) -> Vec<ObjectRef> {
        self.state.lock().unwrap().objects.keys().cloned().collect()
    }

    pub fn object(&self, object: &ObjectRef) -> Option<serde_json::Value> {
        self.state.lock().unwrap().objects.get(object).cloned()
    }

    pub fn created(&self) -> Vec<ObjectRef> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn deleted(&self) -> Vec<ObjectRef> {
        self.state.lock().unwrap().deleted.clone()
    }

    pub fn events(&self) -> Vec<(ObjectReference, SuccessEvent)> {
        self.state.lock().unwrap().events.clone()
    }

    async fn store<T: Serialize>(&self, object: ObjectRef, spec: &T) -> E2eResult<()> {
        let stall = {
            let mut state = self.state.lock().unwrap();
            Self::insert(&mut state, object.clone(), spec)?;
            state.stall_create == Some(object.kind)
        };
        if stall {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    fn insert<T: Serialize>(state: &mut State, object: ObjectRef, spec: &T) -> E2eResult<()> {
        if let Some((kind, code)) = state.fail_create {
            if kind == object.kind {
                return Err(api_error(code, "CreateFailed"));
            }
        }
        if state.objects.contains_key(&object) {
            return Err(api_error(409, "AlreadyExists"));
        }
        let value = serde_json::to_value(spec).unwrap();
        state.objects.insert(object.clone(), value);
        state.created.push(object);
        Ok(())
    }

    fn add_running_pod(&self, namespace: &str, name: &str, meta: &ObjectMeta, ip: &str) {
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                labels: meta.labels.clone(),
                ..Default::default()
            },
            status: Some(PodStatus {
                phase: Some("Running".to_string()),
                pod_ip: Some(ip.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        self.state.lock().unwrap().pods.push(pod);
    }
}

fn name_of(meta: &ObjectMeta) -> &str {
    meta.name.as_deref().unwrap_or_default()
}

#[async_trait]
impl ClusterGateway for FakeCluster {
    async fn create_namespace(&self, namespace: &Namespace) -> E2eResult<Namespace> {
        self.store(ObjectRef::namespace(name_of(&namespace.metadata)), namespace)
            .await?;
        Ok(namespace.clone())
    }

    async fn create_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> E2eResult<Deployment> {
        let name = name_of(&deployment.metadata);
        self.store(
            ObjectRef::namespaced(ObjectKind::Deployment, namespace, name),
            deployment,
        )
        .await?;

        let template = deployment
            .spec
            .as_ref()
            .and_then(|s| s.template.metadata.clone())
            .unwrap_or_default();
        self.add_running_pod(namespace, &format!("{}-7d9f", name), &template, WORKLOAD_POD_IP);
        Ok(deployment.clone())
    }

    async fn create_service(&self, namespace: &str, service: &Service) -> E2eResult<Service> {
        self.store(
            ObjectRef::namespaced(ObjectKind::Service, namespace, name_of(&service.metadata)),
            service,
        )
        .await?;
        Ok(service.clone())
    }

    async fn create_ingress(&self, namespace: &str, ingress: &Ingress) -> E2eResult<Ingress> {
        self.store(
            ObjectRef::namespaced(ObjectKind::Ingress, namespace, name_of(&ingress.metadata)),
            ingress,
        )
        .await?;
        Ok(ingress.clone())
    }

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> E2eResult<Pod> {
        let name = name_of(&pod.metadata);
        self.store(ObjectRef::namespaced(ObjectKind::Pod, namespace, name), pod)
            .await?;
        self.add_running_pod(namespace, name, &pod.metadata, PROBE_POD_IP);
        Ok(pod.clone())
    }

    async fn get_namespace(&self, name: &str) -> E2eResult<Namespace> {
        let value = self
            .state
            .lock()
            .unwrap()
            .objects
            .get(&ObjectRef::namespace(name))
            .cloned()
            .ok_or_else(|| api_error(404, "NotFound"))?;
        Ok(serde_json::from_value(value).unwrap())
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> E2eResult<Pod> {
        self.state
            .lock()
            .unwrap()
            .pods
            .iter()
            .find(|p| {
                p.metadata.namespace.as_deref() == Some(namespace) && name_of(&p.metadata) == name
            })
            .cloned()
            .ok_or_else(|| api_error(404, "NotFound"))
    }

    async fn get_job(&self, namespace: &str, name: &str) -> E2eResult<Job> {
        self.state
            .lock()
            .unwrap()
            .jobs
            .iter()
            .find(|j| {
                j.metadata.namespace.as_deref() == Some(namespace) && name_of(&j.metadata) == name
            })
            .cloned()
            .ok_or_else(|| api_error(404, "NotFound"))
    }

    async fn list_pods(&self, namespace: &str, label_selector: &str) -> E2eResult<Vec<Pod>> {
        let (key, value) = label_selector
            .split_once('=')
            .ok_or_else(|| api_error(400, "BadRequest"))?;
        let state = self.state.lock().unwrap();
        Ok(state
            .pods
            .iter()
            .filter(|p| p.metadata.namespace.as_deref() == Some(namespace))
            .filter(|p| {
                p.metadata
                    .labels
                    .as_ref()
                    .and_then(|l| l.get(key))
                    .map(|v| v == value)
                    .unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    async fn delete(&self, object: &ObjectRef) -> E2eResult<()> {
        let mut state = self.state.lock().unwrap();
        if let Some((kind, code)) = state.fail_delete {
            if kind == object.kind {
                return Err(api_error(code, "DeleteFailed"));
            }
        }
        if state.objects.remove(object).is_none() {
            return Err(api_error(404, "NotFound"));
        }
        match object.kind {
            ObjectKind::Deployment => {
                let prefix = format!("{}-", object.name);
                state.pods.retain(|p| !name_of(&p.metadata).starts_with(&prefix));
            }
            ObjectKind::Pod => state.pods.retain(|p| name_of(&p.metadata) != object.name),
            _ => {}
        }
        state.deleted.push(object.clone());
        Ok(())
    }

    async fn pod_logs(&self, namespace: &str, pod: &str) -> E2eResult<LogStream> {
        self.get_pod(namespace, pod).await?;
        let chunks: Vec<E2eResult<Vec<u8>>> = self
            .state
            .lock()
            .unwrap()
            .log_chunks
            .iter()
            .map(|c| Ok(c.as_bytes().to_vec()))
            .collect();
        Ok(stream::iter(chunks).boxed())
    }

    async fn emit_event(
        &self,
        regarding: &ObjectReference,
        event: &SuccessEvent,
    ) -> E2eResult<()> {
        self.state
            .lock()
            .unwrap()
            .events
            .push((regarding.clone(), event.clone()));
        Ok(())
    }
}

/// Serve `GET /demo-k8s` with a fixed status on an ephemeral port
pub async fn spawn_ingress(status: u16) -> SocketAddr {
    use axum::{http::StatusCode, routing::get, Router};

    let status = StatusCode::from_u16(status).unwrap();
    let app = Router::new().route("/demo-k8s", get(move || async move { (status, "Hello world!") }));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Like `spawn_ingress(200)`, but each response takes `delay`
pub async fn spawn_slow_ingress(delay: std::time::Duration) -> SocketAddr {
    use axum::{routing::get, Router};

    let app = Router::new().route(
        "/demo-k8s",
        get(move || async move {
            tokio::time::sleep(delay).await;
            "Hello world!"
        }),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// An address nothing listens on
pub async fn closed_port() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}
