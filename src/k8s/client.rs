//! Kubernetes client wrapper implementing the cluster gateway

use async_trait::async_trait;
use futures::channel::{mpsc, oneshot};
use futures::{AsyncRead, AsyncReadExt, SinkExt, StreamExt};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Namespace, ObjectReference, Pod, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::{
    api::{Api, DeleteParams, ListParams, LogParams, PostParams},
    runtime::events::{Event, EventType, Recorder, Reporter},
    Client, Config, Resource,
};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use tracing::{debug, info, instrument};

use super::gateway::{ClusterGateway, LogStream, SuccessEvent};
use crate::e2e::{ObjectKind, ObjectRef};
use crate::error::{E2eError, E2eResult};

/// Size of a single log read
const LOG_READ_BUFFER: usize = 1024;
/// Chunks buffered between the log reader task and the consumer
const LOG_CHANNEL_CAPACITY: usize = 16;
/// Controller name events are reported under
const REPORTER_NAME: &str = "e2e-k8s";

/// Wrapper around kube::Client talking to the cluster under test
#[derive(Clone)]
pub struct K8sClient {
    client: Client,
}

impl K8sClient {
    /// Create a new K8sClient using the in-cluster config or the default kubeconfig
    #[instrument(skip_all)]
    pub async fn new() -> E2eResult<Self> {
        let config = Config::infer()
            .await
            .map_err(|e| E2eError::Kubernetes(kube::Error::InferConfig(e)))?;
        let client = Client::try_from(config)?;

        info!("Connected to Kubernetes cluster");

        Ok(Self { client })
    }

    /// Check if cluster is reachable
    pub async fn health_check(&self) -> E2eResult<String> {
        let version = self.client.apiserver_version().await?;
        info!(version = %version.git_version, "Kubernetes cluster is healthy");
        Ok(version.git_version)
    }

    fn namespaced<K>(&self, namespace: Option<&str>) -> Api<K>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::default_namespaced(self.client.clone()),
        }
    }

    async fn create_in<K>(&self, api: Api<K>, object: &K) -> E2eResult<K>
    where
        K: Resource + Clone + DeserializeOwned + serde::Serialize + Debug,
        <K as Resource>::DynamicType: Default,
    {
        let created = api.create(&PostParams::default(), object).await?;
        info!(
            kind = %K::kind(&Default::default()),
            name = %created.meta().name.as_deref().unwrap_or("unknown"),
            "Created object"
        );
        Ok(created)
    }

    async fn delete_in<K>(&self, api: Api<K>, name: &str) -> E2eResult<()>
    where
        K: Resource + Clone + DeserializeOwned + Debug,
    {
        api.delete(name, &DeleteParams::default()).await?;
        Ok(())
    }
}

#[async_trait]
impl ClusterGateway for K8sClient {
    #[instrument(skip(self, namespace), fields(name = %namespace.metadata.name.as_deref().unwrap_or("unknown")))]
    async fn create_namespace(&self, namespace: &Namespace) -> E2eResult<Namespace> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        self.create_in(api, namespace).await
    }

    #[instrument(skip(self, deployment))]
    async fn create_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> E2eResult<Deployment> {
        self.create_in(self.namespaced(Some(namespace)), deployment).await
    }

    #[instrument(skip(self, service))]
    async fn create_service(&self, namespace: &str, service: &Service) -> E2eResult<Service> {
        self.create_in(self.namespaced(Some(namespace)), service).await
    }

    #[instrument(skip(self, ingress))]
    async fn create_ingress(&self, namespace: &str, ingress: &Ingress) -> E2eResult<Ingress> {
        self.create_in(self.namespaced(Some(namespace)), ingress).await
    }

    #[instrument(skip(self, pod))]
    async fn create_pod(&self, namespace: &str, pod: &Pod) -> E2eResult<Pod> {
        self.create_in(self.namespaced(Some(namespace)), pod).await
    }

    async fn get_namespace(&self, name: &str) -> E2eResult<Namespace> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        Ok(api.get(name).await?)
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> E2eResult<Pod> {
        let pods: Api<Pod> = self.namespaced(Some(namespace));
        Ok(pods.get(name).await?)
    }

    async fn get_job(&self, namespace: &str, name: &str) -> E2eResult<Job> {
        let jobs: Api<Job> = self.namespaced(Some(namespace));
        Ok(jobs.get(name).await?)
    }

    async fn list_pods(&self, namespace: &str, label_selector: &str) -> E2eResult<Vec<Pod>> {
        let pods: Api<Pod> = self.namespaced(Some(namespace));
        let list = pods
            .list(&ListParams::default().labels(label_selector))
            .await?;
        debug!(namespace, label_selector, count = list.items.len(), "Listed pods");
        Ok(list.items)
    }

    #[instrument(skip(self), fields(object = %object))]
    async fn delete(&self, object: &ObjectRef) -> E2eResult<()> {
        let ns = object.namespace.as_deref();
        let name = object.name.as_str();
        match object.kind {
            ObjectKind::Namespace => {
                let api: Api<Namespace> = Api::all(self.client.clone());
                self.delete_in(api, name).await?
            }
            ObjectKind::Deployment => {
                self.delete_in::<Deployment>(self.namespaced(ns), name).await?
            }
            ObjectKind::Service => self.delete_in::<Service>(self.namespaced(ns), name).await?,
            ObjectKind::Ingress => self.delete_in::<Ingress>(self.namespaced(ns), name).await?,
            ObjectKind::Pod => self.delete_in::<Pod>(self.namespaced(ns), name).await?,
            ObjectKind::Job => self.delete_in::<Job>(self.namespaced(ns), name).await?,
        }
        info!("Deleted object");
        Ok(())
    }

    /// Open a following log stream
    ///
    /// A spawned task owns the HTTP body and forwards read buffers over a
    /// bounded channel; dropping the returned stream stops the task and
    /// closes the connection.
    #[instrument(skip(self))]
    async fn pod_logs(&self, namespace: &str, pod: &str) -> E2eResult<LogStream> {
        let pods: Api<Pod> = self.namespaced(Some(namespace));
        let name = pod.to_string();
        let (tx, rx) = mpsc::channel(LOG_CHANNEL_CAPACITY);
        let (opened_tx, opened_rx) = oneshot::channel::<E2eResult<()>>();

        tokio::spawn(async move {
            let params = LogParams {
                follow: true,
                ..Default::default()
            };
            match pods.log_stream(&name, &params).await {
                Ok(reader) => {
                    let _ = opened_tx.send(Ok(()));
                    forward_chunks(reader, tx).await;
                }
                Err(e) => {
                    let _ = opened_tx.send(Err(e.into()));
                }
            }
            debug!(pod = %name, "Log reader finished");
        });

        match opened_rx.await {
            Ok(Ok(())) => Ok(rx.boxed()),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(E2eError::LogStream(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "log reader task ended before the stream opened",
            ))),
        }
    }

    #[instrument(skip(self, regarding, event), fields(regarding = ?regarding.name))]
    async fn emit_event(&self, regarding: &ObjectReference, event: &SuccessEvent) -> E2eResult<()> {
        let reporter = Reporter {
            controller: REPORTER_NAME.to_string(),
            instance: std::env::var("HOSTNAME").ok(),
        };
        let recorder = Recorder::new(self.client.clone(), reporter, regarding.clone());
        recorder
            .publish(Event {
                type_: EventType::Normal,
                reason: event.reason.clone(),
                note: Some(event.note.clone()),
                action: event.action.clone(),
                secondary: None,
            })
            .await?;
        info!(reason = %event.reason, "Published event");
        Ok(())
    }
}

/// Pump read buffers into the channel until EOF, a read error or a gone consumer
async fn forward_chunks<R: AsyncRead>(reader: R, mut tx: mpsc::Sender<E2eResult<Vec<u8>>>) {
    futures::pin_mut!(reader);
    let mut buf = vec![0u8; LOG_READ_BUFFER];
    loop {
        let item = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => Ok(buf[..n].to_vec()),
            Err(e) => Err(E2eError::LogStream(e)),
        };
        let failed = item.is_err();
        if tx.send(item).await.is_err() || failed {
            break;
        }
    }
}
