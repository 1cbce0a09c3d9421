//! The seam between the e2e pipeline and the cluster
//!
//! Everything the pipeline does to the cluster goes through [`ClusterGateway`],
//! which lets tests swap the API server for a mock or an in-memory fake.

use async_trait::async_trait;
use futures::stream::BoxStream;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Namespace, ObjectReference, Pod, Service};
use k8s_openapi::api::networking::v1::Ingress;

use crate::e2e::ObjectRef;
use crate::error::E2eResult;

/// Raw log bytes, one read buffer per item
pub type LogStream = BoxStream<'static, E2eResult<Vec<u8>>>;

pub const EVENT_REASON: &str = "E2E testing";
pub const EVENT_MESSAGE: &str = "Successfully running e2e testing against cluster";

/// Audit record attached to the target object after a successful run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuccessEvent {
    pub reason: String,
    pub note: String,
    pub action: String,
}

impl Default for SuccessEvent {
    fn default() -> Self {
        Self {
            reason: EVENT_REASON.to_string(),
            note: EVENT_MESSAGE.to_string(),
            action: "Validate".to_string(),
        }
    }
}

/// Typed access to the remote object store
///
/// Implementations do not retry; callers own the retry policy.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClusterGateway: Send + Sync {
    async fn create_namespace(&self, namespace: &Namespace) -> E2eResult<Namespace>;

    async fn create_deployment(&self, namespace: &str, deployment: &Deployment)
        -> E2eResult<Deployment>;

    async fn create_service(&self, namespace: &str, service: &Service) -> E2eResult<Service>;

    async fn create_ingress(&self, namespace: &str, ingress: &Ingress) -> E2eResult<Ingress>;

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> E2eResult<Pod>;

    async fn get_namespace(&self, name: &str) -> E2eResult<Namespace>;

    async fn get_pod(&self, namespace: &str, name: &str) -> E2eResult<Pod>;

    async fn get_job(&self, namespace: &str, name: &str) -> E2eResult<Job>;

    /// List pods in `namespace` matching `label_selector` (`key=value`)
    async fn list_pods(&self, namespace: &str, label_selector: &str) -> E2eResult<Vec<Pod>>;

    /// Delete any managed object. Deletion is asynchronous on the cluster side.
    async fn delete(&self, object: &ObjectRef) -> E2eResult<()>;

    /// Open a following log stream for a pod
    async fn pod_logs(&self, namespace: &str, pod: &str) -> E2eResult<LogStream>;

    async fn emit_event(&self, regarding: &ObjectReference, event: &SuccessEvent)
        -> E2eResult<()>;
}
