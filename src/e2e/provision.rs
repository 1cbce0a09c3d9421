//! Resource provisioning in dependency order
//!
//! namespaces → deployment → (running) → service → ingress → probe pod → (running)
//!
//! Every object is recorded in the manifest before its create call goes out,
//! so a create cut short by a shutdown is still torn down. Teardown treats an
//! object that never made it as already gone.

use k8s_openapi::api::core::v1::Pod;
use tracing::{info, instrument, warn};

use super::manifest::{Manifest, ObjectKind, ObjectRef};
use super::readiness::{PollSettings, ReadinessPoller};
use crate::error::{E2eError, E2eResult};
use crate::k8s::resources::{
    create_namespace, create_probe_pod, create_workload_deployment, create_workload_ingress,
    create_workload_service, is_e2e_namespace, INGRESS_NAME, PROBE_LABEL, PROBE_POD_NAME,
    SERVICE_NAME, WORKLOAD_LABEL, WORKLOAD_NAME,
};
use crate::k8s::ClusterGateway;

/// Inputs that shape the provisioned objects
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionPlan {
    pub demo_namespace: String,
    pub net_namespace: String,
    pub registry: String,
    /// Host the ingress rule matches; `None` matches any host
    pub ingress_host: Option<String>,
}

/// The running probe the validator reads from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    pub namespace: String,
    pub pod_name: String,
    /// IP of the workload pod the probe connects to
    pub workload_ip: String,
}

pub struct Provisioner<'a> {
    gateway: &'a dyn ClusterGateway,
    poller: ReadinessPoller<'a>,
    plan: &'a ProvisionPlan,
}

impl<'a> Provisioner<'a> {
    pub fn new(gateway: &'a dyn ClusterGateway, poll: PollSettings, plan: &'a ProvisionPlan) -> Self {
        Self {
            gateway,
            poller: ReadinessPoller::new(gateway, poll),
            plan,
        }
    }

    /// Create every object of the run, recording each one in `manifest`
    ///
    /// Stops at the first failure; whatever was recorded so far stays in the
    /// manifest for teardown.
    #[instrument(skip_all)]
    pub async fn provision(&self, manifest: &mut Manifest) -> E2eResult<ProbeTarget> {
        info!("Creating demo namespaces..");
        self.create_namespaces(manifest).await?;

        info!("Creating and exposing the demo workload..");
        let workload_pod = self.create_workload(manifest).await?;

        info!("Creating ingress for the demo workload..");
        self.create_ingress(manifest).await?;

        info!("Creating network probe pod..");
        self.create_probe(&workload_pod, manifest).await
    }

    async fn create_namespaces(&self, manifest: &mut Manifest) -> E2eResult<()> {
        for name in [&self.plan.demo_namespace, &self.plan.net_namespace] {
            let object = ObjectRef::namespace(name);

            // Leftover from an interrupted run: take it over only if it is ours
            match self.gateway.get_namespace(name).await {
                Ok(existing) => {
                    self.ensure_owned(name, is_e2e_namespace(&existing))?;
                    warn!(namespace = %name, "Namespace already exists, adopting it");
                    manifest.record(object);
                    continue;
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }

            manifest.record(object.clone());
            match self.gateway.create_namespace(&create_namespace(name)).await {
                Ok(_) => {}
                // Appeared between the lookup and the create
                Err(e) if e.is_conflict() => {
                    let owned = self
                        .gateway
                        .get_namespace(name)
                        .await
                        .and_then(|existing| self.ensure_owned(name, is_e2e_namespace(&existing)));
                    if let Err(e) = owned {
                        manifest.forget(&object);
                        return Err(e);
                    }
                    warn!(namespace = %name, "Namespace already exists, adopting it");
                }
                Err(e) => {
                    // The API server answered, so nothing was created
                    if e.status_code().is_some() {
                        manifest.forget(&object);
                    }
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    fn ensure_owned(&self, name: &str, owned: bool) -> E2eResult<()> {
        if owned {
            Ok(())
        } else {
            Err(E2eError::NamespaceNotOwned {
                namespace: name.to_string(),
            })
        }
    }

    /// Deployment, wait for its pod, then the service in front of it
    async fn create_workload(&self, manifest: &mut Manifest) -> E2eResult<Pod> {
        let ns = self.plan.demo_namespace.as_str();

        manifest.record(ObjectRef::namespaced(ObjectKind::Deployment, ns, WORKLOAD_NAME));
        self.gateway
            .create_deployment(ns, &create_workload_deployment(ns, &self.plan.registry))
            .await?;

        let pod = self.poller.wait_until_running(ns, WORKLOAD_LABEL).await?;

        manifest.record(ObjectRef::namespaced(ObjectKind::Service, ns, SERVICE_NAME));
        self.gateway
            .create_service(ns, &create_workload_service(ns))
            .await?;

        Ok(pod)
    }

    async fn create_ingress(&self, manifest: &mut Manifest) -> E2eResult<()> {
        let ns = self.plan.demo_namespace.as_str();
        manifest.record(ObjectRef::namespaced(ObjectKind::Ingress, ns, INGRESS_NAME));
        self.gateway
            .create_ingress(
                ns,
                &create_workload_ingress(ns, self.plan.ingress_host.as_deref()),
            )
            .await?;
        Ok(())
    }

    async fn create_probe(&self, workload_pod: &Pod, manifest: &mut Manifest) -> E2eResult<ProbeTarget> {
        let workload_ip = pod_ip(workload_pod, &self.plan.demo_namespace)?;
        let ns = self.plan.net_namespace.as_str();

        info!(target_ip = %workload_ip, "Probing workload pod from namespace {}", ns);
        manifest.record(ObjectRef::namespaced(ObjectKind::Pod, ns, PROBE_POD_NAME));
        self.gateway
            .create_pod(ns, &create_probe_pod(ns, &self.plan.registry, &workload_ip))
            .await?;

        self.poller.wait_until_running(ns, PROBE_LABEL).await?;

        Ok(ProbeTarget {
            namespace: ns.to_string(),
            pod_name: PROBE_POD_NAME.to_string(),
            workload_ip,
        })
    }
}

/// IP of a running pod; an empty or missing IP is an error
fn pod_ip(pod: &Pod, namespace: &str) -> E2eResult<String> {
    pod.status
        .as_ref()
        .and_then(|s| s.pod_ip.clone())
        .filter(|ip| !ip.is_empty())
        .ok_or_else(|| E2eError::PodIpUnavailable {
            namespace: namespace.to_string(),
            pod: pod.metadata.name.clone().unwrap_or_default(),
        })
}
