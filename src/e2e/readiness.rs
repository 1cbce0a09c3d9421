//! Bounded wait for a pod to reach the Running phase

use k8s_openapi::api::core::v1::Pod;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, instrument};

use crate::config::Config;
use crate::error::{E2eError, E2eResult};
use crate::k8s::resources::label_selector;
use crate::k8s::ClusterGateway;

/// Pod lifecycle phase as reported by the cluster
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl From<&str> for PodPhase {
    fn from(phase: &str) -> Self {
        match phase {
            "Pending" => PodPhase::Pending,
            "Running" => PodPhase::Running,
            "Succeeded" => PodPhase::Succeeded,
            "Failed" => PodPhase::Failed,
            _ => PodPhase::Unknown,
        }
    }
}

pub fn pod_phase(pod: &Pod) -> PodPhase {
    pod.status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .map(PodPhase::from)
        .unwrap_or(PodPhase::Unknown)
}

/// Polling cadence and deadline
#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    /// Delay after a list that returned pods, none of them running
    pub poll_interval: Duration,
    /// Delay after a list that returned no pods at all
    pub absent_interval: Duration,
    /// Upper bound on the whole wait
    pub timeout: Duration,
}

impl From<&Config> for PollSettings {
    fn from(config: &Config) -> Self {
        Self {
            poll_interval: config.pod_poll_interval(),
            absent_interval: config.pod_absent_poll_interval(),
            timeout: config.readiness_timeout(),
        }
    }
}

/// Waits until a pod matching `e2e=<label>` is Running
pub struct ReadinessPoller<'a> {
    gateway: &'a dyn ClusterGateway,
    settings: PollSettings,
}

impl<'a> ReadinessPoller<'a> {
    pub fn new(gateway: &'a dyn ClusterGateway, settings: PollSettings) -> Self {
        Self { gateway, settings }
    }

    /// Return the first Running pod seen
    ///
    /// Pending and crash-looping pods are not told apart: both keep the poll
    /// going until the deadline, which yields [`E2eError::Timeout`]. A failed
    /// list call ends the wait with that error.
    #[instrument(skip(self))]
    pub async fn wait_until_running(&self, namespace: &str, label: &str) -> E2eResult<Pod> {
        let timeout = self.settings.timeout;
        match tokio::time::timeout(timeout, self.poll(namespace, label)).await {
            Ok(result) => result,
            Err(_) => Err(E2eError::timeout(
                format!(
                    "a running pod matching {} in namespace {}",
                    label_selector(label),
                    namespace
                ),
                timeout,
            )),
        }
    }

    async fn poll(&self, namespace: &str, label: &str) -> E2eResult<Pod> {
        let selector = label_selector(label);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let pods = self.gateway.list_pods(namespace, &selector).await?;

            if pods.is_empty() {
                debug!(attempt, "No pods found yet");
                tokio::time::sleep(self.settings.absent_interval).await;
                continue;
            }

            let phases: Vec<PodPhase> = pods.iter().map(pod_phase).collect();
            if let Some(pod) = pods
                .into_iter()
                .find(|p| pod_phase(p) == PodPhase::Running)
            {
                info!(
                    pod = %pod.metadata.name.as_deref().unwrap_or("unknown"),
                    attempt,
                    "Pod is running"
                );
                return Ok(pod);
            }

            debug!(attempt, ?phases, "Pods found but none running");
            tokio::time::sleep(self.settings.poll_interval).await;
        }
    }
}
