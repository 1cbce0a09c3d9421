//! Flow validation: probe logs, ingress reachability, success event

use kube::Resource;
use reqwest::{StatusCode, Url};
use std::net::IpAddr;
use std::time::Duration;
use tracing::{info, instrument, warn};

use super::logs::{decode_chunks, watch_flow, FlowObservation};
use super::provision::ProbeTarget;
use crate::config::Config;
use crate::error::{E2eError, E2eResult};
use crate::k8s::resources::{INGRESS_PATH, WORKLOAD_PORT};
use crate::k8s::{ClusterGateway, SuccessEvent};

/// External entry point of the demo workload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngressEndpoint {
    host: String,
    check_url: Url,
}

impl IngressEndpoint {
    /// Accepts `https://demo.example.com`, `demo.example.com` (http assumed)
    /// or either with a trailing slash.
    pub fn parse(raw: &str) -> E2eResult<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(E2eError::InvalidIngressUrl("empty ingress URL".to_string()));
        }

        let base = if raw.contains("://") {
            raw.to_string()
        } else {
            format!("http://{}", raw)
        };
        let check_url = Url::parse(&format!("{}{}", base.trim_end_matches('/'), INGRESS_PATH))
            .map_err(|e| E2eError::InvalidIngressUrl(format!("{}: {}", raw, e)))?;
        let host = check_url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| E2eError::InvalidIngressUrl(format!("{}: no host", raw)))?
            .to_string();

        Ok(Self { host, check_url })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Host for the ingress rule; IP literals are not valid rule hosts, so
    /// those get a rule matching any host.
    pub fn rule_host(&self) -> Option<&str> {
        let bare = self.host.trim_start_matches('[').trim_end_matches(']');
        match bare.parse::<IpAddr>() {
            Ok(_) => None,
            Err(_) => Some(&self.host),
        }
    }

    /// URL the reachability check requests
    pub fn check_url(&self) -> &Url {
        &self.check_url
    }
}

/// The object the success event is recorded against
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventTarget {
    pub namespace: String,
    pub job_name: String,
}

#[derive(Debug, Clone, Copy)]
pub struct ValidationSettings {
    /// Upper bound on waiting for the probe to report the flow open
    pub flow_timeout: Duration,
    /// Pause after publishing the event
    pub event_settle: Duration,
}

impl From<&Config> for ValidationSettings {
    fn from(config: &Config) -> Self {
        Self {
            flow_timeout: config.flow_timeout(),
            event_settle: config.event_settle(),
        }
    }
}

pub struct FlowValidator<'a> {
    gateway: &'a dyn ClusterGateway,
    http: reqwest::Client,
    settings: ValidationSettings,
}

impl<'a> FlowValidator<'a> {
    pub fn new(
        gateway: &'a dyn ClusterGateway,
        http: reqwest::Client,
        settings: ValidationSettings,
    ) -> Self {
        Self {
            gateway,
            http,
            settings,
        }
    }

    /// Network flow, then ingress flow, then the success event
    ///
    /// Any failed check is fatal and no event is recorded.
    #[instrument(skip_all, fields(probe = %probe.pod_name, url = %ingress.check_url()))]
    pub async fn validate(
        &self,
        probe: &ProbeTarget,
        ingress: &IngressEndpoint,
        target: &EventTarget,
    ) -> E2eResult<()> {
        let closed_probes = self.check_network_flow(probe).await?;
        info!(
            closed_probes,
            "Flow is open on port {} from pod {}/{} to {}",
            WORKLOAD_PORT,
            probe.namespace,
            probe.pod_name,
            probe.workload_ip
        );

        self.check_ingress_flow(ingress).await?;
        info!("Ingress flow is open");

        self.emit_success_event(target).await
    }

    /// Read the probe output until it reports the flow open
    ///
    /// Returns how many closed probes were printed before that.
    pub async fn check_network_flow(&self, probe: &ProbeTarget) -> E2eResult<usize> {
        let scan = async {
            let raw = self
                .gateway
                .pod_logs(&probe.namespace, &probe.pod_name)
                .await?;
            watch_flow(decode_chunks(raw)).await
        };

        let observation = tokio::time::timeout(self.settings.flow_timeout, scan)
            .await
            .map_err(|_| {
                E2eError::timeout(
                    format!("pod {} to report the flow open", probe.pod_name),
                    self.settings.flow_timeout,
                )
            })??;

        match observation {
            FlowObservation::Open { closed_probes } => Ok(closed_probes),
            FlowObservation::StreamEnded { closed_probes } => {
                warn!(closed_probes, "Probe log stream ended before the flow opened");
                Err(E2eError::SentinelNotFound {
                    pod: probe.pod_name.clone(),
                    closed_probes,
                })
            }
        }
    }

    /// GET `<ingress>/demo-k8s` and expect 200
    pub async fn check_ingress_flow(&self, ingress: &IngressEndpoint) -> E2eResult<()> {
        let url = ingress.check_url().clone();
        let response = self.http.get(url.clone()).send().await.map_err(|e| {
            warn!(error = %e, "Failed to send HTTP request to ingress");
            E2eError::Http(e)
        })?;

        let status = response.status();
        if status != StatusCode::OK {
            warn!(%status, "Unexpected ingress status");
            return Err(E2eError::IngressStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(())
    }

    /// Record the success event against the target Job
    pub async fn emit_success_event(&self, target: &EventTarget) -> E2eResult<()> {
        let job = self
            .gateway
            .get_job(&target.namespace, &target.job_name)
            .await?;
        let regarding = job.object_ref(&());

        info!(job = %target.job_name, "Recording e2e success event..");
        self.gateway
            .emit_event(&regarding, &SuccessEvent::default())
            .await?;

        // Give the event a moment to land before the process may exit
        tokio::time::sleep(self.settings.event_settle).await;
        Ok(())
    }
}
