//! One full run: provision, validate, tear down, report

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use tracing::{error, info, warn};

use super::manifest::{Manifest, ObjectRef};
use super::provision::{ProvisionPlan, Provisioner};
use super::readiness::PollSettings;
use super::teardown::teardown;
use super::validate::{EventTarget, FlowValidator, IngressEndpoint, ValidationSettings};
use crate::config::Config;
use crate::error::{E2eError, E2eResult, ErrorKind};
use crate::k8s::ClusterGateway;

/// Per-invocation inputs from the command line
#[derive(Debug, Clone)]
pub struct RunParams {
    pub ingress: IngressEndpoint,
    pub registry: String,
    /// Namespace of the Job the success event is recorded against
    pub e2e_namespace: String,
    pub e2e_job_name: String,
}

/// How a step of the run ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepOutcome {
    Succeeded,
    Failed { kind: ErrorKind, message: String },
    /// Never started because an earlier step failed
    Skipped,
    /// Cut short by a shutdown signal
    Interrupted,
}

impl StepOutcome {
    fn failed(err: &E2eError) -> Self {
        StepOutcome::Failed {
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, StepOutcome::Succeeded)
    }
}

/// Summary of a run, logged as the last line of output
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub provisioning: StepOutcome,
    pub validation: StepOutcome,
    pub teardown: StepOutcome,
    /// Everything the run created, in creation order
    pub objects: Vec<ObjectRef>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.provisioning.is_success() && self.validation.is_success() && self.teardown.is_success()
    }
}

#[derive(Debug)]
struct RunState {
    manifest: Manifest,
    provisioning: StepOutcome,
    validation: StepOutcome,
}

impl Default for RunState {
    fn default() -> Self {
        Self {
            manifest: Manifest::new(),
            // Until provisioning reports back, a shutdown interrupts it
            provisioning: StepOutcome::Interrupted,
            validation: StepOutcome::Skipped,
        }
    }
}

pub struct Harness<'a> {
    gateway: &'a dyn ClusterGateway,
    config: Config,
    params: RunParams,
    http: reqwest::Client,
}

impl<'a> Harness<'a> {
    pub fn new(gateway: &'a dyn ClusterGateway, config: &Config, params: RunParams) -> E2eResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.ingress_timeout())
            .build()?;

        Ok(Self {
            gateway,
            config: config.clone(),
            params,
            http,
        })
    }

    /// Run the pipeline once
    ///
    /// Provisioning and validation are raced against `shutdown`; teardown
    /// runs in every case, over whatever was created.
    pub async fn run<F>(&self, shutdown: F) -> RunReport
    where
        F: Future<Output = ()>,
    {
        let started_at = Utc::now();
        let mut state = RunState::default();

        tokio::select! {
            biased;
            _ = shutdown => {
                warn!("Shutdown requested, abandoning the run");
            }
            _ = self.pipeline(&mut state) => {}
        }

        info!(objects = state.manifest.len(), "Tearing down..");
        let teardown_outcome = match teardown(self.gateway, &state.manifest).await {
            Ok(deleted) => {
                info!(deleted = deleted.len(), "Teardown complete");
                StepOutcome::Succeeded
            }
            Err(e) => {
                error!(error = %e, "Teardown failed");
                StepOutcome::failed(&e)
            }
        };

        RunReport {
            started_at,
            finished_at: Utc::now(),
            provisioning: state.provisioning,
            validation: state.validation,
            teardown: teardown_outcome,
            objects: state.manifest.objects().to_vec(),
        }
    }

    /// Outcomes are written as each step starts and ends, so an interrupted
    /// step is left marked as such.
    async fn pipeline(&self, state: &mut RunState) {
        let plan = ProvisionPlan {
            demo_namespace: self.config.demo_namespace.clone(),
            net_namespace: self.config.net_namespace.clone(),
            registry: self.params.registry.clone(),
            ingress_host: self.params.ingress.rule_host().map(str::to_string),
        };

        let provisioner = Provisioner::new(self.gateway, PollSettings::from(&self.config), &plan);
        let probe = match provisioner.provision(&mut state.manifest).await {
            Ok(probe) => {
                state.provisioning = StepOutcome::Succeeded;
                probe
            }
            Err(e) => {
                error!(error = %e, "Provisioning failed");
                state.provisioning = StepOutcome::failed(&e);
                return;
            }
        };

        state.validation = StepOutcome::Interrupted;
        let validator = FlowValidator::new(
            self.gateway,
            self.http.clone(),
            ValidationSettings::from(&self.config),
        );
        let target = EventTarget {
            namespace: self.params.e2e_namespace.clone(),
            job_name: self.params.e2e_job_name.clone(),
        };
        state.validation = match validator.validate(&probe, &self.params.ingress, &target).await {
            Ok(()) => StepOutcome::Succeeded,
            Err(e) => {
                error!(error = %e, "Validation failed");
                StepOutcome::failed(&e)
            }
        };
    }
}
