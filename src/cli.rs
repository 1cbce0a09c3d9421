//! Command line flags

use clap::Parser;

use crate::e2e::{IngressEndpoint, RunParams};
use crate::error::E2eResult;

/// End-to-end connectivity check for a Kubernetes cluster
#[derive(Debug, Clone, Parser)]
#[command(name = "e2e", version, about)]
pub struct Cli {
    /// Ingress URL the demo workload is exposed on, e.g. https://demo.example.com
    #[arg(short = 'u', long)]
    pub ingress_url: String,

    /// Registry prefix for the workload and probe images
    #[arg(short = 'r', long)]
    pub registry: String,

    /// Namespace of the Job running this check
    #[arg(short = 'n', long)]
    pub e2e_namespace: String,

    /// Name of the Job running this check; the success event is recorded against it
    #[arg(short = 'j', long)]
    pub e2e_job_name: String,
}

impl Cli {
    pub fn run_params(&self) -> E2eResult<RunParams> {
        Ok(RunParams {
            ingress: IngressEndpoint::parse(&self.ingress_url)?,
            registry: self.registry.clone(),
            e2e_namespace: self.e2e_namespace.clone(),
            e2e_job_name: self.e2e_job_name.clone(),
        })
    }
}
