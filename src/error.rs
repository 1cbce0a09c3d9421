//! Error types for the e2e harness

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::e2e::ObjectRef;

pub type E2eResult<T> = Result<T, E2eError>;

/// Everything that can go wrong during a run
#[derive(Debug, Error)]
pub enum E2eError {
    #[error("kubernetes API error: {0}")]
    Kubernetes(#[from] kube::Error),

    #[error("timed out after {after:?} waiting for {what}")]
    Timeout { what: String, after: Duration },

    #[error("log stream of pod {pod} ended before the flow was seen open ({closed_probes} closed probes)")]
    SentinelNotFound { pod: String, closed_probes: usize },

    #[error("log stream error: {0}")]
    LogStream(#[from] std::io::Error),

    #[error("namespace {namespace} already exists and is not labelled e2e=true")]
    NamespaceNotOwned { namespace: String },

    #[error("pod {namespace}/{pod} is running but has no IP")]
    PodIpUnavailable { namespace: String, pod: String },

    #[error("expected HTTP status 200 from {url}, got {status}")]
    IngressStatus { url: String, status: u16 },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid ingress URL: {0}")]
    InvalidIngressUrl(String),

    #[error("teardown failed for {} object(s): {}", .0.len(), summarize(.0))]
    Teardown(Vec<TeardownFailure>),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

/// A deletion that did not go through
#[derive(Debug, Clone, Serialize)]
pub struct TeardownFailure {
    pub object: ObjectRef,
    pub message: String,
}

fn summarize(failures: &[TeardownFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{} ({})", f.object, f.message))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Coarse error classification carried by the run report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    RemoteStore,
    Timeout,
    LogStream,
    Ingress,
    Teardown,
    Config,
}

impl E2eError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            E2eError::Kubernetes(_)
            | E2eError::NamespaceNotOwned { .. }
            | E2eError::PodIpUnavailable { .. } => ErrorKind::RemoteStore,
            E2eError::Timeout { .. } => ErrorKind::Timeout,
            E2eError::SentinelNotFound { .. } | E2eError::LogStream(_) => ErrorKind::LogStream,
            E2eError::IngressStatus { .. } | E2eError::Http(_) | E2eError::InvalidIngressUrl(_) => {
                ErrorKind::Ingress
            }
            E2eError::Teardown(_) => ErrorKind::Teardown,
            E2eError::Config(_) => ErrorKind::Config,
        }
    }

    /// HTTP status code of a remote-store failure, if the API server answered
    pub fn status_code(&self) -> Option<u16> {
        match self {
            E2eError::Kubernetes(kube::Error::Api(e)) => Some(e.code),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status_code() == Some(404)
    }

    pub fn is_conflict(&self) -> bool {
        self.status_code() == Some(409)
    }

    pub fn timeout(what: impl Into<String>, after: Duration) -> Self {
        E2eError::Timeout {
            what: what.into(),
            after,
        }
    }
}
