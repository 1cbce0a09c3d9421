//! Kubernetes integration module
//!
//! This module handles all interactions with the cluster under test:
//! - The [`ClusterGateway`] seam used by the e2e pipeline
//! - The kube-backed implementation of that seam
//! - Builders for every object the run creates

mod client;
mod gateway;
pub mod resources;

pub use client::K8sClient;
#[cfg(test)]
pub use gateway::MockClusterGateway;
pub use gateway::{ClusterGateway, LogStream, SuccessEvent, EVENT_MESSAGE, EVENT_REASON};
