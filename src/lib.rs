//! e2e-k8s library
//!
//! Provisions a demo workload, checks pod-to-pod and ingress connectivity,
//! records a success event and tears everything down again.

pub mod cli;
pub mod config;
pub mod e2e;
pub mod error;
pub mod k8s;
