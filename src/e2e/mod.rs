//! The e2e pipeline
//!
//! Provisioning, readiness polling, flow validation and teardown, driven once
//! per invocation by [`Harness`].

mod harness;
mod logs;
mod manifest;
mod provision;
mod readiness;
mod teardown;
mod validate;

pub use harness::{Harness, RunParams, RunReport, StepOutcome};
pub use logs::{decode_chunks, watch_flow, FlowObservation, SentinelScanner, Utf8ChunkDecoder};
pub use manifest::{Manifest, ObjectKind, ObjectRef};
pub use provision::{ProbeTarget, ProvisionPlan, Provisioner};
pub use readiness::{pod_phase, PodPhase, PollSettings, ReadinessPoller};
pub use teardown::teardown;
pub use validate::{EventTarget, FlowValidator, IngressEndpoint, ValidationSettings};
