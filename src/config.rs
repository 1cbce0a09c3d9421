use serde::Deserialize;
use std::time::Duration;

use crate::error::E2eResult;

/// Run tunables, read from `E2E_*` environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_demo_namespace")]
    pub demo_namespace: String,

    #[serde(default = "default_net_namespace")]
    pub net_namespace: String,

    #[serde(default = "default_pod_poll_interval_secs")]
    pub pod_poll_interval_secs: u64,

    #[serde(default = "default_pod_absent_poll_interval_secs")]
    pub pod_absent_poll_interval_secs: u64,

    #[serde(default = "default_readiness_timeout_secs")]
    pub readiness_timeout_secs: u64,

    #[serde(default = "default_flow_timeout_secs")]
    pub flow_timeout_secs: u64,

    #[serde(default = "default_ingress_timeout_secs")]
    pub ingress_timeout_secs: u64,

    #[serde(default = "default_event_settle_secs")]
    pub event_settle_secs: u64,
}

fn default_demo_namespace() -> String {
    "eph-demo-app".to_string()
}

fn default_net_namespace() -> String {
    "eph-demo-net".to_string()
}

fn default_pod_poll_interval_secs() -> u64 {
    5
}

fn default_pod_absent_poll_interval_secs() -> u64 {
    20
}

fn default_readiness_timeout_secs() -> u64 {
    300
}

fn default_flow_timeout_secs() -> u64 {
    300
}

fn default_ingress_timeout_secs() -> u64 {
    10
}

fn default_event_settle_secs() -> u64 {
    2
}

impl Config {
    pub fn load() -> E2eResult<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("E2E"))
            .build()?;

        Ok(config.try_deserialize()?)
    }

    pub fn pod_poll_interval(&self) -> Duration {
        Duration::from_secs(self.pod_poll_interval_secs)
    }

    pub fn pod_absent_poll_interval(&self) -> Duration {
        Duration::from_secs(self.pod_absent_poll_interval_secs)
    }

    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_secs(self.readiness_timeout_secs)
    }

    pub fn flow_timeout(&self) -> Duration {
        Duration::from_secs(self.flow_timeout_secs)
    }

    pub fn ingress_timeout(&self) -> Duration {
        Duration::from_secs(self.ingress_timeout_secs)
    }

    pub fn event_settle(&self) -> Duration {
        Duration::from_secs(self.event_settle_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            demo_namespace: default_demo_namespace(),
            net_namespace: default_net_namespace(),
            pod_poll_interval_secs: default_pod_poll_interval_secs(),
            pod_absent_poll_interval_secs: default_pod_absent_poll_interval_secs(),
            readiness_timeout_secs: default_readiness_timeout_secs(),
            flow_timeout_secs: default_flow_timeout_secs(),
            ingress_timeout_secs: default_ingress_timeout_secs(),
            event_settle_secs: default_event_settle_secs(),
        }
    }
}
