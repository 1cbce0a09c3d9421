use anyhow::{bail, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use e2e_k8s::{cli::Cli, config::Config, e2e::Harness, k8s::K8sClient};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    // Usage errors exit 1 like every other failure; --help and --version exit 0
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            std::process::exit(if e.use_stderr() { 1 } else { 0 });
        }
    };

    tracing::info!("Starting e2e connectivity check");

    let params = cli.run_params()?;
    let config = Config::load()?;
    tracing::info!(
        demo_namespace = %config.demo_namespace,
        net_namespace = %config.net_namespace,
        "Configuration loaded"
    );

    let k8s = K8sClient::new().await?;
    let version = k8s.health_check().await?;
    tracing::info!("Connected to Kubernetes cluster {}", version);

    let harness = Harness::new(&k8s, &config, params)?;
    let report = harness.run(shutdown_signal()).await;

    tracing::info!(report = %serde_json::to_string(&report)?, "Run finished");

    if !report.is_success() {
        bail!("e2e run failed");
    }

    tracing::info!("e2e run succeeded");
    Ok(())
}

/// `LOG_FORMAT=json` switches to structured output
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Resolves on SIGINT, or SIGTERM on unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}
