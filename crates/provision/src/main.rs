//! `headswap-provision` -- fetch and verify model artifacts, then exit.
//!
//! Exits with status 0 when every artifact is ready and 1 otherwise, so a
//! container entrypoint can gate the worker on it.
//!
//! Configuration is read from the environment; see
//! [`headswap_provision::ProvisionConfig::from_env`].

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use headswap_provision::{provision, ProvisionConfig, ProvisionFailure};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = match ProvisionConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid provisioning configuration");
            std::process::exit(1);
        }
    };

    match provision(&config).await {
        Ok(report) => {
            tracing::info!(
                ready = report.already_ready.len(),
                downloaded = report.downloaded.len(),
                bytes_transferred = report.bytes_transferred,
                "All artifacts ready",
            );
        }
        Err(ProvisionFailure::Artifacts(failures)) => {
            for failure in &failures {
                tracing::error!(
                    artifact = %failure.target.display(),
                    url = %failure.source_url,
                    error = %failure.error,
                    "Artifact could not be provisioned",
                );
            }
            tracing::error!(failed = failures.len(), "Provisioning failed");
            std::process::exit(1);
        }
        Err(e) => {
            tracing::error!(error = %e, "Provisioning failed");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "headswap_provision=info,headswap_core=info".into());
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
