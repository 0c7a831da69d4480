//! `headswap-worker` -- provision artifacts, then serve head-swap jobs.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use headswap_comfyui::api::ComfyUIApi;
use headswap_core::workflow::WorkflowTemplate;
use headswap_provision::{provision, ProvisionConfig};
use headswap_worker::config::{DispatcherConfig, ServerConfig};
use headswap_worker::dispatcher::Dispatcher;
use headswap_worker::router::build_app_router;
use headswap_worker::state::AppState;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_tracing();

    if let Err(message) = run().await {
        tracing::error!(error = %message, "Worker failed to start");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), String> {
    // --- Configuration ---
    let server_config = ServerConfig::from_env().map_err(|e| e.to_string())?;
    let dispatcher_config = DispatcherConfig::from_env().map_err(|e| e.to_string())?;
    tracing::info!(
        host = %server_config.host,
        port = server_config.port,
        comfyui_url = %dispatcher_config.comfyui_url,
        "Loaded configuration",
    );

    // --- Artifacts ---
    if server_config.skip_provisioning {
        tracing::warn!("SKIP_PROVISIONING set, not verifying artifacts");
    } else {
        let provision_config = ProvisionConfig::from_env().map_err(|e| e.to_string())?;
        let report = provision(&provision_config).await.map_err(|e| e.to_string())?;
        tracing::info!(
            ready = report.already_ready.len(),
            downloaded = report.downloaded.len(),
            "Artifacts ready",
        );
    }

    // --- Workflow template ---
    let template = WorkflowTemplate::load(&dispatcher_config.workflow_path)
        .await
        .map_err(|e| e.to_string())?;
    tracing::info!(
        path = %dispatcher_config.workflow_path.display(),
        nodes = template.node_count(),
        "Workflow template loaded",
    );
    let unresolved = template.unresolved_titles(&dispatcher_config.titles.all());
    if !unresolved.is_empty() {
        // Jobs will fail with a message naming the title; keep serving health.
        tracing::warn!(?unresolved, "Workflow template is missing required node titles");
    }

    // --- App state ---
    let api = ComfyUIApi::new(dispatcher_config.comfyui_url.clone());
    let dispatcher = Dispatcher::new(api, Arc::new(template), dispatcher_config);
    let state = AppState {
        dispatcher,
        config: Arc::new(server_config.clone()),
    };
    let app = build_app_router(state);

    // --- Start server ---
    let host = server_config
        .host
        .parse::<IpAddr>()
        .map_err(|e| format!("Invalid HOST '{}': {e}", server_config.host))?;
    let addr = SocketAddr::new(host, server_config.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| format!("Failed to bind {addr}: {e}"))?;
    tracing::info!(%addr, "Starting server");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| format!("Server error: {e}"))?;

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "headswap_worker=info,headswap_provision=info,headswap_core=info,tower_http=info".into()
    });
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Wait for SIGINT or SIGTERM. In-flight jobs finish before the process exits.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
