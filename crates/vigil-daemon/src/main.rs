//! vigil-daemon - monitoring backend daemon
//!
//! Wires the backend subsystems together: the in-memory store and
//! message bus, the subscription-ring pool, the TCP agent listener, and
//! the HTTP surface (`/healthz`, `/metrics`, and the authorization
//! chain in front of the API mount point). External store engines,
//! API routers, and the scheduler attach through the library's trait
//! seams.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use vigil_core::Namespace;
use vigil_daemon::agentd::AgentListener;
use vigil_daemon::apid::apply_authorization;
use vigil_daemon::authorization::{Authorizer, RbacAuthorizer};
use vigil_daemon::config::BackendConfig;
use vigil_daemon::messaging::InMemoryBus;
use vigil_daemon::metrics::MetricsRegistry;
use vigil_daemon::ring::Pool;
use vigil_daemon::store::kv::MemoryKv;
use vigil_daemon::store::{MemoryStore, NamespaceStore};

/// vigil backend daemon.
#[derive(Parser, Debug)]
#[command(name = "vigil-daemon")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the backend configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => BackendConfig::load(path)?,
        None => BackendConfig::default(),
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_filter.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    info!(?config, "starting vigil backend");

    let registry = Arc::new(MetricsRegistry::new()?);
    let metrics = registry.backend_metrics();

    let store = Arc::new(MemoryStore::new());
    store
        .create_namespace(&Namespace::new("default"))
        .await
        .context("bootstrapping the default namespace")?;

    let bus = Arc::new(InMemoryBus::new());
    let kv = Arc::new(MemoryKv::new());
    let pool = Arc::new(Pool::new(kv, config.ring_lease_ttl()));
    let authorizer: Arc<dyn Authorizer> = Arc::new(RbacAuthorizer::new(store.clone()));

    let cancel = CancellationToken::new();

    let agent_socket = TcpListener::bind(config.agent_listen)
        .await
        .with_context(|| format!("binding agent listener on {}", config.agent_listen))?;
    let listener = Arc::new(AgentListener::new(
        bus.clone(),
        store.clone(),
        Arc::clone(&pool),
        metrics,
    ));
    tokio::spawn(listener.serve(agent_socket, cancel.clone()));

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_text))
        .with_state(Arc::clone(&registry));
    let app = apply_authorization(app, authorizer);

    let api_socket = TcpListener::bind(config.api_listen)
        .await
        .with_context(|| format!("binding API listener on {}", config.api_listen))?;
    info!(addr = %config.api_listen, "API listener started");

    axum::serve(api_socket, app)
        .with_graceful_shutdown(shutdown_signal(cancel))
        .await
        .context("serving the API")?;

    info!("vigil backend stopped");
    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

async fn metrics_text(
    State(registry): State<Arc<MetricsRegistry>>,
) -> Result<String, StatusCode> {
    registry.encode_text().map_err(|e| {
        error!(error = %e, "failed to encode metrics");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

async fn shutdown_signal(cancel: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_err() {
        error!("failed to install the shutdown signal handler");
    }
    info!("shutdown signal received");
    cancel.cancel();
}
