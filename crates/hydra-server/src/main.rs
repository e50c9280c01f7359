//! Hydra control plane entry point.
//!
//! Bootstraps the persistence store, resource catalog, orchestrator
//! backend, and every business-logic component, then starts the Axum HTTP
//! server with graceful shutdown. A quota-expiry sweep and the security
//! monitor's scan/event loops run alongside the server and are cancelled on
//! shutdown.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::http::HeaderValue;
use axum::middleware as axum_mw;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

use hydra_core::proxy_config::HostProxyWriter;
use hydra_core::ssh_mux::SshMuxWriter;
use hydra_core::{
    ActivityLog, ContainerService, EventBus, MigrationEngine, QuotaEngine, ResourceCatalog,
    SecurityMonitor, UserLockMap,
};
use hydra_orchestrator::{ClusterBackend, ClusterNode, HostBackend, OrchestratorBackend};
use hydra_store::{
    ActivityLogRepository, ApprovalRepository, ContainerRepository, MigrationRepository,
    QuotaRepository, SecurityEventRepository, ShareRepository,
};

use hydra_server::config::{OrchestratorKind, ServerConfig};
use hydra_server::middleware::auth_middleware;
use hydra_server::routes;
use hydra_server::state::AppState;

use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .json()
        .init();

    info!(orchestrator = ?config.orchestrator, "hydra control plane starting");

    let state = build_app_state(&config).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let quota_worker = {
        let quotas = Arc::clone(&state.quotas);
        let mut rx = shutdown_rx.clone();
        let interval_secs = config.quota_sweep_interval_secs;
        tokio::spawn(async move { quota_sweep_worker(&quotas, &mut rx, interval_secs).await })
    };

    let scan_worker = (config.stats_interval_ms > 0).then(|| {
        let security = Arc::clone(&state.security);
        let mut rx = shutdown_rx.clone();
        let interval_ms = config.stats_interval_ms;
        tokio::spawn(async move { security_scan_worker(&security, &mut rx, interval_ms).await })
    });

    let event_worker = {
        let security = Arc::clone(&state.security);
        tokio::spawn(async move { security.run_event_loop().await })
    };

    let app = build_router(Arc::new(state));

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.bind_addr))?;

    info!(addr = %config.bind_addr, "hydra control plane listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await
        .context("server error")?;

    info!("waiting for background workers to stop");
    event_worker.abort();
    let _ = tokio::time::timeout(Duration::from_secs(10), quota_worker).await;
    if let Some(worker) = scan_worker {
        let _ = tokio::time::timeout(Duration::from_secs(10), worker).await;
    }

    info!("hydra control plane stopped");
    Ok(())
}

async fn build_app_state(config: &ServerConfig) -> anyhow::Result<AppState> {
    let pool = hydra_store::connect(&config.database_url).await.context("failed to connect to the database")?;

    let mut catalog = ResourceCatalog::default_for_cluster();
    if let Some(v) = config.auto_approve_max_memory_gb {
        catalog.thresholds.auto_approve_max_memory_gb = v;
    }
    if let Some(v) = config.auto_approve_max_cpus {
        catalog.thresholds.auto_approve_max_cpus = v;
    }
    if let Some(v) = config.auto_approve_max_storage_gb {
        catalog.thresholds.auto_approve_max_storage_gb = v;
    }
    let catalog = Arc::new(catalog);

    let backend: Arc<dyn OrchestratorBackend> = match config.orchestrator {
        OrchestratorKind::Host => Arc::new(
            HostBackend::new(config.proxy_dynamic_root.clone())
                .await
                .context("failed to start the host orchestrator backend")?,
        ),
        OrchestratorKind::Cluster => {
            let nodes = catalog
                .nodes()
                .map(|n| ClusterNode { name: n.name.clone(), role: n.role.clone(), gpu_enabled: n.gpu_enabled })
                .collect();
            Arc::new(ClusterBackend::new("hydra-students", nodes))
        }
    };

    let quotas_repo = QuotaRepository::new(pool.clone());
    let containers_repo = ContainerRepository::new(pool.clone());
    let approvals_repo = ApprovalRepository::new(pool.clone());
    let migrations_repo = MigrationRepository::new(pool.clone());
    let activity_repo = ActivityLogRepository::new(pool.clone());
    let security_events_repo = SecurityEventRepository::new(pool.clone());
    let shares_repo = ShareRepository::new(pool.clone());

    let locks = Arc::new(UserLockMap::new());
    let events = EventBus::new();
    let ssh_mux = Arc::new(SshMuxWriter::new(config.ssh_mux_config_root.clone()));
    let proxy = Arc::new(HostProxyWriter::new(config.proxy_dynamic_root.clone()));

    let containers = Arc::new(ContainerService::new(
        Arc::clone(&catalog),
        containers_repo.clone(),
        quotas_repo.clone(),
        activity_repo.clone(),
        Arc::clone(&backend),
        Arc::clone(&locks),
        Arc::clone(&ssh_mux),
        Arc::clone(&proxy),
        config.public_base_url.clone(),
        events.clone(),
    ));

    let quota_activity = ActivityLog::new(activity_repo.clone()).with_bus(events.clone());
    let quotas = Arc::new(QuotaEngine::new(
        Arc::clone(&catalog),
        quotas_repo.clone(),
        containers_repo.clone(),
        approvals_repo.clone(),
        quota_activity,
        Arc::clone(&backend),
        Arc::clone(&locks),
    ));

    let migrations = Arc::new(MigrationEngine::new(
        Arc::clone(&catalog),
        containers_repo.clone(),
        quotas_repo.clone(),
        migrations_repo,
        Arc::clone(&backend),
        Arc::clone(&locks),
        events.clone(),
        Arc::clone(&ssh_mux),
    ));

    let security = Arc::new(SecurityMonitor::new(
        Arc::clone(&catalog),
        containers_repo,
        security_events_repo,
        Arc::clone(&backend),
        events.clone(),
        config.mining_enforcement_enabled,
    ));

    let activity = Arc::new(ActivityLog::new(activity_repo).with_bus(events.clone()));

    Ok(AppState {
        containers,
        quotas,
        migrations,
        security,
        shares: shares_repo,
        catalog,
        backend,
        approvals: approvals_repo,
        quota_records: quotas_repo,
        activity,
        events,
    })
}

fn build_router(state: Arc<AppState>) -> Router {
    let authenticated_routes = Router::new()
        .nest("/containers", routes::containers::router())
        .nest("/approvals", routes::approvals::router())
        .nest("/migrations", routes::migrations::router())
        .nest("/shares", routes::shares::router())
        .nest("/logs", routes::logs::router())
        .nest("/auth", routes::auth::router())
        .route_layer(axum_mw::from_fn_with_state(Arc::clone(&state), auth_middleware));

    let servers_routes = Router::new().nest("/servers", routes::servers::router());

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::DELETE,
        ])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::HeaderName::from_static("x-hydra-principal"),
            axum::http::HeaderName::from_static("x-forwarded-uri"),
            axum::http::HeaderName::from_static("x-hydra-share-token"),
        ]);

    Router::new()
        .merge(authenticated_routes)
        .merge(servers_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(SetResponseHeaderLayer::overriding(
            axum::http::header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            axum::http::header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .with_state(state)
}

/// Periodically sweep expired resource grants back to the default preset.
async fn quota_sweep_worker(quotas: &Arc<QuotaEngine>, shutdown: &mut watch::Receiver<bool>, interval_secs: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
    info!(interval_secs, "quota sweep worker started");

    loop {
        tokio::select! {
            _ = interval.tick() => {
                match quotas.sweep_expired_grants().await {
                    Ok(count) if count > 0 => info!(count, "quota sweep reset expired grants"),
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "quota sweep failed"),
                }
            }
            _ = shutdown.changed() => {
                info!("quota sweep worker shutting down");
                return;
            }
        }
    }
}

/// Periodically drive the security monitor's rolling-window scan.
async fn security_scan_worker(security: &Arc<SecurityMonitor>, shutdown: &mut watch::Receiver<bool>, interval_ms: u64) {
    let mut interval = tokio::time::interval(Duration::from_millis(interval_ms));
    info!(interval_ms, "security scan worker started");

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = security.scan_once().await {
                    warn!(error = %e, "security scan failed");
                }
            }
            _ = shutdown.changed() => {
                info!("security scan worker shutting down");
                return;
            }
        }
    }
}

/// Wait for SIGINT or SIGTERM, then broadcast shutdown.
async fn shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        if let Ok(mut sig) = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            sig.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("shutdown signal received, stopping server");
    let _ = shutdown_tx.send(true);
}
