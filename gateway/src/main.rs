use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use gateway::auth::policy::{HttpPolicyClient, PolicyStore};
use gateway::container::{ContainerRuntime, DockerDriver, MockRuntime};
use gateway::events::EventHub;
use gateway::session::SessionManager;
use gateway::{build_router, middleware, AppState, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gateway=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    info!(port = config.port, "gateway starting");

    if config.dev_bypass_active() {
        warn!("anonymous dev bypass is ACTIVE — local development only");
    }

    let policy: Arc<dyn PolicyStore> = Arc::new(HttpPolicyClient::new(
        config.policy_api_url.clone(),
        config.policy_service_key.clone(),
    )?);

    let runtime: Arc<dyn ContainerRuntime> = if config.mock_runtime {
        warn!("mock container runtime selected — no workers will be launched");
        Arc::new(MockRuntime::new())
    } else {
        Arc::new(DockerDriver::new())
    };

    let hub = Arc::new(EventHub::new());
    let sessions = SessionManager::new(config.clone(), runtime, Arc::clone(&hub))?;

    // Idle reaper
    {
        let sessions = Arc::clone(&sessions);
        tokio::spawn(sessions.run_reaper());
    }

    let state = Arc::new(AppState {
        rate: middleware::build_rate_limiter(config.rate_limit_per_minute),
        sessions: Arc::clone(&sessions),
        policy,
        hub,
        started_at: Instant::now(),
        config,
    });

    let app = build_router(Arc::clone(&state));

    let addr = format!("{}:{}", state.config.host, state.config.port);
    info!("listening on {addr}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    // Sessions are ephemeral by contract: reclaim every container and port
    // before the process exits.
    info!("shutting down, stopping live sessions");
    sessions.stop_all().await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("ctrl-c handler installation failed");
    };
    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation failed")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
