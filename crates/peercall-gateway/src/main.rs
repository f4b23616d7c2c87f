use std::io::ErrorKind;
use std::net::SocketAddr;

use peercall_gateway::{auth, db, router, spawn_session_sweeper, AppState, GatewayConfig};
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "peercall_gateway=info,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = GatewayConfig::from_env()?;
    config.check_public_bind_allowed(config.bind_addr)?;

    let pool = db::connect_in_memory().await?;
    tracing::info!("identity store ready (in-memory)");

    if config.seed_demo_users {
        let created = auth::seed_demo_users(&pool).await?;
        tracing::info!("seeded {} demo accounts", created);
    }

    spawn_session_sweeper(pool.clone(), config.session_sweep_interval);

    let addr = config.bind_addr;
    let app = router(AppState::new(pool, config));

    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) if err.kind() == ErrorKind::AddrInUse => {
            let fallback_addr = SocketAddr::new(addr.ip(), 0);
            tracing::warn!(
                "gateway bind {} is already in use, falling back to {}",
                addr,
                fallback_addr
            );
            TcpListener::bind(fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };
    tracing::info!("gateway listening on {}", listener.local_addr()?);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
}
