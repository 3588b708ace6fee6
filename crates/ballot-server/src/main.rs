use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use ballot_api::{AppState, AppStateInner};
use ballot_gateway::dispatcher::Dispatcher;

/// Placeholder JWT secrets that should never reach production.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ballot=debug,ballot_api=debug,ballot_gateway=debug,ballot_db=info,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("BALLOT_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    if PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
        warn!("BALLOT_JWT_SECRET is unset or a placeholder; tokens are forgeable");
    }
    let db_path = std::env::var("BALLOT_DB_PATH").unwrap_or_else(|_| "ballot.db".into());
    let host = std::env::var("BALLOT_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("BALLOT_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;
    let public_url =
        std::env::var("BALLOT_PUBLIC_URL").unwrap_or_else(|_| format!("http://localhost:{}", port));

    // Init database
    let db = Arc::new(ballot_db::Database::open(&PathBuf::from(&db_path))?);

    // Shared state
    let state: AppState = Arc::new(AppStateInner {
        db,
        jwt_secret,
        public_url,
        dispatcher: Dispatcher::new(),
    });

    let app = ballot_api::routes::app(state);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Ballot server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
