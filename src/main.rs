use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use quorum::compactor;
use quorum::engine::Engine;
use quorum::http::{router, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let metrics_port: Option<u16> = std::env::var("QUORUM_METRICS_PORT")
        .ok()
        .and_then(|s| s.parse().ok());
    quorum::observability::init(metrics_port);

    let port = std::env::var("QUORUM_PORT").unwrap_or_else(|_| "4000".into());
    let bind = std::env::var("QUORUM_BIND").unwrap_or_else(|_| "0.0.0.0".into());
    let data_dir = std::env::var("QUORUM_DATA_DIR").unwrap_or_else(|_| "./data".into());
    let base_url =
        std::env::var("QUORUM_BASE_URL").unwrap_or_else(|_| format!("http://localhost:{port}"));
    let compact_threshold: u64 = std::env::var("QUORUM_COMPACT_THRESHOLD")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1000);

    // Refuse to start without a salt: owner-key hashes written under one salt
    // are unverifiable under another, so an accidental default would brick
    // every existing plan.
    let salt = std::env::var("QUORUM_OWNER_KEY_SALT")
        .map_err(|_| "QUORUM_OWNER_KEY_SALT must be set")?;

    // Ensure data directory exists
    std::fs::create_dir_all(&data_dir)?;

    let engine = Arc::new(Engine::new(
        std::path::Path::new(&data_dir).join("quorum.wal"),
        salt,
    )?);
    tokio::spawn(compactor::run_compactor(engine.clone(), compact_threshold));

    let app = router(AppState {
        engine,
        base_url: base_url.clone(),
    });

    let addr = format!("{bind}:{port}");
    let listener = TcpListener::bind(&addr).await?;
    info!("quorum listening on {addr}");
    info!("  data_dir: {data_dir}");
    info!("  base_url: {base_url}");
    info!("  metrics: {}", metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    // Graceful shutdown: stop accepting on SIGTERM/ctrl-c, drain in-flight requests
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to register SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
        }
        info!("shutdown signal received");
    };

    axum::serve(listener, app).with_graceful_shutdown(shutdown).await?;

    info!("quorum stopped");
    Ok(())
}
