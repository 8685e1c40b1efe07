// src/server/mod.rs

use crate::config::Config;
use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::info;

mod initialization;
mod routes;

pub use initialization::{AppState, setup};
pub use routes::router;

/// The main server startup function: builds the shared state, binds the
/// listener and serves until ctrl-c.
pub async fn run(config: Config) -> Result<()> {
    let state = setup(&config)?;
    let app = router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("geocache listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutdown signal received, draining connections.");
        })
        .await?;
    Ok(())
}
