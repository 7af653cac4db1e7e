//! HTTP server wiring: router, liveness sweeper and graceful shutdown.

use anyhow::Result;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::api::create_router;
use crate::orchestrator::{Orchestrator, spawn_sweeper};

/// Bind `bind` and serve until `shutdown` fires.
pub async fn serve(
    orchestrator: Arc<Orchestrator>,
    bind: &str,
    shutdown: CancellationToken,
) -> Result<()> {
    let listener = TcpListener::bind(bind).await?;
    serve_listener(orchestrator, listener, shutdown).await
}

/// Serve on an already bound listener.
pub async fn serve_listener(
    orchestrator: Arc<Orchestrator>,
    listener: TcpListener,
    shutdown: CancellationToken,
) -> Result<()> {
    let sweeper_token = shutdown.child_token();
    let sweeper = spawn_sweeper(orchestrator.clone(), sweeper_token.clone());
    let app = create_router(orchestrator);

    info!("Orchestrator listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    sweeper_token.cancel();
    if let Err(e) = sweeper.await {
        warn!("Liveness sweeper ended abnormally: {}", e);
    }

    info!("Orchestrator stopped");
    Ok(())
}
