//! Application root.
//!
//! Wires configuration, the shutdown coordinator and the HTTP server:
//!
//! ```text
//! signals ─→ ShutdownCoordinator ─→ stop hook ─→ HttpServer::stop(deadline)
//!                                                        │
//! start task ─→ HttpServer::start ───────────────────────┘ returns
//!      └─ on failure: trigger()
//! ```

use axum::{middleware, routing::get, Json, Router};
use serde_json::json;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;
use crate::http::access_log::access_log;
use crate::http::{HttpServer, ServerError};
use crate::lifecycle::{LifecycleError, ShutdownCoordinator, ShutdownHandle};

/// Errors that end the process with a failure status.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("signal setup failed: {0}")]
    Lifecycle(#[from] LifecycleError),

    #[error("server failed: {0}")]
    Server(#[from] ServerError),

    #[error("server task ended abnormally: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Build the application router.
pub fn router() -> Router {
    Router::new()
        .route("/health", get(health))
        .layer(middleware::from_fn(access_log))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(TraceLayer::new_for_http())
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// Run until a configured signal arrives and the server has stopped.
pub async fn run(config: AppConfig) -> Result<(), AppError> {
    let coordinator = ShutdownCoordinator::new();
    let handle = coordinator.observe_signals(&config.lifecycle.signals())?;
    serve(&config, router(), &coordinator, handle).await
}

/// Serve `router` under `coordinator` until `handle` completes.
///
/// The coordinator must already be armed.
pub async fn serve(
    config: &AppConfig,
    router: Router,
    coordinator: &ShutdownCoordinator,
    mut handle: ShutdownHandle,
) -> Result<(), AppError> {
    let server = HttpServer::new(router, config.server.to_options());
    let deadline = config.lifecycle.shutdown_timeout();

    let stopper = server.clone();
    coordinator.register_hook(move || {
        let server = stopper.clone();
        async move {
            if let Err(e) = server.stop(deadline).await {
                tracing::error!(error = %e, "HTTP server did not stop cleanly");
            }
        }
    });

    let trigger = coordinator.clone();
    let serving = tokio::spawn(async move {
        let result = server.start().await;
        if let Err(e) = &result {
            tracing::error!(error = %e, "HTTP server failed");
            trigger.trigger();
        }
        result
    });

    let cause = handle.done().await;
    tracing::info!(cause = ?cause, "Shutdown complete");

    serving.await??;
    Ok(())
}
