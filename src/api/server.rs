use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::State,
    http::{header::CONTENT_TYPE, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

use crate::lifecycle::NamespaceLifecycleManager;
use crate::metrics::SharedMetricsRegistry;

use super::handlers;

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<NamespaceLifecycleManager>,
}

impl AppState {
    pub fn new(manager: NamespaceLifecycleManager) -> Self {
        Self {
            manager: Arc::new(manager),
        }
    }
}

/// Workspace API plus the unauthenticated health check.
pub fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(handlers::health))
        .nest("/v1", super::routes::v1_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub fn metrics_router(metrics: SharedMetricsRegistry) -> Router {
    Router::new()
        .route("/metrics", get(scrape))
        .with_state(metrics)
}

async fn scrape(State(metrics): State<SharedMetricsRegistry>) -> Response {
    match metrics.encode_text() {
        Ok(body) => (
            StatusCode::OK,
            [(CONTENT_TYPE, prometheus::TEXT_FORMAT)],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Bind `addr` and serve `app` until shutdown is signalled.
pub async fn start_server(
    name: &str,
    addr: SocketAddr,
    app: Router,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("{} listening on {}", name, listener.local_addr()?);
    serve(listener, app, shutdown).await
}

/// Serve on an already bound listener. In-flight requests are drained once
/// the shutdown flag flips to `true` or its sender is dropped.
pub async fn serve(
    listener: TcpListener,
    app: Router,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await?;
    Ok(())
}
