//! Local status API.
//!
//! Read-only HTTP view of a running dashboard: the store snapshot, the push
//! connection state and the Prometheus metrics.

use crate::metrics::{metrics_handler, LiveMetrics};
use crate::store::{DashboardStore, StoreSnapshot};
use axum::{
    extract::Extension,
    response::Json,
    routing::{get, Router},
};
use serde::Serialize;
use soil_common::config::StatusConfig;
use soil_common::state::ConnectionState;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    /// Always "ok".
    pub status: &'static str,
    /// Crate version.
    pub version: &'static str,
}

/// Push connection report.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionReport {
    /// Connection state.
    pub state: ConnectionState,
    /// "Live" or "Offline".
    pub indicator: &'static str,
}

/// GET /health
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// GET /api/state
pub async fn get_state(Extension(store): Extension<Arc<DashboardStore>>) -> Json<StoreSnapshot> {
    Json(store.snapshot())
}

/// GET /api/connection
pub async fn get_connection(
    Extension(state): Extension<watch::Receiver<ConnectionState>>,
) -> Json<ConnectionReport> {
    let state = *state.borrow();
    Json(ConnectionReport {
        state,
        indicator: state.indicator(),
    })
}

/// Status API server.
pub struct StatusServer {
    config: StatusConfig,
    store: Arc<DashboardStore>,
    connection: watch::Receiver<ConnectionState>,
    metrics: Arc<LiveMetrics>,
}

impl StatusServer {
    /// Create a server over a running dashboard.
    pub fn new(
        config: StatusConfig,
        store: Arc<DashboardStore>,
        connection: watch::Receiver<ConnectionState>,
        metrics: Arc<LiveMetrics>,
    ) -> Self {
        Self {
            config,
            store,
            connection,
            metrics,
        }
    }

    /// Build the router.
    pub fn router(&self) -> Router {
        let mut app = Router::new()
            .route("/health", get(health_check))
            .route("/api/state", get(get_state))
            .route("/api/connection", get(get_connection))
            .route("/metrics", get(metrics_handler))
            .layer(Extension(Arc::clone(&self.store)))
            .layer(Extension(self.connection.clone()))
            .layer(Extension(Arc::clone(&self.metrics)));

        if self.config.enable_cors {
            let cors = CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any);
            app = app.layer(cors);
        }
        app
    }

    /// Serve until `shutdown` resolves.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound or serving fails.
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_addr;
        let app = self.router();

        let listener = tokio::net::TcpListener::bind(bind_addr).await?;
        info!(addr = %bind_addr, "Status API listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_handlers() {
        let store = Arc::new(DashboardStore::default());
        store.set_ws_connected(true);
        let Json(snapshot) = get_state(Extension(Arc::clone(&store))).await;
        assert!(snapshot.ws_connected);

        let (_tx, rx) = watch::channel(ConnectionState::Open);
        let Json(report) = get_connection(Extension(rx)).await;
        assert_eq!(report.indicator, "Live");

        let Json(health) = health_check().await;
        assert_eq!(health.status, "ok");
    }

    #[tokio::test]
    async fn test_serves_health_over_http() {
        let store = Arc::new(DashboardStore::default());
        let (_tx, rx) = watch::channel(ConnectionState::Idle);
        let server = StatusServer::new(
            StatusConfig::default(),
            store,
            rx,
            Arc::new(LiveMetrics::new().unwrap()),
        );
        let app = server.router();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let body = reqwest::get(format!("http://{addr}/api/connection"))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(body.contains("\"indicator\":\"Offline\""));
        assert!(body.contains("\"state\":\"IDLE\""));
    }
}
