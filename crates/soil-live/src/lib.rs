//! Real-time core of the soil monitoring dashboard.
//!
//! This crate provides:
//! - A reconnecting client for the push endpoint with typed event dispatch
//! - A subscription registry with per-listener failure isolation
//! - The dashboard state store shared by the push listeners and the poller
//! - The reconciler deciding how push events and polls update the store
//! - A REST collaborator trait and its HTTP implementation
//! - Prometheus metrics and an optional local status API
//!
//! # Usage
//!
//! ```ignore
//! use soil_live::{HttpBackend, LiveDashboard};
//!
//! let backend = HttpBackend::new(&config.api, &session.access_token)?;
//! let mut dashboard = LiveDashboard::new(config, session, backend, view, notifier)?;
//! dashboard.start().await;
//! // ...
//! dashboard.stop().await;
//! ```

mod backend;
mod events;
mod metrics;
mod reconciler;
mod registry;
mod status;
mod store;
mod view;
mod websocket;

pub use backend::*;
pub use events::*;
pub use metrics::*;
pub use reconciler::*;
pub use registry::*;
pub use status::*;
pub use store::*;
pub use view::*;
pub use websocket::*;

use soil_common::config::DashboardConfig;
use soil_common::error::{DashboardError, DashboardResult};
use soil_common::session::Session;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// One running dashboard: store, push connection, reconciler and poller.
///
/// When the store finds the session expired the poller stops and the push
/// connection is closed.
pub struct LiveDashboard<B> {
    config: Arc<DashboardConfig>,
    store: Arc<DashboardStore>,
    registry: Arc<SubscriptionRegistry>,
    connection: Arc<ConnectionManager>,
    reconciler: Reconciler<B>,
    metrics: Arc<LiveMetrics>,
    poller: Option<(watch::Sender<bool>, JoinHandle<()>)>,
    expiry_watch: Option<JoinHandle<()>>,
}

impl<B: Backend + 'static> LiveDashboard<B> {
    /// Wire a dashboard for `session`. The role comes from the session's groups.
    ///
    /// # Errors
    ///
    /// Returns [`DashboardError::Session`] if the session has expired and
    /// [`DashboardError::Config`] if metrics cannot be registered.
    pub fn new(
        config: DashboardConfig,
        session: Session,
        backend: B,
        view: Arc<dyn DashboardView>,
        notifier: Arc<dyn Notifier>,
    ) -> DashboardResult<Self> {
        if session.is_expired_now() {
            return Err(DashboardError::Session(String::from("access token has expired")));
        }

        let role = DashboardRole::from(session.role());
        let config = Arc::new(config);
        let metrics = Arc::new(
            LiveMetrics::new().map_err(|e| DashboardError::Config(format!("metrics: {e}")))?,
        );

        let store = Arc::new(DashboardStore::new(config.charts.window));
        store.set_current_user(Some(session));

        let registry = Arc::new(SubscriptionRegistry::new());
        let reconciler = Reconciler::new(
            Arc::new(backend),
            Arc::clone(&store),
            view,
            notifier,
            Arc::clone(&config),
            role,
        )
        .with_metrics(Arc::clone(&metrics));
        reconciler.attach(&registry);

        let connection = Arc::new(
            ConnectionManager::new(
                config.api.ws_url.clone(),
                config.reconnect.clone(),
                Arc::clone(&registry),
            )
            .with_metrics(Arc::clone(&metrics)),
        );

        Ok(Self {
            config,
            store,
            registry,
            connection,
            reconciler,
            metrics,
            poller: None,
            expiry_watch: None,
        })
    }

    /// Initial load, then the push connection and the poller.
    ///
    /// A failed initial load is reported through the view and does not stop
    /// the live parts from starting; the next poll retries it.
    pub async fn start(&mut self) {
        info!(role = %self.reconciler.role(), "Starting dashboard");
        if let Err(e) = self.reconciler.initialize().await {
            warn!(error = %e, "Initial load failed");
        }

        self.connection.connect().await;

        self.stop_poller().await;
        let (tx, rx) = watch::channel(false);
        let handle = self.reconciler.spawn_poller(rx);
        self.poller = Some((tx, handle));

        self.stop_expiry_watch();
        self.expiry_watch = Some(self.spawn_expiry_watch());
    }

    /// Close the push connection once the session is found expired.
    fn spawn_expiry_watch(&self) -> JoinHandle<()> {
        let mut expired = self.store.watch_session_expiry();
        let connection = Arc::clone(&self.connection);
        tokio::spawn(async move {
            let signed_out = expired.wait_for(|e| *e).await.is_ok();
            if signed_out {
                warn!("Session expired, closing push connection");
                connection.disconnect().await;
            }
        })
    }

    fn stop_expiry_watch(&mut self) {
        if let Some(handle) = self.expiry_watch.take() {
            handle.abort();
        }
    }

    /// Stop polling and the push connection, and forget the session.
    ///
    /// No retry or poll fires after this returns.
    pub async fn stop(&mut self) {
        self.stop_expiry_watch();
        self.stop_poller().await;
        self.connection.disconnect().await;
        self.store.set_current_user(None);
        info!("Dashboard stopped");
    }

    async fn stop_poller(&mut self) {
        if let Some((tx, handle)) = self.poller.take() {
            let _ = tx.send(true);
            if let Err(e) = handle.await {
                warn!(error = %e, "Poller ended abnormally");
            }
        }
    }

    /// Shared state store.
    pub fn store(&self) -> &Arc<DashboardStore> {
        &self.store
    }

    /// Subscription registry; extra listeners may be added at any time.
    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    /// Push connection.
    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    /// Reconciler, for user actions (mark-as-read, predictions, refresh).
    pub fn reconciler(&self) -> &Reconciler<B> {
        &self.reconciler
    }

    /// Prometheus metrics.
    pub fn metrics(&self) -> &Arc<LiveMetrics> {
        &self.metrics
    }

    /// Status API over this dashboard, using the configured bind address.
    pub fn status_server(&self) -> StatusServer {
        StatusServer::new(
            self.config.status.clone(),
            Arc::clone(&self.store),
            self.connection.subscribe_state(),
            Arc::clone(&self.metrics),
        )
    }
}

impl<B> Drop for LiveDashboard<B> {
    fn drop(&mut self) {
        if let Some(handle) = self.expiry_watch.take() {
            handle.abort();
        }
    }
}
