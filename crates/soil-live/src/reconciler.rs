//! Reconciliation of push events with polled snapshots.
//!
//! Push handlers run synchronously on the connection task and only touch the
//! store and the view. Poll ticks and user actions are async and go through
//! the [`Backend`]. A failed REST call is reported as a toast and leaves the
//! store at its last good snapshot.

use crate::backend::{Backend, CropPredictionInput, FertilizerPredictionInput};
use crate::events::{EventKind, PushEvent, SensorPayload};
use crate::metrics::LiveMetrics;
use crate::registry::SubscriptionRegistry;
use crate::store::{DashboardStats, DashboardStore, LiveReading};
use crate::view::{DashboardView, DesktopNotification, Notifier, Toast, ToastLevel};
use chrono::Utc;
use serde::Serialize;
use soil_common::config::{DashboardConfig, RefreshConfig};
use soil_common::error::{DashboardError, DashboardResult};
use soil_common::health::HealthStatus;
use soil_common::model::{Alert, Field, Prediction, PredictionType, Reading, Severity};
use soil_common::session::{Role, Session};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Which dashboard a reconciler drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DashboardRole {
    /// Administrator overview of every field.
    Admin,
    /// Farmer view of the user's own fields.
    User,
}

impl From<Role> for DashboardRole {
    fn from(role: Role) -> Self {
        match role {
            Role::Administrator => Self::Admin,
            Role::User => Self::User,
        }
    }
}

impl fmt::Display for DashboardRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Admin => write!(f, "admin"),
            Self::User => write!(f, "user"),
        }
    }
}

impl DashboardRole {
    /// Poll period for this dashboard.
    #[must_use]
    pub fn poll_interval(self, refresh: &RefreshConfig) -> Duration {
        match self {
            Self::Admin => refresh.admin_interval,
            Self::User => refresh.user_interval,
        }
    }

    /// Whether ALERT and PREDICTION pushes for fields outside the store are shown.
    #[must_use]
    pub fn accepts_foreign_fields(self) -> bool {
        matches!(self, Self::Admin)
    }
}

/// What a poll tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollMode {
    /// Connected: alerts and fields only.
    Narrow,
    /// Disconnected: fields, alerts and latest readings.
    Full,
    /// No active session: nothing fetched.
    Skipped,
}

impl PollMode {
    fn label(self) -> &'static str {
        match self {
            Self::Narrow => "narrow",
            Self::Full => "full",
            Self::Skipped => "skipped",
        }
    }
}

/// Policy layer between the push stream, the poller and the store.
pub struct Reconciler<B> {
    backend: Arc<B>,
    store: Arc<DashboardStore>,
    view: Arc<dyn DashboardView>,
    notifier: Arc<dyn Notifier>,
    config: Arc<DashboardConfig>,
    role: DashboardRole,
    metrics: Option<Arc<LiveMetrics>>,
}

impl<B> Clone for Reconciler<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            store: Arc::clone(&self.store),
            view: Arc::clone(&self.view),
            notifier: Arc::clone(&self.notifier),
            config: Arc::clone(&self.config),
            role: self.role,
            metrics: self.metrics.clone(),
        }
    }
}

impl<B> fmt::Debug for Reconciler<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reconciler")
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

impl<B: Backend + 'static> Reconciler<B> {
    /// Create a reconciler over an existing store.
    pub fn new(
        backend: Arc<B>,
        store: Arc<DashboardStore>,
        view: Arc<dyn DashboardView>,
        notifier: Arc<dyn Notifier>,
        config: Arc<DashboardConfig>,
        role: DashboardRole,
    ) -> Self {
        Self {
            backend,
            store,
            view,
            notifier,
            config,
            role,
            metrics: None,
        }
    }

    /// Attach Prometheus metrics.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<LiveMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Store this reconciler writes to.
    pub fn store(&self) -> &Arc<DashboardStore> {
        &self.store
    }

    /// Dashboard role.
    pub fn role(&self) -> DashboardRole {
        self.role
    }

    /// Register push listeners for every event kind.
    pub fn attach(&self, registry: &SubscriptionRegistry) {
        for kind in EventKind::ALL {
            let this = self.clone();
            registry.on(kind, move |event| {
                this.apply(event);
                Ok(())
            });
        }
    }

    /// Apply one push event. Returns whether it changed anything.
    pub fn apply(&self, event: &PushEvent) -> bool {
        match event {
            PushEvent::SensorData(payload) => self.apply_sensor_data(payload),
            PushEvent::Alert(alert) => self.apply_alert(alert),
            PushEvent::Prediction(prediction) => self.apply_prediction(prediction),
            PushEvent::Connected => {
                self.set_connected(true);
                true
            }
            PushEvent::Disconnected => {
                self.set_connected(false);
                true
            }
            PushEvent::Error(reason) => {
                warn!(error = %reason, "Push connection reported an error");
                self.view.toast(Toast::new(
                    "Real-time connection error. Retrying...",
                    ToastLevel::Error,
                ));
                false
            }
        }
    }

    /// Project a live reading onto its field. Unknown fields are dropped.
    pub fn apply_sensor_data(&self, payload: &SensorPayload) -> bool {
        let Some(field) = self.store.field(&payload.field_id) else {
            debug!(field_id = %payload.field_id, "Dropping reading for unknown field");
            return false;
        };

        let live = self.classify(payload.clone().into_reading(Utc::now()));
        self.store.record_reading(live.clone());
        self.view.render_reading(&field, &live.reading, live.status);
        self.view
            .render_series(&field.id, &self.store.series(&field.id));

        if live.status == HealthStatus::Warning {
            debug!(field_id = %field.id, violations = ?live.violations, "Reading out of range");
            self.view.toast(Toast::new(
                format!("Unusual readings detected in {}", field.name),
                ToastLevel::Warning,
            ));
        }
        true
    }

    /// Prepend a pushed alert and surface it.
    pub fn apply_alert(&self, alert: &Alert) -> bool {
        if !self.role.accepts_foreign_fields() && !self.store.contains_field(&alert.field_id) {
            debug!(alert_id = %alert.id, field_id = %alert.field_id, "Dropping alert for foreign field");
            return false;
        }

        info!(alert_id = %alert.id, severity = %alert.severity, "Alert pushed");
        self.store.prepend_alert(alert.clone());
        self.view.render_alerts(&self.store.alert_board());
        self.view
            .toast(Toast::new(alert.message.clone(), alert.severity.into()));

        if self.config.notifications.desktop && self.notifier.permission_granted() {
            self.notifier.notify(&DesktopNotification {
                title: alert.severity.notification_title().to_string(),
                body: format!("{}: {}", self.store.field_name(&alert.field_id), alert.message),
                require_interaction: alert.severity == Severity::High,
                tag: alert.id.clone(),
            });
        }
        if self.config.notifications.sound {
            self.notifier.play_sound();
        }

        if self.role == DashboardRole::User {
            let mut stats = self.store.stats();
            stats.unread_alerts = self.store.unread_count();
            self.store.set_stats(stats);
            self.view.render_stats(&stats);
        }
        true
    }

    /// Show a pushed prediction.
    pub fn apply_prediction(&self, prediction: &Prediction) -> bool {
        if !self.role.accepts_foreign_fields() && !self.store.contains_field(&prediction.field_id) {
            debug!(field_id = %prediction.field_id, "Dropping prediction for foreign field");
            return false;
        }

        self.store.set_latest_prediction(prediction.clone());
        self.view.render_prediction(prediction);

        let kind = match prediction.prediction_type {
            PredictionType::Crop => "crop",
            PredictionType::Fertilizer => "fertilizer",
        };
        let field_name = self.store.field_name(&prediction.field_id);
        self.view.toast(Toast::new(
            format!("New {kind} recommendation for {field_name}"),
            ToastLevel::Info,
        ));

        if self.config.notifications.desktop && self.notifier.permission_granted() {
            self.notifier.notify(&DesktopNotification {
                title: String::from("New Prediction"),
                body: format!("{field_name}: {}", prediction.result.recommendation),
                require_interaction: false,
                tag: format!("prediction-{}", prediction.field_id),
            });
        }
        true
    }

    /// Flip the Live/Offline indicator.
    pub fn set_connected(&self, connected: bool) {
        self.store.set_ws_connected(connected);
        self.view.render_connection(connected);
    }

    fn classify(&self, reading: Reading) -> LiveReading {
        let (status, violations) = self.config.health.assess(&reading.data);
        LiveReading {
            reading,
            status,
            violations,
        }
    }

    fn report(&self, operation: &str, error: &DashboardError, message: &str) {
        warn!(operation, error = %error, "REST call failed");
        if let Some(ref metrics) = self.metrics {
            metrics.record_rest_failure(operation);
        }
        self.view.toast(Toast::new(message, ToastLevel::Error));
    }

    /// Signed-in user for a backend call. Fails once the session expired.
    fn session(&self) -> DashboardResult<Session> {
        self.store.current_user().ok_or_else(|| {
            if self.store.session_expired() {
                DashboardError::Session(String::from("session expired"))
            } else {
                DashboardError::Session(String::from("no signed-in user"))
            }
        })
    }

    fn user_id(&self) -> DashboardResult<String> {
        self.session().map(|s| s.subject_id)
    }

    // ---- polling ----

    /// One poll tick: narrow while the push connection is up, full otherwise.
    ///
    /// Without a live session the tick makes no backend calls.
    pub async fn poll_tick(&self) -> PollMode {
        let mode = if let Err(e) = self.session() {
            debug!(error = %e, "Poll tick skipped");
            PollMode::Skipped
        } else if self.store.ws_connected() {
            self.narrow_poll().await;
            PollMode::Narrow
        } else {
            if let Err(e) = self.full_reload().await {
                debug!(error = %e, "Full reload incomplete");
            }
            PollMode::Full
        };
        if let Some(ref metrics) = self.metrics {
            metrics.record_poll(mode.label());
        }
        debug!(role = %self.role, mode = mode.label(), "Poll tick");
        mode
    }

    async fn narrow_poll(&self) {
        // Failures are already reported; the field refresh still runs.
        let _ = self.refresh_alerts().await;

        let user_id = match self.user_id() {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, "Skipping field refresh");
                return;
            }
        };
        match self.backend.fields_by_user(&user_id).await {
            Ok(fields) if fields.len() != self.store.field_count() => {
                info!(count = fields.len(), "Field list changed");
                self.store.set_fields(fields);
                self.render_fields();
            }
            Ok(_) => {}
            Err(e) => self.report("fields_by_user", &e, "Failed to load fields"),
        }

        if self.role == DashboardRole::User {
            self.update_statistics().await;
        }
    }

    /// Fields, alerts and the latest reading per field. The farmer dashboard
    /// also loads predictions for the first field and the statistics.
    ///
    /// # Errors
    ///
    /// Returns the error that stopped the reload: no session or a failed
    /// field fetch. Alert and per-field failures are reported and skipped.
    pub async fn full_reload(&self) -> DashboardResult<()> {
        let user_id = self.user_id()?;
        let fields = match self.backend.fields_by_user(&user_id).await {
            Ok(fields) => fields,
            Err(e) => {
                self.report("fields_by_user", &e, "Failed to load fields");
                return Err(e);
            }
        };

        self.store.set_fields(fields.clone());
        self.render_fields();

        let _ = self.refresh_alerts().await;
        self.load_latest_readings(&fields).await;

        if self.role == DashboardRole::User {
            if let Some(first) = fields.first() {
                self.load_predictions(&first.id).await;
            }
            self.update_statistics().await;
        }
        Ok(())
    }

    fn render_fields(&self) {
        let selected = self.store.selected_field_id();
        self.view
            .render_fields(&self.store.fields(), selected.as_deref());
    }

    async fn refresh_alerts(&self) -> DashboardResult<()> {
        let user_id = self.user_id()?;
        match self.backend.alerts_by_user(&user_id).await {
            Ok(alerts) => {
                self.store
                    .replace_alerts(alerts, self.config.alerts.reconcile);
                self.view.render_alerts(&self.store.alert_board());
                Ok(())
            }
            Err(e) => {
                self.report("alerts_by_user", &e, "Failed to load alerts");
                Err(e)
            }
        }
    }

    async fn load_latest_readings(&self, fields: &[Field]) {
        for field in fields {
            match self.backend.latest_reading(&field.id).await {
                Ok(reading) => {
                    let live = self.classify(reading);
                    self.store.record_reading(live.clone());
                    self.view.render_reading(field, &live.reading, live.status);
                }
                Err(e) => {
                    debug!(field_id = %field.id, error = %e, "No latest reading");
                    if let Some(ref metrics) = self.metrics {
                        metrics.record_rest_failure("latest_reading");
                    }
                    self.view.render_no_data(field);
                }
            }
        }
    }

    async fn load_predictions(&self, field_id: &str) {
        match self.backend.predictions_by_field(field_id).await {
            Ok(predictions) => {
                let latest = predictions.iter().max_by_key(|p| p.created_at).cloned();
                self.store.set_predictions(predictions);
                if let Some(latest) = latest {
                    self.store.set_latest_prediction(latest.clone());
                    self.view.render_prediction(&latest);
                }
            }
            Err(e) => {
                warn!(field_id, error = %e, "Failed to load predictions");
                if let Some(ref metrics) = self.metrics {
                    metrics.record_rest_failure("predictions_by_field");
                }
            }
        }
    }

    /// Recount the headline statistics. Per-field sensor failures count as zero.
    pub async fn update_statistics(&self) -> DashboardStats {
        let fields = self.store.fields();
        let mut sensors = 0;
        for field in &fields {
            match self.backend.sensors_by_field(&field.id).await {
                Ok(list) => sensors += list.len(),
                Err(e) => debug!(field_id = %field.id, error = %e, "Sensor count unavailable"),
            }
        }

        let stats = DashboardStats {
            fields: fields.len(),
            sensors,
            unread_alerts: self.store.unread_count(),
            predictions: self.store.predictions().len(),
        };
        self.store.set_stats(stats);
        self.view.render_stats(&stats);
        stats
    }

    /// Health check followed by a full reload.
    ///
    /// # Errors
    ///
    /// Returns an error if the API is unreachable or the reload fails.
    pub async fn initialize(&self) -> DashboardResult<()> {
        self.session()?;
        if let Err(e) = self.backend.check_health().await {
            self.report("check_health", &e, "Unable to reach the soil monitoring API");
            return Err(e);
        }
        info!(role = %self.role, "API reachable, loading dashboard");
        self.full_reload().await
    }

    /// Manual refresh, same as a disconnected poll tick.
    ///
    /// # Errors
    ///
    /// See [`Reconciler::full_reload`].
    pub async fn refresh(&self) -> DashboardResult<()> {
        self.view
            .toast(Toast::new("Refreshing dashboard data...", ToastLevel::Success));
        self.full_reload().await
    }

    /// Acknowledge an alert, then refetch the alert list.
    ///
    /// The local copy is never flipped before the refetch lands.
    ///
    /// # Errors
    ///
    /// Returns an error if either call fails.
    pub async fn mark_alert_read(&self, alert_id: &str) -> DashboardResult<()> {
        self.session()?;
        if let Err(e) = self.backend.mark_alert_read(alert_id).await {
            self.report("mark_alert_read", &e, "Failed to mark alert as read");
            return Err(e);
        }
        debug!(alert_id, "Alert acknowledged");
        self.refresh_alerts().await
    }

    // ---- predictions ----

    /// Crop recommendation for `field_id`, the selected field, or the first field.
    ///
    /// # Errors
    ///
    /// Returns an error when there are no fields, no reading, or the model call fails.
    pub async fn request_crop_prediction(
        &self,
        field_id: Option<&str>,
    ) -> DashboardResult<Prediction> {
        self.session()?;
        let field_id = match field_id {
            Some(id) => id.to_string(),
            None => {
                let fallback = self
                    .store
                    .selected_field_id()
                    .or_else(|| self.store.fields().first().map(|f| f.id.clone()));
                match fallback {
                    Some(id) if self.store.field_count() > 0 => id,
                    _ => {
                        self.view.toast(Toast::new(
                            "No fields available. Please add a field first.",
                            ToastLevel::Error,
                        ));
                        return Err(DashboardError::NotFound(String::from("no fields")));
                    }
                }
            }
        };

        let reading = self.reading_for_prediction(&field_id).await?;
        let input = CropPredictionInput::from(&reading.data);
        let prediction = match self.backend.predict_crop(&field_id, &input).await {
            Ok(p) => p,
            Err(e) => {
                self.report("predict_crop", &e, "Failed to generate prediction");
                return Err(e);
            }
        };

        self.show_prediction(&prediction, "Crop prediction generated successfully!");
        Ok(prediction)
    }

    /// Fertilizer recommendation for `field_id`.
    ///
    /// # Errors
    ///
    /// Returns an error when there is no reading, the field cannot be loaded,
    /// or the model call fails.
    pub async fn request_fertilizer_prediction(
        &self,
        field_id: &str,
    ) -> DashboardResult<Prediction> {
        self.session()?;
        let reading = self.reading_for_prediction(field_id).await?;
        let field = match self.backend.field_by_id(field_id).await {
            Ok(f) => f,
            Err(e) => {
                self.report("field_by_id", &e, "Failed to load field details");
                return Err(e);
            }
        };

        let input = FertilizerPredictionInput::new(&reading.data, &field);
        let prediction = match self.backend.predict_fertilizer(field_id, &input).await {
            Ok(p) => p,
            Err(e) => {
                self.report("predict_fertilizer", &e, "Failed to generate fertilizer recommendation");
                return Err(e);
            }
        };

        self.show_prediction(&prediction, "Fertilizer recommendation generated successfully!");
        Ok(prediction)
    }

    async fn reading_for_prediction(&self, field_id: &str) -> DashboardResult<Reading> {
        self.backend.latest_reading(field_id).await.map_err(|e| {
            self.report("latest_reading", &e, "No sensor data available for prediction");
            e
        })
    }

    fn show_prediction(&self, prediction: &Prediction, message: &str) {
        info!(
            field_id = %prediction.field_id,
            recommendation = %prediction.result.recommendation,
            confidence = prediction.confidence_percent(),
            "Prediction generated"
        );
        self.store.set_latest_prediction(prediction.clone());
        self.view.render_prediction(prediction);
        self.view.toast(Toast::new(message, ToastLevel::Success));
    }

    // ---- history ----

    /// Seed a field's chart window from its stored readings.
    ///
    /// # Errors
    ///
    /// Returns an error if the readings cannot be fetched.
    pub async fn load_history(&self, field_id: &str) -> DashboardResult<Vec<Reading>> {
        self.session()?;
        let readings = match self.backend.readings_by_field(field_id).await {
            Ok(r) => r,
            Err(e) => {
                self.report("readings_by_field", &e, "Failed to load reading history");
                return Err(e);
            }
        };
        self.store.seed_series(field_id, readings);
        let series = self.store.series(field_id);
        self.view.render_series(field_id, &series);
        Ok(series)
    }

    /// Last `limit` stored readings for a field, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the readings cannot be fetched.
    pub async fn recent_readings(&self, field_id: &str, limit: usize) -> DashboardResult<Vec<Reading>> {
        self.session()?;
        let mut readings = self.backend.readings_by_field(field_id).await?;
        readings.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        readings.truncate(limit);
        Ok(readings)
    }

    /// Run [`Reconciler::poll_tick`] on this dashboard's interval until
    /// `shutdown` flips, its sender is dropped, or the session expires. The
    /// first tick fires one interval after the call.
    pub fn spawn_poller(&self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let this = self.clone();
        let period = self.role.poll_interval(&self.config.refresh);
        info!(role = %self.role, interval_ms = period.as_millis() as u64, "Starting poller");

        let mut expired = self.store.watch_session_expiry();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    true = session_expired(&mut expired) => {
                        info!("Session expired, stopping poller");
                        break;
                    }
                    _ = ticker.tick() => {
                        this.poll_tick().await;
                    }
                }
            }
            debug!("Poller stopped");
        })
    }
}

/// Resolves `true` once the store flags the session expired.
async fn session_expired(expired: &mut watch::Receiver<bool>) -> bool {
    expired.wait_for(|e| *e).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_mapping() {
        assert_eq!(DashboardRole::from(Role::Administrator), DashboardRole::Admin);
        assert_eq!(DashboardRole::from(Role::User), DashboardRole::User);
        assert!(DashboardRole::Admin.accepts_foreign_fields());
        assert!(!DashboardRole::User.accepts_foreign_fields());
    }

    #[test]
    fn test_poll_intervals() {
        let refresh = RefreshConfig::default();
        assert_eq!(
            DashboardRole::Admin.poll_interval(&refresh),
            Duration::from_secs(30)
        );
        assert_eq!(
            DashboardRole::User.poll_interval(&refresh),
            Duration::from_secs(60)
        );
    }
}
