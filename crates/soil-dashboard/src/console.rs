//! Console rendering.
//!
//! The daemon has no screen; every view update becomes a structured log line
//! under the `soil_dashboard::console` target.

use soil_common::health::HealthStatus;
use soil_common::model::{Field, Prediction, Reading, SensorData};
use soil_live::{
    AlertBoard, DashboardStats, DashboardView, DesktopNotification, Notifier, Toast, ToastLevel,
};
use tracing::{debug, error, info, warn};

/// Renders dashboard updates through `tracing`.
#[derive(Debug, Clone, Copy)]
pub struct ConsoleView {
    panel_limit: usize,
}

impl ConsoleView {
    /// Show at most `panel_limit` alerts per alert update.
    pub fn new(panel_limit: usize) -> Self {
        Self { panel_limit }
    }
}

/// One-line summary of a reading's metrics.
pub fn summarize(data: &SensorData) -> String {
    format!(
        "{:.1}°C {:.0}% RH moisture {:.0}% rain {:.1}mm N {:.0} P {:.0} K {:.0} pH {:.1}",
        data.temperature,
        data.humidity,
        data.soil_moisture,
        data.rainfall,
        data.nitrogen,
        data.phosphorus,
        data.potassium,
        data.ph
    )
}

impl DashboardView for ConsoleView {
    fn render_fields(&self, fields: &[Field], selected: Option<&str>) {
        info!(count = fields.len(), selected = selected.unwrap_or("-"), "Fields");
        for field in fields {
            debug!(
                field_id = %field.id,
                name = %field.name,
                soil = %field.soil_type,
                area = field.area,
                "Field"
            );
        }
    }

    fn render_reading(&self, field: &Field, reading: &Reading, status: HealthStatus) {
        let summary = summarize(&reading.data);
        match status {
            HealthStatus::Normal => info!(
                field = %field.name,
                at = %reading.timestamp,
                %status,
                "{summary}"
            ),
            HealthStatus::Warning => warn!(
                field = %field.name,
                at = %reading.timestamp,
                %status,
                "{summary}"
            ),
        }
    }

    fn render_no_data(&self, field: &Field) {
        info!(field = %field.name, "No sensor data available");
    }

    fn render_series(&self, field_id: &str, readings: &[Reading]) {
        debug!(field_id, points = readings.len(), "Chart window updated");
    }

    fn render_alerts(&self, board: &AlertBoard) {
        info!(total = board.len(), unread = board.unread_count(), "Alerts");
        for alert in board.recent(self.panel_limit) {
            debug!(
                alert_id = %alert.id,
                severity = %alert.severity,
                read = alert.is_read,
                "{}: {}",
                alert.title(),
                alert.message
            );
        }
    }

    fn render_prediction(&self, prediction: &Prediction) {
        info!(
            field_id = %prediction.field_id,
            model = %prediction.model_used,
            confidence_pct = prediction.confidence_percent(),
            "Recommendation: {}",
            prediction.result.recommendation
        );
    }

    fn render_connection(&self, connected: bool) {
        info!(indicator = if connected { "Live" } else { "Offline" }, "Push connection");
    }

    fn render_stats(&self, stats: &DashboardStats) {
        info!(
            fields = stats.fields,
            sensors = stats.sensors,
            unread_alerts = stats.unread_alerts,
            predictions = stats.predictions,
            "Statistics"
        );
    }

    fn toast(&self, toast: Toast) {
        match toast.level {
            ToastLevel::Error => error!(target: "soil_dashboard::toast", "{}", toast.message),
            ToastLevel::Warning => warn!(target: "soil_dashboard::toast", "{}", toast.message),
            ToastLevel::Info | ToastLevel::Success => {
                info!(target: "soil_dashboard::toast", level = %toast.level, "{}", toast.message);
            }
        }
    }
}

/// Desktop notifications as log lines; the sound cue is the terminal bell.
#[derive(Debug, Clone, Copy)]
pub struct ConsoleNotifier {
    bell: bool,
}

impl ConsoleNotifier {
    /// `bell` rings the terminal bell for the alert sound.
    pub fn new(bell: bool) -> Self {
        Self { bell }
    }
}

impl Notifier for ConsoleNotifier {
    fn permission_granted(&self) -> bool {
        true
    }

    fn notify(&self, notification: &DesktopNotification) {
        if notification.require_interaction {
            warn!(tag = %notification.tag, "{}: {}", notification.title, notification.body);
        } else {
            info!(tag = %notification.tag, "{}: {}", notification.title, notification.body);
        }
    }

    fn play_sound(&self) {
        if self.bell {
            eprint!("\x07");
        }
    }
}
