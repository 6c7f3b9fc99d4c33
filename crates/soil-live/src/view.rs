//! Rendering and notification seams.
//!
//! The reconciler decides *what* changed; implementations of these traits
//! decide how it is shown. Both are best effort and must not block.

use crate::store::{AlertBoard, DashboardStats};
use serde::Serialize;
use soil_common::health::HealthStatus;
use soil_common::model::{Field, Prediction, Reading, Severity};
use std::fmt;

/// Toast styling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToastLevel {
    /// Neutral information.
    Info,
    /// An action completed.
    Success,
    /// Something needs attention.
    Warning,
    /// An action or fetch failed.
    Error,
}

impl From<Severity> for ToastLevel {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::High => Self::Error,
            Severity::Medium => Self::Warning,
            Severity::Low => Self::Info,
        }
    }
}

impl fmt::Display for ToastLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Success => write!(f, "success"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Transient, non-blocking message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Toast {
    /// Text shown.
    pub message: String,
    /// Styling.
    pub level: ToastLevel,
}

impl Toast {
    /// Build a toast.
    pub fn new(message: impl Into<String>, level: ToastLevel) -> Self {
        Self {
            message: message.into(),
            level,
        }
    }
}

/// Desktop notification request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DesktopNotification {
    /// Title line.
    pub title: String,
    /// Body text.
    pub body: String,
    /// Stay on screen until dismissed.
    pub require_interaction: bool,
    /// Replaces an earlier notification with the same tag.
    pub tag: String,
}

/// Where dashboard output goes.
pub trait DashboardView: Send + Sync {
    /// Field list changed.
    fn render_fields(&self, fields: &[Field], selected: Option<&str>);

    /// New reading for a field.
    fn render_reading(&self, field: &Field, reading: &Reading, status: HealthStatus);

    /// Latest reading for a field could not be loaded.
    fn render_no_data(&self, field: &Field);

    /// Live chart window for a field, oldest first.
    fn render_series(&self, field_id: &str, readings: &[Reading]);

    /// Alert list changed.
    fn render_alerts(&self, board: &AlertBoard);

    /// New prediction to show.
    fn render_prediction(&self, prediction: &Prediction);

    /// Live/Offline indicator.
    fn render_connection(&self, connected: bool);

    /// Headline counters.
    fn render_stats(&self, stats: &DashboardStats);

    /// Transient message.
    fn toast(&self, toast: Toast);
}

/// Desktop notification and audio side channels.
pub trait Notifier: Send + Sync {
    /// Whether desktop notifications may be shown.
    fn permission_granted(&self) -> bool;

    /// Raise a desktop notification.
    fn notify(&self, notification: &DesktopNotification);

    /// Play the alert cue.
    fn play_sound(&self);
}

/// Notifier that does nothing and never has permission.
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentNotifier;

impl Notifier for SilentNotifier {
    fn permission_granted(&self) -> bool {
        false
    }

    fn notify(&self, _notification: &DesktopNotification) {}

    fn play_sound(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_to_toast_level() {
        assert_eq!(ToastLevel::from(Severity::High), ToastLevel::Error);
        assert_eq!(ToastLevel::from(Severity::Medium), ToastLevel::Warning);
        assert_eq!(ToastLevel::from(Severity::Low), ToastLevel::Info);
        assert_eq!(ToastLevel::Warning.to_string(), "warning");
    }
}
