//! Dashboard state store.
//!
//! One store per dashboard instance. The push listeners and the poller both
//! write to it; every key sits behind its own lock and no lock is ever held
//! across an await point. The alert list and the pushed-id set move together
//! and are always locked in that order.
//!
//! Reading the signed-in user checks the session expiry. An expired session
//! is cleared and announced on [`DashboardStore::watch_session_expiry`].

use serde::Serialize;
use soil_common::config::AlertReconcilePolicy;
use soil_common::health::{HealthStatus, Metric};
use soil_common::model::{Alert, Field, Prediction, Reading};
use soil_common::session::Session;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::RwLock;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Latest live reading for a field with its health verdict.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveReading {
    /// The reading.
    pub reading: Reading,
    /// Normal or Warning.
    pub status: HealthStatus,
    /// Metrics outside their range.
    pub violations: Vec<Metric>,
}

/// Headline counters shown on the farmer dashboard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    /// Fields owned by the user.
    pub fields: usize,
    /// Sensors installed across those fields.
    pub sensors: usize,
    /// Unread alerts.
    pub unread_alerts: usize,
    /// Predictions loaded for the selected field.
    pub predictions: usize,
}

/// Sorted, de-duplicated view of an alert list.
///
/// Order is severity descending, then `created_at` descending. When the same
/// id appears more than once the earliest occurrence in the source list wins.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AlertBoard {
    alerts: Vec<Alert>,
}

impl AlertBoard {
    /// Build the board from a raw list, newest pushes first.
    #[must_use]
    pub fn from_alerts(raw: &[Alert]) -> Self {
        let mut seen = HashSet::new();
        let mut alerts: Vec<Alert> = raw
            .iter()
            .filter(|a| seen.insert(a.id.as_str()))
            .cloned()
            .collect();
        alerts.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        Self { alerts }
    }

    /// All alerts in display order.
    #[must_use]
    pub fn alerts(&self) -> &[Alert] {
        &self.alerts
    }

    /// First `limit` alerts in display order.
    #[must_use]
    pub fn recent(&self, limit: usize) -> &[Alert] {
        &self.alerts[..limit.min(self.alerts.len())]
    }

    /// Alerts not yet acknowledged.
    #[must_use]
    pub fn unread_count(&self) -> usize {
        self.alerts.iter().filter(|a| !a.is_read).count()
    }

    /// Number of distinct alerts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    /// Whether the board is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }
}

/// Serializable copy of the whole store.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    /// Signed-in user, token omitted.
    pub current_user: Option<Session>,
    /// Last fetched field list.
    pub fields: Vec<Field>,
    /// Alerts in display order.
    pub alerts: AlertBoard,
    /// Unread alert count.
    pub unread_alerts: usize,
    /// Field the detail panels show.
    pub selected_field_id: Option<String>,
    /// Push connection flag.
    pub ws_connected: bool,
    /// Latest live reading per field.
    pub live_readings: HashMap<String, LiveReading>,
    /// Most recent prediction shown.
    pub latest_prediction: Option<Prediction>,
    /// Headline counters.
    pub stats: DashboardStats,
    /// Snapshot time in epoch milliseconds.
    pub timestamp_ms: i64,
}

/// Shared mutable record for one dashboard instance.
#[derive(Debug)]
pub struct DashboardStore {
    current_user: RwLock<Option<Session>>,
    fields: RwLock<Vec<Field>>,
    alerts: RwLock<Vec<Alert>>,
    pushed_alert_ids: RwLock<HashSet<String>>,
    selected_field_id: RwLock<Option<String>>,
    ws_connected: RwLock<bool>,
    live: RwLock<HashMap<String, LiveReading>>,
    series: RwLock<HashMap<String, VecDeque<Reading>>>,
    predictions: RwLock<Vec<Prediction>>,
    latest_prediction: RwLock<Option<Prediction>>,
    stats: RwLock<DashboardStats>,
    session_expired: watch::Sender<bool>,
    chart_window: usize,
}

impl Default for DashboardStore {
    fn default() -> Self {
        Self::new(20)
    }
}

impl DashboardStore {
    /// Create an empty store keeping `chart_window` readings per field.
    #[must_use]
    pub fn new(chart_window: usize) -> Self {
        Self {
            current_user: RwLock::new(None),
            fields: RwLock::new(Vec::new()),
            alerts: RwLock::new(Vec::new()),
            pushed_alert_ids: RwLock::new(HashSet::new()),
            selected_field_id: RwLock::new(None),
            ws_connected: RwLock::new(false),
            live: RwLock::new(HashMap::new()),
            series: RwLock::new(HashMap::new()),
            predictions: RwLock::new(Vec::new()),
            latest_prediction: RwLock::new(None),
            stats: RwLock::new(DashboardStats::default()),
            session_expired: watch::Sender::new(false),
            chart_window: chart_window.max(1),
        }
    }

    /// Full snapshot for the status API.
    pub fn snapshot(&self) -> StoreSnapshot {
        let alerts = self.alert_board();
        StoreSnapshot {
            current_user: self.current_user(),
            fields: self.fields(),
            unread_alerts: alerts.unread_count(),
            alerts,
            selected_field_id: self.selected_field_id(),
            ws_connected: self.ws_connected(),
            live_readings: self.live.read().map(|l| l.clone()).unwrap_or_default(),
            latest_prediction: self.latest_prediction(),
            stats: self.stats(),
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
        }
    }

    // ---- session ----

    /// Signed-in user, or `None` once the session has expired.
    ///
    /// The first read past the expiry clears the user and flips the
    /// [`watch_session_expiry`](Self::watch_session_expiry) flag.
    pub fn current_user(&self) -> Option<Session> {
        let user = self.current_user.read().map(|u| u.clone()).unwrap_or_default()?;
        if !user.is_expired_now() {
            return Some(user);
        }
        if let Ok(mut guard) = self.current_user.write() {
            if guard.as_ref().is_some_and(Session::is_expired_now) {
                *guard = None;
                warn!(user = %user.subject_id, "Session expired, signing out");
                self.session_expired.send_replace(true);
            }
        }
        None
    }

    /// Replace the signed-in user. A new user clears the expiry flag.
    pub fn set_current_user(&self, user: Option<Session>) {
        let signed_in = user.is_some();
        if let Ok(mut guard) = self.current_user.write() {
            *guard = user;
        }
        if signed_in {
            self.session_expired.send_replace(false);
        }
    }

    /// Whether the last session was cleared because it expired.
    pub fn session_expired(&self) -> bool {
        *self.session_expired.borrow()
    }

    /// Flag that turns `true` when the session is found expired.
    pub fn watch_session_expiry(&self) -> watch::Receiver<bool> {
        self.session_expired.subscribe()
    }

    // ---- fields ----

    /// Last fetched field list.
    pub fn fields(&self) -> Vec<Field> {
        self.fields.read().map(|f| f.clone()).unwrap_or_default()
    }

    /// Number of cached fields.
    pub fn field_count(&self) -> usize {
        self.fields.read().map(|f| f.len()).unwrap_or(0)
    }

    /// Replace the field list wholesale.
    ///
    /// The selection defaults to the first field when nothing is selected yet
    /// and is otherwise left alone.
    pub fn set_fields(&self, fields: Vec<Field>) {
        let first = fields.first().map(|f| f.id.clone());
        if let Ok(mut guard) = self.fields.write() {
            *guard = fields;
        }
        if let Ok(mut selected) = self.selected_field_id.write() {
            if selected.is_none() {
                *selected = first;
            }
        }
    }

    /// Whether `field_id` is one of the cached fields.
    pub fn contains_field(&self, field_id: &str) -> bool {
        self.fields
            .read()
            .map(|f| f.iter().any(|field| field.id == field_id))
            .unwrap_or(false)
    }

    /// Cached field by id.
    pub fn field(&self, field_id: &str) -> Option<Field> {
        self.fields
            .read()
            .ok()
            .and_then(|f| f.iter().find(|field| field.id == field_id).cloned())
    }

    /// Display name of a field, or "Unknown Field".
    pub fn field_name(&self, field_id: &str) -> String {
        self.field(field_id)
            .map_or_else(|| String::from("Unknown Field"), |f| f.name)
    }

    /// Field the detail panels show.
    pub fn selected_field_id(&self) -> Option<String> {
        self.selected_field_id
            .read()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    /// Select a field explicitly.
    pub fn set_selected_field_id(&self, field_id: Option<String>) {
        if let Ok(mut guard) = self.selected_field_id.write() {
            *guard = field_id;
        }
    }

    // ---- alerts ----

    /// Raw alert list, most recent push first.
    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.read().map(|a| a.clone()).unwrap_or_default()
    }

    /// Sorted view of the alert list.
    pub fn alert_board(&self) -> AlertBoard {
        self.alerts
            .read()
            .map(|a| AlertBoard::from_alerts(&a))
            .unwrap_or_default()
    }

    /// Unread alerts after de-duplication.
    pub fn unread_count(&self) -> usize {
        self.alert_board().unread_count()
    }

    /// Insert a pushed alert at the front of the list.
    pub fn prepend_alert(&self, alert: Alert) {
        let Ok(mut alerts) = self.alerts.write() else {
            return;
        };
        if let Ok(mut ids) = self.pushed_alert_ids.write() {
            ids.insert(alert.id.clone());
        }
        alerts.insert(0, alert);
    }

    /// Replace the alert list with a polled snapshot.
    ///
    /// Under [`AlertReconcilePolicy::Replace`] the snapshot wins outright.
    /// Under [`AlertReconcilePolicy::RetainPushed`] pushed alerts the snapshot
    /// does not list yet are kept in front of it; once the backend lists an
    /// id it stops being tracked.
    ///
    /// The alert list lock is held for the whole swap so a push landing
    /// mid-poll is either retained or applied after it, never lost.
    pub fn replace_alerts(&self, snapshot: Vec<Alert>, policy: AlertReconcilePolicy) {
        // Lock order: alerts, then pushed_alert_ids.
        let Ok(mut alerts) = self.alerts.write() else {
            return;
        };
        let retained: Vec<Alert> = match self.pushed_alert_ids.write() {
            Ok(mut ids) => match policy {
                AlertReconcilePolicy::Replace => {
                    ids.clear();
                    Vec::new()
                }
                AlertReconcilePolicy::RetainPushed => {
                    ids.retain(|id| !snapshot.iter().any(|a| &a.id == id));
                    alerts
                        .iter()
                        .filter(|a| ids.contains(&a.id))
                        .cloned()
                        .collect()
                }
            },
            Err(_) => Vec::new(),
        };

        if !retained.is_empty() {
            debug!(retained = retained.len(), "Keeping pushed alerts missing from poll");
        }

        *alerts = retained.into_iter().chain(snapshot).collect();
    }

    // ---- connection ----

    /// Push connection flag.
    pub fn ws_connected(&self) -> bool {
        self.ws_connected.read().map(|c| *c).unwrap_or(false)
    }

    /// Set the push connection flag.
    pub fn set_ws_connected(&self, connected: bool) {
        if let Ok(mut guard) = self.ws_connected.write() {
            *guard = connected;
        }
    }

    // ---- readings ----

    /// Record a live reading: latest-per-field cache plus the chart window.
    ///
    /// A reading with the same timestamp as the newest one in the window
    /// replaces it instead of being appended.
    pub fn record_reading(&self, live: LiveReading) {
        let field_id = live.reading.field_id.clone();
        if let Ok(mut series) = self.series.write() {
            let window = series.entry(field_id.clone()).or_default();
            if window
                .back()
                .is_some_and(|last| last.timestamp == live.reading.timestamp)
            {
                window.pop_back();
            }
            window.push_back(live.reading.clone());
            while window.len() > self.chart_window {
                window.pop_front();
            }
        }
        if let Ok(mut guard) = self.live.write() {
            guard.insert(field_id, live);
        }
    }

    /// Latest live reading for a field.
    pub fn live_reading(&self, field_id: &str) -> Option<LiveReading> {
        self.live.read().ok().and_then(|l| l.get(field_id).cloned())
    }

    /// Replace a field's chart window, keeping the newest readings.
    pub fn seed_series(&self, field_id: &str, mut readings: Vec<Reading>) {
        readings.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        let skip = readings.len().saturating_sub(self.chart_window);
        if let Ok(mut series) = self.series.write() {
            series.insert(field_id.to_string(), readings.into_iter().skip(skip).collect());
        }
    }

    /// Chart window for a field, oldest first.
    pub fn series(&self, field_id: &str) -> Vec<Reading> {
        self.series
            .read()
            .ok()
            .and_then(|s| s.get(field_id).map(|w| w.iter().cloned().collect()))
            .unwrap_or_default()
    }

    // ---- predictions ----

    /// Predictions loaded for the selected field.
    pub fn predictions(&self) -> Vec<Prediction> {
        self.predictions.read().map(|p| p.clone()).unwrap_or_default()
    }

    /// Replace the loaded prediction list.
    pub fn set_predictions(&self, predictions: Vec<Prediction>) {
        if let Ok(mut guard) = self.predictions.write() {
            *guard = predictions;
        }
    }

    /// Most recent prediction shown.
    pub fn latest_prediction(&self) -> Option<Prediction> {
        self.latest_prediction
            .read()
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    /// Set the prediction shown.
    pub fn set_latest_prediction(&self, prediction: Prediction) {
        if let Ok(mut guard) = self.latest_prediction.write() {
            *guard = Some(prediction);
        }
    }

    // ---- stats ----

    /// Headline counters.
    pub fn stats(&self) -> DashboardStats {
        self.stats.read().map(|s| *s).unwrap_or_default()
    }

    /// Replace the headline counters.
    pub fn set_stats(&self, stats: DashboardStats) {
        if let Ok(mut guard) = self.stats.write() {
            *guard = stats;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use soil_common::model::{SensorData, Severity};

    fn alert(id: &str, severity: Severity, minute: i64) -> Alert {
        Alert {
            id: id.into(),
            field_id: "f1".into(),
            severity,
            alert_type: "low_nitrogen".into(),
            message: format!("alert {id}"),
            is_read: false,
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
                + Duration::minutes(minute),
        }
    }

    fn field(id: &str) -> Field {
        Field {
            id: id.into(),
            name: format!("Field {id}"),
            location: Default::default(),
            area: 1.0,
            soil_type: "Loamy".into(),
            current_crop: None,
        }
    }

    fn reading(field_id: &str, minute: i64) -> Reading {
        Reading {
            field_id: field_id.into(),
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
                + Duration::minutes(minute),
            data: SensorData::default(),
        }
    }

    #[test]
    fn test_board_sorted_by_severity_then_recency() {
        let raw = vec![
            alert("low-new", Severity::Low, 30),
            alert("high-old", Severity::High, 0),
            alert("med", Severity::Medium, 10),
            alert("high-new", Severity::High, 20),
        ];
        let board = AlertBoard::from_alerts(&raw);
        let ids: Vec<&str> = board.alerts().iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["high-new", "high-old", "med", "low-new"]);
        assert_eq!(board.recent(2).len(), 2);
        assert_eq!(board.recent(10).len(), 4);
    }

    #[test]
    fn test_board_collapses_duplicates() {
        let mut pushed = alert("a1", Severity::High, 5);
        pushed.is_read = false;
        let mut polled = pushed.clone();
        polled.is_read = true;

        let board = AlertBoard::from_alerts(&[pushed, polled, alert("a2", Severity::Low, 1)]);
        assert_eq!(board.len(), 2);
        assert_eq!(board.unread_count(), 2);
    }

    #[test]
    fn test_set_fields_defaults_selection_once() {
        let store = DashboardStore::default();
        assert_eq!(store.selected_field_id(), None);

        store.set_fields(vec![field("f1"), field("f2")]);
        assert_eq!(store.selected_field_id().as_deref(), Some("f1"));

        store.set_selected_field_id(Some("f2".into()));
        store.set_fields(vec![field("f3")]);
        assert_eq!(store.selected_field_id().as_deref(), Some("f2"));
        assert!(!store.contains_field("f1"));
        assert_eq!(store.field_name("f3"), "Field f3");
        assert_eq!(store.field_name("nope"), "Unknown Field");
    }

    #[test]
    fn test_empty_field_list_leaves_selection_unset() {
        let store = DashboardStore::default();
        store.set_fields(Vec::new());
        assert_eq!(store.selected_field_id(), None);
    }

    #[test]
    fn test_replace_policy_drops_unlisted_push() {
        let store = DashboardStore::default();
        store.replace_alerts(vec![alert("a1", Severity::Low, 0)], AlertReconcilePolicy::Replace);
        store.prepend_alert(alert("a2", Severity::High, 1));
        assert_eq!(store.alerts()[0].id, "a2");

        store.replace_alerts(vec![alert("a1", Severity::Low, 0)], AlertReconcilePolicy::Replace);
        let ids: Vec<String> = store.alerts().into_iter().map(|a| a.id).collect();
        assert_eq!(ids, vec!["a1"]);
    }

    #[test]
    fn test_retain_policy_keeps_push_until_listed() {
        let store = DashboardStore::default();
        store.prepend_alert(alert("a2", Severity::High, 1));

        store.replace_alerts(
            vec![alert("a1", Severity::Low, 0)],
            AlertReconcilePolicy::RetainPushed,
        );
        let ids: Vec<String> = store.alerts().into_iter().map(|a| a.id).collect();
        assert_eq!(ids, vec!["a2", "a1"]);

        let mut listed = alert("a2", Severity::High, 1);
        listed.is_read = true;
        store.replace_alerts(
            vec![listed, alert("a1", Severity::Low, 0)],
            AlertReconcilePolicy::RetainPushed,
        );
        let alerts = store.alerts();
        assert_eq!(alerts.len(), 2);
        assert!(alerts[0].is_read);

        // No longer tracked, so a later snapshot without it drops it.
        store.replace_alerts(
            vec![alert("a1", Severity::Low, 0)],
            AlertReconcilePolicy::RetainPushed,
        );
        assert_eq!(store.alerts().len(), 1);
    }

    #[test]
    fn test_push_during_poll_swap_is_kept() {
        let store = DashboardStore::default();
        let pushes = 1000;

        std::thread::scope(|scope| {
            scope.spawn(|| {
                for i in 0..pushes {
                    store.prepend_alert(alert(&format!("p{i}"), Severity::High, i));
                }
            });
            scope.spawn(|| {
                for _ in 0..pushes {
                    store.replace_alerts(
                        vec![alert("s0", Severity::Low, 0)],
                        AlertReconcilePolicy::RetainPushed,
                    );
                }
            });
        });

        let ids: HashSet<String> = store.alerts().into_iter().map(|a| a.id).collect();
        let missing = (0..pushes)
            .filter(|i| !ids.contains(&format!("p{i}")))
            .count();
        assert_eq!(missing, 0, "pushed alerts lost during poll swaps");
    }

    fn session(expiry_epoch_millis: i64) -> Session {
        Session {
            access_token: "token".into(),
            expiry_epoch_millis,
            subject_id: "u1".into(),
            groups: Default::default(),
        }
    }

    #[test]
    fn test_expired_session_cleared_on_read() {
        let store = DashboardStore::default();
        let mut expiry = store.watch_session_expiry();

        store.set_current_user(Some(session(i64::MAX)));
        assert!(store.current_user().is_some());
        assert!(!store.session_expired());

        store.set_current_user(Some(session(1)));
        assert!(store.current_user().is_none());
        assert!(store.session_expired());
        assert!(expiry.has_changed().unwrap());
        assert!(*expiry.borrow_and_update());

        // A fresh sign-in resets the flag.
        store.set_current_user(Some(session(i64::MAX)));
        assert!(!store.session_expired());
        assert_eq!(store.current_user().unwrap().subject_id, "u1");
    }

    #[test]
    fn test_sign_out_is_not_expiry() {
        let store = DashboardStore::default();
        store.set_current_user(Some(session(i64::MAX)));
        store.set_current_user(None);
        assert!(store.current_user().is_none());
        assert!(!store.session_expired());
    }

    #[test]
    fn test_series_window_evicts_oldest() {
        let store = DashboardStore::new(3);
        for minute in 0..5 {
            store.record_reading(LiveReading {
                reading: reading("f1", minute),
                status: HealthStatus::Normal,
                violations: Vec::new(),
            });
        }
        let series = store.series("f1");
        assert_eq!(series.len(), 3);
        assert_eq!(series[0].timestamp, reading("f1", 2).timestamp);
        assert_eq!(
            store.live_reading("f1").map(|l| l.reading.timestamp),
            Some(reading("f1", 4).timestamp)
        );
    }

    #[test]
    fn test_same_timestamp_replaces_newest() {
        let store = DashboardStore::new(5);
        for _ in 0..3 {
            store.record_reading(LiveReading {
                reading: reading("f1", 7),
                status: HealthStatus::Normal,
                violations: Vec::new(),
            });
        }
        assert_eq!(store.series("f1").len(), 1);
    }

    #[test]
    fn test_seed_series_keeps_newest() {
        let store = DashboardStore::new(2);
        store.seed_series("f1", vec![reading("f1", 5), reading("f1", 1), reading("f1", 3)]);
        let series = store.series("f1");
        assert_eq!(
            series.iter().map(|r| r.timestamp).collect::<Vec<_>>(),
            vec![reading("f1", 3).timestamp, reading("f1", 5).timestamp]
        );
    }

    #[test]
    fn test_snapshot_serializes_without_token() {
        let store = DashboardStore::default();
        store.set_current_user(Some(Session {
            access_token: "secret".into(),
            expiry_epoch_millis: 0,
            subject_id: "u1".into(),
            groups: Default::default(),
        }));
        store.set_ws_connected(true);

        let json = serde_json::to_string(&store.snapshot()).unwrap();
        assert!(json.contains("\"wsConnected\":true"));
        assert!(json.contains("\"subjectId\":\"u1\""));
        assert!(!json.contains("secret"));
    }
}
