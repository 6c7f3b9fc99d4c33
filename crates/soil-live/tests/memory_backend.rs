//! In-memory REST backend and recording view/notifier for reconciler tests.
//!
//! The backend serves whatever the test puts in [`BackendState`], records
//! every call as `"operation:argument"`, and fails any operation listed in
//! `failing`.

#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use soil_common::error::{DashboardError, DashboardResult};
use soil_common::health::HealthStatus;
use soil_common::model::{
    Alert, Field, Location, Prediction, PredictionResult, PredictionType, Reading, SensorData,
    Sensor, Severity,
};
use soil_common::session::Session;
use soil_live::{
    AlertBoard, Backend, CropPredictionInput, DashboardStats, DashboardView, DesktopNotification,
    FertilizerPredictionInput, Notifier, Toast,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

// ============================================================================
// Fixtures
// ============================================================================

pub fn at(minute: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap() + Duration::minutes(minute)
}

pub fn field(id: &str) -> Field {
    Field {
        id: id.into(),
        name: format!("Field {id}"),
        location: Location {
            address: "Route 1".into(),
            latitude: None,
            longitude: None,
        },
        area: 2.5,
        soil_type: "Loamy".into(),
        current_crop: None,
    }
}

pub fn healthy_data() -> SensorData {
    SensorData {
        temperature: 24.0,
        humidity: 60.0,
        soil_moisture: 35.0,
        rainfall: 3.0,
        nitrogen: 50.0,
        phosphorus: 40.0,
        potassium: 120.0,
        ph: 6.5,
    }
}

pub fn reading(field_id: &str, minute: i64) -> Reading {
    Reading {
        field_id: field_id.into(),
        timestamp: at(minute),
        data: healthy_data(),
    }
}

pub fn alert(id: &str, field_id: &str, severity: Severity, minute: i64) -> Alert {
    Alert {
        id: id.into(),
        field_id: field_id.into(),
        severity,
        alert_type: "low_nitrogen".into(),
        message: format!("Nitrogen low ({id})"),
        is_read: false,
        created_at: at(minute),
    }
}

pub fn prediction(field_id: &str, kind: PredictionType, recommendation: &str, minute: i64) -> Prediction {
    Prediction {
        id: Some(format!("p-{field_id}-{minute}")),
        field_id: field_id.into(),
        confidence: 0.87,
        result: PredictionResult {
            recommendation: recommendation.into(),
            details: vec!["Soil is balanced".into()],
            dosage: None,
        },
        model_used: "random-forest".into(),
        created_at: at(minute),
        prediction_type: kind,
    }
}

pub fn session(subject: &str, groups: &[&str]) -> Session {
    Session {
        access_token: "token".into(),
        expiry_epoch_millis: i64::MAX,
        subject_id: subject.into(),
        groups: groups.iter().map(|g| (*g).to_string()).collect(),
    }
}

// ============================================================================
// Backend
// ============================================================================

#[derive(Debug, Default)]
pub struct BackendState {
    pub down: bool,
    pub fields: Vec<Field>,
    pub alerts: Vec<Alert>,
    pub latest: HashMap<String, Reading>,
    pub readings: HashMap<String, Vec<Reading>>,
    pub sensors: HashMap<String, Vec<Sensor>>,
    pub predictions: HashMap<String, Vec<Prediction>>,
    pub failing: HashSet<&'static str>,
    pub calls: Vec<String>,
    pub crop_inputs: Vec<CropPredictionInput>,
    pub fertilizer_inputs: Vec<FertilizerPredictionInput>,
}

#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<BackendState>,
}

impl MemoryBackend {
    pub fn new(setup: impl FnOnce(&mut BackendState)) -> Self {
        let backend = Self::default();
        backend.update(setup);
        backend
    }

    pub fn update(&self, f: impl FnOnce(&mut BackendState)) {
        f(&mut self.state.lock().unwrap());
    }

    pub fn read<T>(&self, f: impl FnOnce(&BackendState) -> T) -> T {
        f(&self.state.lock().unwrap())
    }

    /// Operation names called so far, in order.
    pub fn ops(&self) -> Vec<String> {
        self.read(|s| {
            s.calls
                .iter()
                .map(|c| c.split(':').next().unwrap_or_default().to_string())
                .collect()
        })
    }

    pub fn calls(&self) -> Vec<String> {
        self.read(|s| s.calls.clone())
    }

    pub fn clear_calls(&self) {
        self.update(|s| s.calls.clear());
    }

    fn call(&self, op: &'static str, arg: &str) -> DashboardResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("{op}:{arg}"));
        if state.failing.contains(op) {
            return Err(DashboardError::Api {
                endpoint: format!("/{op}"),
                status: 500,
            });
        }
        Ok(())
    }
}

impl Backend for MemoryBackend {
    async fn check_health(&self) -> DashboardResult<()> {
        self.call("check_health", "")?;
        if self.read(|s| s.down) {
            return Err(DashboardError::Http("connection refused".into()));
        }
        Ok(())
    }

    async fn fields_by_user(&self, user_id: &str) -> DashboardResult<Vec<Field>> {
        self.call("fields_by_user", user_id)?;
        Ok(self.read(|s| s.fields.clone()))
    }

    async fn field_by_id(&self, field_id: &str) -> DashboardResult<Field> {
        self.call("field_by_id", field_id)?;
        self.read(|s| s.fields.iter().find(|f| f.id == field_id).cloned())
            .ok_or_else(|| DashboardError::Api {
                endpoint: format!("/fields/{field_id}"),
                status: 404,
            })
    }

    async fn readings_by_field(&self, field_id: &str) -> DashboardResult<Vec<Reading>> {
        self.call("readings_by_field", field_id)?;
        Ok(self.read(|s| s.readings.get(field_id).cloned().unwrap_or_default()))
    }

    async fn latest_reading(&self, field_id: &str) -> DashboardResult<Reading> {
        self.call("latest_reading", field_id)?;
        self.read(|s| s.latest.get(field_id).cloned())
            .ok_or_else(|| DashboardError::NotFound(format!("no reading for field {field_id}")))
    }

    async fn sensors_by_field(&self, field_id: &str) -> DashboardResult<Vec<Sensor>> {
        self.call("sensors_by_field", field_id)?;
        self.read(|s| s.sensors.get(field_id).cloned())
            .ok_or_else(|| DashboardError::Api {
                endpoint: format!("/sensors/field/{field_id}"),
                status: 404,
            })
    }

    async fn alerts_by_user(&self, user_id: &str) -> DashboardResult<Vec<Alert>> {
        self.call("alerts_by_user", user_id)?;
        Ok(self.read(|s| s.alerts.clone()))
    }

    async fn mark_alert_read(&self, alert_id: &str) -> DashboardResult<()> {
        self.call("mark_alert_read", alert_id)?;
        self.update(|s| {
            for a in s.alerts.iter_mut().filter(|a| a.id == alert_id) {
                a.is_read = true;
            }
        });
        Ok(())
    }

    async fn predictions_by_field(&self, field_id: &str) -> DashboardResult<Vec<Prediction>> {
        self.call("predictions_by_field", field_id)?;
        Ok(self.read(|s| s.predictions.get(field_id).cloned().unwrap_or_default()))
    }

    async fn predict_crop(
        &self,
        field_id: &str,
        input: &CropPredictionInput,
    ) -> DashboardResult<Prediction> {
        self.call("predict_crop", field_id)?;
        self.update(|s| s.crop_inputs.push(*input));
        Ok(prediction(field_id, PredictionType::Crop, "maize", 90))
    }

    async fn predict_fertilizer(
        &self,
        field_id: &str,
        input: &FertilizerPredictionInput,
    ) -> DashboardResult<Prediction> {
        self.call("predict_fertilizer", field_id)?;
        self.update(|s| s.fertilizer_inputs.push(input.clone()));
        Ok(prediction(field_id, PredictionType::Fertilizer, "Urea", 90))
    }
}

// ============================================================================
// View and notifier
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum ViewCall {
    Fields(Vec<String>, Option<String>),
    Reading(String, HealthStatus),
    NoData(String),
    Series(String, usize),
    Alerts(Vec<String>),
    Prediction(String),
    Connection(bool),
    Stats(DashboardStats),
    Toast(Toast),
}

#[derive(Debug, Default)]
pub struct RecordingView {
    calls: Mutex<Vec<ViewCall>>,
}

impl RecordingView {
    pub fn calls(&self) -> Vec<ViewCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn toasts(&self) -> Vec<Toast> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                ViewCall::Toast(t) => Some(t),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn push(&self, call: ViewCall) {
        self.calls.lock().unwrap().push(call);
    }
}

impl DashboardView for RecordingView {
    fn render_fields(&self, fields: &[Field], selected: Option<&str>) {
        self.push(ViewCall::Fields(
            fields.iter().map(|f| f.id.clone()).collect(),
            selected.map(str::to_string),
        ));
    }

    fn render_reading(&self, field: &Field, _reading: &Reading, status: HealthStatus) {
        self.push(ViewCall::Reading(field.id.clone(), status));
    }

    fn render_no_data(&self, field: &Field) {
        self.push(ViewCall::NoData(field.id.clone()));
    }

    fn render_series(&self, field_id: &str, readings: &[Reading]) {
        self.push(ViewCall::Series(field_id.to_string(), readings.len()));
    }

    fn render_alerts(&self, board: &AlertBoard) {
        self.push(ViewCall::Alerts(
            board.alerts().iter().map(|a| a.id.clone()).collect(),
        ));
    }

    fn render_prediction(&self, prediction: &Prediction) {
        self.push(ViewCall::Prediction(prediction.result.recommendation.clone()));
    }

    fn render_connection(&self, connected: bool) {
        self.push(ViewCall::Connection(connected));
    }

    fn render_stats(&self, stats: &DashboardStats) {
        self.push(ViewCall::Stats(*stats));
    }

    fn toast(&self, toast: Toast) {
        self.push(ViewCall::Toast(toast));
    }
}

#[derive(Debug, Default)]
pub struct RecordingNotifier {
    pub granted: bool,
    pub notifications: Mutex<Vec<DesktopNotification>>,
    pub sounds: AtomicUsize,
}

impl RecordingNotifier {
    pub fn granted() -> Self {
        Self {
            granted: true,
            ..Self::default()
        }
    }

    pub fn notifications(&self) -> Vec<DesktopNotification> {
        self.notifications.lock().unwrap().clone()
    }

    pub fn sounds(&self) -> usize {
        self.sounds.load(Ordering::SeqCst)
    }
}

impl Notifier for RecordingNotifier {
    fn permission_granted(&self) -> bool {
        self.granted
    }

    fn notify(&self, notification: &DesktopNotification) {
        self.notifications.lock().unwrap().push(notification.clone());
    }

    fn play_sound(&self) {
        self.sounds.fetch_add(1, Ordering::SeqCst);
    }
}
