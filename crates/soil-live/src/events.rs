//! Push event types and the wire frame codec.
//!
//! Inbound frames are JSON objects shaped `{ "type": "...", "payload": {...} }`.
//! The `type` selects the event kind; the body is `payload` when present and
//! the whole frame otherwise. Connection lifecycle events never come off the
//! wire, the connection manager synthesises them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use soil_common::error::DashboardError;
use soil_common::model::{timestamp, Alert, Prediction, Reading, SensorData};
use std::fmt;
use thiserror::Error;

/// Discriminant of [`PushEvent`], used as the subscription key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    /// `SENSOR_DATA` frame.
    SensorData,
    /// `ALERT` frame.
    Alert,
    /// `PREDICTION` frame.
    Prediction,
    /// Socket opened.
    Connected,
    /// Socket closed or failed to open.
    Disconnected,
    /// Transport error.
    Error,
}

impl EventKind {
    /// Every kind, in declaration order.
    pub const ALL: [EventKind; 6] = [
        Self::SensorData,
        Self::Alert,
        Self::Prediction,
        Self::Connected,
        Self::Disconnected,
        Self::Error,
    ];

    /// Name used on the wire and in logs.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::SensorData => "SENSOR_DATA",
            Self::Alert => "ALERT",
            Self::Prediction => "PREDICTION",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Error => "error",
        }
    }

    /// Kinds a frame may carry. Lifecycle names are not accepted from the wire.
    #[must_use]
    pub fn from_wire(name: &str) -> Option<Self> {
        match name {
            "SENSOR_DATA" => Some(Self::SensorData),
            "ALERT" => Some(Self::Alert),
            "PREDICTION" => Some(Self::Prediction),
            _ => None,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Body of a `SENSOR_DATA` frame: flat metrics plus the owning field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorPayload {
    /// Field the reading belongs to.
    pub field_id: String,
    /// Sample time; the receive time is used when absent.
    #[serde(default, with = "timestamp::option")]
    pub timestamp: Option<DateTime<Utc>>,
    /// °C.
    pub temperature: f64,
    /// %.
    pub humidity: f64,
    /// %.
    pub soil_moisture: f64,
    /// mm; missing or null means 0.
    #[serde(default)]
    pub rainfall: Option<f64>,
    /// N.
    pub nitrogen: f64,
    /// P.
    pub phosphorus: f64,
    /// K.
    pub potassium: f64,
    /// pH.
    #[serde(rename = "pH", alias = "ph")]
    pub ph: f64,
}

impl SensorPayload {
    /// Rebuild the REST-shaped reading.
    #[must_use]
    pub fn into_reading(self, received_at: DateTime<Utc>) -> Reading {
        Reading {
            field_id: self.field_id,
            timestamp: self.timestamp.unwrap_or(received_at),
            data: SensorData {
                temperature: self.temperature,
                humidity: self.humidity,
                soil_moisture: self.soil_moisture,
                rainfall: self.rainfall.unwrap_or(0.0),
                nitrogen: self.nitrogen,
                phosphorus: self.phosphorus,
                potassium: self.potassium,
                ph: self.ph,
            },
        }
    }
}

/// Everything a subscriber can observe.
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    /// Live reading for a field.
    SensorData(SensorPayload),
    /// Newly raised alert.
    Alert(Alert),
    /// Fresh crop or fertilizer recommendation.
    Prediction(Prediction),
    /// Socket opened.
    Connected,
    /// Socket closed or failed to open.
    Disconnected,
    /// Connect or read failure, always [`DashboardError::Transport`].
    Error(DashboardError),
}

impl PushEvent {
    /// Subscription key for this event.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::SensorData(_) => EventKind::SensorData,
            Self::Alert(_) => EventKind::Alert,
            Self::Prediction(_) => EventKind::Prediction,
            Self::Connected => EventKind::Connected,
            Self::Disconnected => EventKind::Disconnected,
            Self::Error(_) => EventKind::Error,
        }
    }
}

/// Why a frame could not be turned into an event.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Not JSON at all.
    #[error("frame is not valid JSON: {0}")]
    Json(#[source] serde_json::Error),

    /// Recognised type, but the body has the wrong shape.
    #[error("malformed {kind} payload: {source}")]
    Payload {
        /// Declared kind.
        kind: EventKind,
        /// Field-level failure.
        #[source]
        source: serde_json::Error,
    },
}

/// Decode one text frame.
///
/// Returns `Ok(None)` for frames without a recognised `type`; those are
/// dropped silently.
///
/// # Errors
///
/// Returns [`FrameError`] when the text is not JSON or the body does not
/// match the declared type.
pub fn decode_frame(text: &str) -> Result<Option<PushEvent>, FrameError> {
    let mut frame: Value = serde_json::from_str(text).map_err(FrameError::Json)?;

    let Some(kind) = frame
        .get("type")
        .and_then(Value::as_str)
        .and_then(EventKind::from_wire)
    else {
        return Ok(None);
    };

    let body = match frame.get_mut("payload").map(Value::take) {
        Some(payload) if !payload.is_null() => payload,
        _ => frame,
    };

    let payload_error = |source| FrameError::Payload { kind, source };
    let event = match kind {
        EventKind::SensorData => {
            PushEvent::SensorData(serde_json::from_value(body).map_err(payload_error)?)
        }
        EventKind::Alert => PushEvent::Alert(serde_json::from_value(body).map_err(payload_error)?),
        EventKind::Prediction => {
            PushEvent::Prediction(serde_json::from_value(body).map_err(payload_error)?)
        }
        EventKind::Connected | EventKind::Disconnected | EventKind::Error => return Ok(None),
    };
    Ok(Some(event))
}

/// Encode an event as a wire frame. Lifecycle events have no wire form.
///
/// # Errors
///
/// Returns an error if the payload cannot be serialized.
pub fn encode_frame(event: &PushEvent) -> Result<Option<String>, serde_json::Error> {
    let payload = match event {
        PushEvent::SensorData(p) => serde_json::to_value(p)?,
        PushEvent::Alert(a) => serde_json::to_value(a)?,
        PushEvent::Prediction(p) => serde_json::to_value(p)?,
        PushEvent::Connected | PushEvent::Disconnected | PushEvent::Error(_) => return Ok(None),
    };
    let frame = serde_json::json!({ "type": event.kind().name(), "payload": payload });
    serde_json::to_string(&frame).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use soil_common::model::Severity;

    #[test]
    fn test_sensor_frame_defaults_rainfall() {
        let text = r#"{"type":"SENSOR_DATA","payload":{"fieldId":"f1","temperature":21.0,
            "humidity":55.0,"soilMoisture":30.0,"nitrogen":40.0,"phosphorus":20.0,
            "potassium":100.0,"pH":6.4}}"#;

        let Some(PushEvent::SensorData(payload)) = decode_frame(text).unwrap() else {
            panic!("expected sensor data");
        };
        let now = Utc::now();
        let reading = payload.into_reading(now);
        assert_eq!(reading.field_id, "f1");
        assert_eq!(reading.data.rainfall, 0.0);
        assert_eq!(reading.timestamp, now);
    }

    #[test]
    fn test_null_rainfall_is_zero() {
        let text = r#"{"type":"SENSOR_DATA","payload":{"fieldId":"f1","temperature":21.0,
            "humidity":55.0,"soilMoisture":30.0,"rainfall":null,"nitrogen":40.0,
            "phosphorus":20.0,"potassium":100.0,"pH":6.4,"timestamp":"2024-05-01T10:00:00Z"}}"#;
        let Some(PushEvent::SensorData(payload)) = decode_frame(text).unwrap() else {
            panic!("expected sensor data");
        };
        let reading = payload.into_reading(Utc::now());
        assert_eq!(reading.data.rainfall, 0.0);
        assert_eq!(reading.timestamp.to_rfc3339(), "2024-05-01T10:00:00+00:00");
    }

    #[test]
    fn test_frame_without_payload_uses_whole_frame() {
        let text = r#"{"type":"ALERT","id":"a1","fieldId":"f1","severity":"high",
            "message":"Nitrogen low","isRead":false,"createdAt":"2024-05-01T10:00:00Z"}"#;
        let Some(PushEvent::Alert(alert)) = decode_frame(text).unwrap() else {
            panic!("expected alert");
        };
        assert_eq!(alert.id, "a1");
        assert_eq!(alert.severity, Severity::High);
    }

    #[test]
    fn test_unrecognised_types_dropped() {
        assert!(decode_frame(r#"{"type":"HEARTBEAT"}"#).unwrap().is_none());
        assert!(decode_frame(r#"{"payload":{}}"#).unwrap().is_none());
        assert!(decode_frame(r#"{"type":"connected"}"#).unwrap().is_none());
        assert!(decode_frame(r"[1,2,3]").unwrap().is_none());
    }

    #[test]
    fn test_malformed_frames() {
        assert!(matches!(decode_frame("{not json"), Err(FrameError::Json(_))));

        let non_numeric = r#"{"type":"SENSOR_DATA","payload":{"fieldId":"f1",
            "temperature":"hot","humidity":55.0,"soilMoisture":30.0,"nitrogen":40.0,
            "phosphorus":20.0,"potassium":100.0,"pH":6.4}}"#;
        assert!(matches!(
            decode_frame(non_numeric),
            Err(FrameError::Payload {
                kind: EventKind::SensorData,
                ..
            })
        ));

        let missing_field = r#"{"type":"SENSOR_DATA","payload":{"temperature":21.0}}"#;
        assert!(decode_frame(missing_field).is_err());
    }

    #[test]
    fn test_encode_matches_decode_shape() {
        let alert: Alert = serde_json::from_str(
            r#"{"id":"a9","fieldId":"f2","severity":"medium","createdAt":"2024-05-01T10:00:00Z"}"#,
        )
        .unwrap();
        let text = encode_frame(&PushEvent::Alert(alert.clone())).unwrap().unwrap();
        assert!(text.contains(r#""type":"ALERT""#));
        assert_eq!(decode_frame(&text).unwrap(), Some(PushEvent::Alert(alert)));

        assert!(encode_frame(&PushEvent::Connected).unwrap().is_none());
    }
}
