//! Records exchanged with the soil monitoring backend.
//!
//! Field names follow the backend's camelCase JSON. The dashboard only ever
//! holds read-only copies of these; the backend owns them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Postal location of a field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Location {
    /// Human-readable address.
    pub address: String,
    /// Latitude in decimal degrees.
    pub latitude: Option<f64>,
    /// Longitude in decimal degrees.
    pub longitude: Option<f64>,
}

/// An agricultural zone owned by a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Field {
    /// Backend identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Where the field is.
    #[serde(default)]
    pub location: Location,
    /// Area in hectares.
    #[serde(default)]
    pub area: f64,
    /// Soil classification (e.g. "Loamy").
    #[serde(default)]
    pub soil_type: String,
    /// Crop currently planted, if any.
    #[serde(default)]
    pub current_crop: Option<String>,
}

/// The eight soil and weather metrics carried by every reading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorData {
    /// Air temperature in °C.
    pub temperature: f64,
    /// Relative humidity in %.
    pub humidity: f64,
    /// Volumetric soil moisture in %.
    pub soil_moisture: f64,
    /// Rainfall in mm.
    #[serde(default)]
    pub rainfall: f64,
    /// Nitrogen (N).
    pub nitrogen: f64,
    /// Phosphorus (P).
    pub phosphorus: f64,
    /// Potassium (K).
    pub potassium: f64,
    /// Soil acidity.
    #[serde(rename = "pH", alias = "ph")]
    pub ph: f64,
}

/// A timestamped set of metrics for one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reading {
    /// Field the reading belongs to.
    pub field_id: String,
    /// When the reading was taken.
    #[serde(with = "timestamp")]
    pub timestamp: DateTime<Utc>,
    /// Metric values.
    pub data: SensorData,
}

/// A physical sensor installed in a field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sensor {
    /// Backend identifier.
    pub id: String,
    /// Field the sensor is installed in.
    pub field_id: String,
    /// Hardware identifier.
    #[serde(default)]
    pub device_id: String,
    /// Kind of sensor.
    #[serde(default)]
    pub sensor_type: String,
    /// "active", "inactive" or "error".
    #[serde(default)]
    pub status: String,
}

/// Alert severity, ordered low < medium < high.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Urgent; desktop notifications stay until dismissed.
    High,
    /// Warning.
    Medium,
    /// Notice. Unknown severities map here.
    #[default]
    #[serde(other)]
    Low,
}

impl Severity {
    /// Numeric rank used for sorting (high = 3).
    #[must_use]
    pub fn rank(self) -> u8 {
        match self {
            Self::High => 3,
            Self::Medium => 2,
            Self::Low => 1,
        }
    }

    /// Desktop notification title for this severity.
    #[must_use]
    pub fn notification_title(self) -> &'static str {
        match self {
            Self::High => "Urgent Alert",
            Self::Medium => "Warning",
            Self::Low => "Notice",
        }
    }
}

impl PartialOrd for Severity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Severity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::High => write!(f, "high"),
            Self::Medium => write!(f, "medium"),
            Self::Low => write!(f, "low"),
        }
    }
}

/// A condition raised by the backend for a field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    /// Backend identifier.
    pub id: String,
    /// Field the alert concerns.
    pub field_id: String,
    /// How urgent it is.
    #[serde(default)]
    pub severity: Severity,
    /// Machine name such as `low_nitrogen`.
    #[serde(default)]
    pub alert_type: String,
    /// Human-readable text.
    #[serde(default)]
    pub message: String,
    /// Acknowledged by the user.
    #[serde(default)]
    pub is_read: bool,
    /// When the backend raised it.
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
}

impl Alert {
    /// Alert type with underscores replaced, for headings.
    #[must_use]
    pub fn title(&self) -> String {
        self.alert_type.replace('_', " ").to_uppercase()
    }
}

/// Which model produced a prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PredictionType {
    /// Crop recommendation.
    #[default]
    Crop,
    /// Fertilizer recommendation.
    Fertilizer,
}

/// Model output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PredictionResult {
    /// Recommended crop or fertilizer.
    pub recommendation: String,
    /// Supporting analysis lines.
    pub details: Vec<String>,
    /// Application rate, fertilizer only.
    pub dosage: Option<String>,
}

/// A crop or fertilizer recommendation for a field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prediction {
    /// Backend identifier, absent on some push frames.
    #[serde(default)]
    pub id: Option<String>,
    /// Field the prediction is for.
    pub field_id: String,
    /// Confidence in `[0, 1]`.
    #[serde(default)]
    pub confidence: f64,
    /// The recommendation itself.
    #[serde(default)]
    pub result: PredictionResult,
    /// Model name.
    #[serde(default)]
    pub model_used: String,
    /// When it was produced.
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    /// Crop or fertilizer.
    #[serde(default)]
    pub prediction_type: PredictionType,
}

impl Prediction {
    /// Confidence as a percentage with one decimal.
    #[must_use]
    pub fn confidence_percent(&self) -> f64 {
        (self.confidence.clamp(0.0, 1.0) * 1000.0).round() / 10.0
    }
}

/// Serde helper for backend timestamps.
///
/// Accepts RFC 3339, naive ISO-8601 (read as UTC), or epoch milliseconds.
pub mod timestamp {
    use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Millis(i64),
    }

    /// Parse a timestamp string in any of the accepted textual forms.
    #[must_use]
    pub fn parse(s: &str) -> Option<DateTime<Utc>> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Some(dt.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| Utc.from_utc_datetime(&naive))
    }

    pub fn serialize<S>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_rfc3339())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Raw::deserialize(deserializer)? {
            Raw::Text(s) => parse(&s)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {s}"))),
            Raw::Millis(ms) => Utc
                .timestamp_millis_opt(ms)
                .single()
                .ok_or_else(|| serde::de::Error::custom(format!("timestamp out of range: {ms}"))),
        }
    }

    /// Same as the parent module, for optional timestamps.
    pub mod option {
        use chrono::{DateTime, Utc};
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match value {
                Some(dt) => super::serialize(dt, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
        where
            D: Deserializer<'de>,
        {
            #[derive(Deserialize)]
            struct Wrapper(#[serde(with = "crate::model::timestamp")] DateTime<Utc>);

            let wrapped: Option<Wrapper> = Option::deserialize(deserializer)?;
            Ok(wrapped.map(|Wrapper(dt)| dt))
        }
    }
}
