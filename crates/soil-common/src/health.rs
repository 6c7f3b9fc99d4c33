//! Range-based health classification of sensor readings.
//!
//! A reading is "Normal" when every checked metric sits inside its inclusive
//! range and "Warning" otherwise. Soil moisture and rainfall are displayed
//! but never checked.

use crate::model::SensorData;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Inclusive `[min, max]` range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HealthRange {
    /// Lower bound (inclusive).
    pub min: f64,
    /// Upper bound (inclusive).
    pub max: f64,
}

impl HealthRange {
    /// Create a new range.
    #[must_use]
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Whether `value` lies inside the range. NaN never does.
    #[must_use]
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Metrics subject to range checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Metric {
    /// Air temperature.
    Temperature,
    /// Relative humidity.
    Humidity,
    /// Nitrogen.
    Nitrogen,
    /// Phosphorus.
    Phosphorus,
    /// Potassium.
    Potassium,
    /// Soil pH.
    Ph,
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Temperature => "temperature",
            Self::Humidity => "humidity",
            Self::Nitrogen => "nitrogen",
            Self::Phosphorus => "phosphorus",
            Self::Potassium => "potassium",
            Self::Ph => "pH",
        };
        f.write_str(name)
    }
}

/// Verdict for one reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    /// All checked metrics in range.
    Normal,
    /// At least one metric out of range.
    Warning,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => write!(f, "Normal"),
            Self::Warning => write!(f, "Warning"),
        }
    }
}

/// Per-metric ranges used for classification.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthThresholds {
    /// °C.
    pub temperature: HealthRange,
    /// %.
    pub humidity: HealthRange,
    /// N.
    pub nitrogen: HealthRange,
    /// P.
    pub phosphorus: HealthRange,
    /// K.
    pub potassium: HealthRange,
    /// pH.
    pub ph: HealthRange,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            temperature: HealthRange::new(15.0, 35.0),
            humidity: HealthRange::new(30.0, 85.0),
            nitrogen: HealthRange::new(20.0, 100.0),
            phosphorus: HealthRange::new(10.0, 80.0),
            potassium: HealthRange::new(50.0, 200.0),
            ph: HealthRange::new(5.5, 7.5),
        }
    }
}

impl HealthThresholds {
    /// Metrics of `data` that fall outside their range, in check order.
    #[must_use]
    pub fn violations(&self, data: &SensorData) -> Vec<Metric> {
        [
            (Metric::Temperature, self.temperature, data.temperature),
            (Metric::Humidity, self.humidity, data.humidity),
            (Metric::Nitrogen, self.nitrogen, data.nitrogen),
            (Metric::Phosphorus, self.phosphorus, data.phosphorus),
            (Metric::Potassium, self.potassium, data.potassium),
            (Metric::Ph, self.ph, data.ph),
        ]
        .into_iter()
        .filter(|(_, range, value)| !range.contains(*value))
        .map(|(metric, _, _)| metric)
        .collect()
    }

    /// Classify a reading.
    #[must_use]
    pub fn classify(&self, data: &SensorData) -> HealthStatus {
        self.assess(data).0
    }

    /// Verdict together with the metrics that caused it.
    #[must_use]
    pub fn assess(&self, data: &SensorData) -> (HealthStatus, Vec<Metric>) {
        let violations = self.violations(data);
        let status = if violations.is_empty() {
            HealthStatus::Normal
        } else {
            HealthStatus::Warning
        };
        (status, violations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn healthy() -> SensorData {
        SensorData {
            temperature: 24.0,
            humidity: 60.0,
            soil_moisture: 35.0,
            rainfall: 0.0,
            nitrogen: 50.0,
            phosphorus: 40.0,
            potassium: 120.0,
            ph: 6.5,
        }
    }

    #[test]
    fn test_healthy_reading_is_normal() {
        let t = HealthThresholds::default();
        assert_eq!(t.classify(&healthy()), HealthStatus::Normal);
    }

    #[test]
    fn test_assess_lists_what_failed() {
        let t = HealthThresholds::default();
        assert_eq!(t.assess(&healthy()), (HealthStatus::Normal, Vec::new()));

        let mut data = healthy();
        data.ph = 8.2;
        data.nitrogen = 12.0;
        let (status, violations) = t.assess(&data);
        assert_eq!(status, HealthStatus::Warning);
        assert_eq!(violations, vec![Metric::Nitrogen, Metric::Ph]);
        assert_eq!(t.classify(&data), status);
    }

    #[test]
    fn test_boundaries_are_inclusive() {
        let t = HealthThresholds::default();
        let mut low = healthy();
        low.temperature = 15.0;
        low.humidity = 30.0;
        low.nitrogen = 20.0;
        low.phosphorus = 10.0;
        low.potassium = 50.0;
        low.ph = 5.5;
        assert_eq!(t.classify(&low), HealthStatus::Normal);

        let mut high = healthy();
        high.temperature = 35.0;
        high.humidity = 85.0;
        high.nitrogen = 100.0;
        high.phosphorus = 80.0;
        high.potassium = 200.0;
        high.ph = 7.5;
        assert_eq!(t.classify(&high), HealthStatus::Normal);
    }

    #[test]
    fn test_any_single_metric_out_of_range_warns() {
        let t = HealthThresholds::default();
        let cases: [(Metric, fn(&mut SensorData)); 6] = [
            (Metric::Temperature, |d| d.temperature = 35.1),
            (Metric::Humidity, |d| d.humidity = 29.9),
            (Metric::Nitrogen, |d| d.nitrogen = 100.5),
            (Metric::Phosphorus, |d| d.phosphorus = 9.0),
            (Metric::Potassium, |d| d.potassium = 201.0),
            (Metric::Ph, |d| d.ph = 7.51),
        ];

        for (metric, mutate) in cases {
            let mut data = healthy();
            mutate(&mut data);
            assert_eq!(t.classify(&data), HealthStatus::Warning, "{metric}");
            assert_eq!(t.violations(&data), vec![metric]);
        }
    }

    #[test]
    fn test_unchecked_metrics_ignored() {
        let t = HealthThresholds::default();
        let mut data = healthy();
        data.soil_moisture = 100.0;
        data.rainfall = 500.0;
        assert_eq!(t.classify(&data), HealthStatus::Normal);
    }

    #[test]
    fn test_nan_is_warning() {
        let t = HealthThresholds::default();
        let mut data = healthy();
        data.ph = f64::NAN;
        assert_eq!(t.classify(&data), HealthStatus::Warning);
    }
}
