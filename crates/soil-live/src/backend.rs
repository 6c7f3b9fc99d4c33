//! REST collaborator.
//!
//! [`Backend`] is the seam the reconciler talks through; [`HttpBackend`] is
//! the reqwest implementation against the soil monitoring API. Calls either
//! succeed or fail, nothing here retries.

use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use soil_common::config::ApiConfig;
use soil_common::error::{DashboardError, DashboardResult};
use soil_common::model::{Alert, Field, Prediction, Reading, SensorData, Sensor};
use std::future::Future;
use tracing::{debug, warn};

/// Crop model input built from a reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CropPredictionInput {
    /// Nitrogen.
    pub n: f64,
    /// Phosphorus.
    pub p: f64,
    /// Potassium.
    pub k: f64,
    /// °C.
    pub temperature: f64,
    /// %.
    pub humidity: f64,
    /// Soil pH.
    pub ph: f64,
    /// mm.
    pub rainfall: f64,
}

impl From<&SensorData> for CropPredictionInput {
    fn from(data: &SensorData) -> Self {
        Self {
            n: data.nitrogen,
            p: data.phosphorus,
            k: data.potassium,
            temperature: data.temperature,
            humidity: data.humidity,
            ph: data.ph,
            rainfall: data.rainfall,
        }
    }
}

/// Fertilizer model input built from a reading and its field.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FertilizerPredictionInput {
    /// °C.
    pub temperature: f64,
    /// %.
    pub humidity: f64,
    /// %.
    pub soil_moisture: f64,
    /// Soil classification of the field.
    pub soil_type: String,
    /// Crop planted; `rice` when the field has none.
    pub crop_type: String,
    /// Nitrogen.
    pub nitrogen: f64,
    /// Phosphorus.
    pub phosphorus: f64,
    /// Potassium.
    pub potassium: f64,
}

impl FertilizerPredictionInput {
    /// Crop assumed when a field has nothing planted.
    pub const DEFAULT_CROP: &'static str = "rice";

    /// Combine a reading with the field it came from.
    #[must_use]
    pub fn new(data: &SensorData, field: &Field) -> Self {
        Self {
            temperature: data.temperature,
            humidity: data.humidity,
            soil_moisture: data.soil_moisture,
            soil_type: field.soil_type.clone(),
            crop_type: field
                .current_crop
                .clone()
                .filter(|c| !c.is_empty())
                .unwrap_or_else(|| Self::DEFAULT_CROP.to_string()),
            nitrogen: data.nitrogen,
            phosphorus: data.phosphorus,
            potassium: data.potassium,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PredictionRequest<'a, T> {
    field_id: &'a str,
    input_data: &'a T,
}

/// Operations the dashboard consumes from the REST API.
pub trait Backend: Send + Sync {
    /// `GET /test`
    fn check_health(&self) -> impl Future<Output = DashboardResult<()>> + Send;

    /// `GET /fields/user/{user_id}`
    fn fields_by_user(
        &self,
        user_id: &str,
    ) -> impl Future<Output = DashboardResult<Vec<Field>>> + Send;

    /// `GET /fields/{field_id}`
    fn field_by_id(&self, field_id: &str) -> impl Future<Output = DashboardResult<Field>> + Send;

    /// `GET /readings/field/{field_id}`
    fn readings_by_field(
        &self,
        field_id: &str,
    ) -> impl Future<Output = DashboardResult<Vec<Reading>>> + Send;

    /// `GET /readings/field/{field_id}/latest`
    fn latest_reading(
        &self,
        field_id: &str,
    ) -> impl Future<Output = DashboardResult<Reading>> + Send;

    /// `GET /sensors/field/{field_id}`
    fn sensors_by_field(
        &self,
        field_id: &str,
    ) -> impl Future<Output = DashboardResult<Vec<Sensor>>> + Send;

    /// `GET /alerts/user/{user_id}`
    fn alerts_by_user(
        &self,
        user_id: &str,
    ) -> impl Future<Output = DashboardResult<Vec<Alert>>> + Send;

    /// `PUT /alerts/{alert_id}/read`
    fn mark_alert_read(&self, alert_id: &str) -> impl Future<Output = DashboardResult<()>> + Send;

    /// `GET /predictions/field/{field_id}`
    fn predictions_by_field(
        &self,
        field_id: &str,
    ) -> impl Future<Output = DashboardResult<Vec<Prediction>>> + Send;

    /// `POST /predictions/crop`
    fn predict_crop(
        &self,
        field_id: &str,
        input: &CropPredictionInput,
    ) -> impl Future<Output = DashboardResult<Prediction>> + Send;

    /// `POST /predictions/fertilizer`
    fn predict_fertilizer(
        &self,
        field_id: &str,
        input: &FertilizerPredictionInput,
    ) -> impl Future<Output = DashboardResult<Prediction>> + Send;
}

/// reqwest client for the soil monitoring API.
///
/// Cheap to clone, the inner [`reqwest::Client`] is reference counted.
#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
    access_token: String,
}

impl std::fmt::Debug for HttpBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpBackend")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl HttpBackend {
    /// Build a client for `config.base_url` sending `access_token` as bearer.
    ///
    /// # Errors
    ///
    /// Returns [`DashboardError::Config`] if the HTTP client cannot be built.
    pub fn new(config: &ApiConfig, access_token: impl Into<String>) -> DashboardResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| DashboardError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            access_token: access_token.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let req = self.client.request(method, self.url(path));
        if self.access_token.is_empty() {
            req
        } else {
            req.bearer_auth(&self.access_token)
        }
    }

    async fn send(&self, req: RequestBuilder, path: &str) -> DashboardResult<reqwest::Response> {
        let resp = req.send().await.map_err(|e| {
            warn!(endpoint = path, error = %e, "Request failed");
            DashboardError::Http(format!("{path}: {e}"))
        })?;

        let status = resp.status();
        if !status.is_success() {
            warn!(endpoint = path, status = status.as_u16(), "API returned error status");
            return Err(DashboardError::Api {
                endpoint: path.to_string(),
                status: status.as_u16(),
            });
        }
        debug!(endpoint = path, status = status.as_u16(), "Request ok");
        Ok(resp)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> DashboardResult<T> {
        let resp = self.send(self.request(Method::GET, path), path).await?;
        resp.json()
            .await
            .map_err(|e| DashboardError::Decode(format!("{path}: {e}")))
    }

    async fn post_json<B, T>(&self, path: &str, body: &B) -> DashboardResult<T>
    where
        B: Serialize + Sync + ?Sized,
        T: DeserializeOwned,
    {
        let resp = self
            .send(self.request(Method::POST, path).json(body), path)
            .await?;
        resp.json()
            .await
            .map_err(|e| DashboardError::Decode(format!("{path}: {e}")))
    }
}

impl Backend for HttpBackend {
    async fn check_health(&self) -> DashboardResult<()> {
        self.send(self.request(Method::GET, "/test"), "/test")
            .await
            .map(|_| ())
    }

    async fn fields_by_user(&self, user_id: &str) -> DashboardResult<Vec<Field>> {
        self.get_json(&format!("/fields/user/{user_id}")).await
    }

    async fn field_by_id(&self, field_id: &str) -> DashboardResult<Field> {
        self.get_json(&format!("/fields/{field_id}")).await
    }

    async fn readings_by_field(&self, field_id: &str) -> DashboardResult<Vec<Reading>> {
        self.get_json(&format!("/readings/field/{field_id}")).await
    }

    async fn latest_reading(&self, field_id: &str) -> DashboardResult<Reading> {
        let path = format!("/readings/field/{field_id}/latest");
        // The API answers 200 with `null` when a field has no data yet.
        let reading: Option<Reading> = self.get_json(&path).await?;
        reading.ok_or_else(|| DashboardError::NotFound(format!("no reading for field {field_id}")))
    }

    async fn sensors_by_field(&self, field_id: &str) -> DashboardResult<Vec<Sensor>> {
        self.get_json(&format!("/sensors/field/{field_id}")).await
    }

    async fn alerts_by_user(&self, user_id: &str) -> DashboardResult<Vec<Alert>> {
        self.get_json(&format!("/alerts/user/{user_id}")).await
    }

    async fn mark_alert_read(&self, alert_id: &str) -> DashboardResult<()> {
        let path = format!("/alerts/{alert_id}/read");
        let req = self
            .request(Method::PUT, &path)
            .json(&serde_json::json!({}));
        self.send(req, &path).await.map(|_| ())
    }

    async fn predictions_by_field(&self, field_id: &str) -> DashboardResult<Vec<Prediction>> {
        self.get_json(&format!("/predictions/field/{field_id}")).await
    }

    async fn predict_crop(
        &self,
        field_id: &str,
        input: &CropPredictionInput,
    ) -> DashboardResult<Prediction> {
        let body = PredictionRequest {
            field_id,
            input_data: input,
        };
        self.post_json("/predictions/crop", &body).await
    }

    async fn predict_fertilizer(
        &self,
        field_id: &str,
        input: &FertilizerPredictionInput,
    ) -> DashboardResult<Prediction> {
        let body = PredictionRequest {
            field_id,
            input_data: input,
        };
        self.post_json("/predictions/fertilizer", &body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data() -> SensorData {
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
    fn test_crop_request_body() {
        let input = CropPredictionInput::from(&data());
        let body = serde_json::to_value(PredictionRequest {
            field_id: "f1",
            input_data: &input,
        })
        .unwrap();
        assert_eq!(body["fieldId"], "f1");
        assert_eq!(
            body["inputData"],
            json!({"n": 50.0, "p": 40.0, "k": 120.0, "temperature": 24.0,
                   "humidity": 60.0, "ph": 6.5, "rainfall": 0.0})
        );
    }

    #[test]
    fn test_fertilizer_defaults_crop() {
        let mut field: Field = serde_json::from_value(json!({
            "id": "f1", "name": "North", "soilType": "Clay"
        }))
        .unwrap();
        let input = FertilizerPredictionInput::new(&data(), &field);
        assert_eq!(input.crop_type, "rice");
        assert_eq!(input.soil_type, "Clay");

        field.current_crop = Some("maize".into());
        let value = serde_json::to_value(FertilizerPredictionInput::new(&data(), &field)).unwrap();
        assert_eq!(value["cropType"], "maize");
        assert_eq!(value["soilMoisture"], 35.0);
    }

    #[test]
    fn test_url_joins_base() {
        let config = ApiConfig {
            base_url: "http://localhost:8080/api/".into(),
            ..ApiConfig::default()
        };
        let backend = HttpBackend::new(&config, "t").unwrap();
        assert_eq!(backend.url("/test"), "http://localhost:8080/api/test");
    }
}
