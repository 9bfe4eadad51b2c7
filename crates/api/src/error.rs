use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use solarlink_domain::ports::store::StoreError;
use solarlink_domain::reading::now_epoch_secs;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("telemetry store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("no telemetry available")]
    NoData,
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::StoreUnavailable(err.to_string())
    }
}

#[derive(Serialize)]
struct ErrorBody {
    status: &'static str,
    message: String,
    timestamp: f64,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let body = ErrorBody {
            status: "error",
            message: self.to_string(),
            timestamp: now_epoch_secs(),
        };
        (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
    }
}
