//! HTTP surface: liveness, health and CSV scoring.

use crate::error::RiskError;
use crate::pipeline::{PredictionReport, ScoringPipeline};
use axum::extract::multipart::MultipartRejection;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use log::{error, info};
use serde_json::json;
use std::sync::Arc;

/// Every request-time failure becomes a 400 with a `detail` string.
#[derive(Debug)]
pub struct ApiError(RiskError);

impl From<RiskError> for ApiError {
    fn from(e: RiskError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!("request failed: {}", self.0);
        let detail = match &self.0 {
            RiskError::NotCsv { .. } => self.0.to_string(),
            other => format!("processing failed: {}", other),
        };
        (StatusCode::BAD_REQUEST, Json(json!({ "detail": detail }))).into_response()
    }
}

pub fn build_router(pipeline: Arc<ScoringPipeline>, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/predict", post(predict_handler))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(pipeline)
}

async fn root_handler() -> Json<serde_json::Value> {
    Json(json!({ "message": "Heart attack risk predictor is running" }))
}

async fn health_handler(State(pipeline): State<Arc<ScoringPipeline>>) -> Json<serde_json::Value> {
    let ready = pipeline.preprocessor().is_fitted() && pipeline.classifier().is_fitted();
    Json(json!({ "status": "healthy", "model_ready": ready }))
}

async fn predict_handler(
    State(pipeline): State<Arc<ScoringPipeline>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<PredictionReport>, ApiError> {
    // a body that is not multipart/form-data still answers with a `detail`
    let mut multipart = multipart.map_err(|e| RiskError::Upload {
        message: e.body_text(),
    })?;
    let upload = |e: axum::extract::multipart::MultipartError| RiskError::Upload {
        message: e.to_string(),
    };

    while let Some(field) = multipart.next_field().await.map_err(upload)? {
        let Some(file_name) = field.file_name().map(str::to_string) else {
            continue;
        };
        if !file_name.ends_with(".csv") {
            return Err(RiskError::NotCsv { file_name }.into());
        }
        let data = field.bytes().await.map_err(upload)?;
        info!("received file {} ({} bytes)", file_name, data.len());

        let report = tokio::task::spawn_blocking(move || pipeline.score_csv(&data))
            .await
            .map_err(|e| RiskError::Upload {
                message: e.to_string(),
            })??;
        return Ok(Json(report));
    }

    Err(RiskError::Upload {
        message: "no file uploaded".to_string(),
    }
    .into())
}
