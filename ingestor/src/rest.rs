use crate::errors::{IngestError, QueryError, StoreError};
use crate::model::{CalibrationRecord, WindowResponse, WriteOutcome};
use crate::mqtt::with_deadline;
use crate::pipeline::IngestPipeline;
use crate::query::QueryService;
use crate::shadow::{CalibrationDocument, ShadowDocument};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

/// Button id used when a calibration read names none.
const DEFAULT_BUTTON_ID: i64 = 1;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: IngestPipeline,
    pub queries: QueryService,
    pub store_timeout: Duration,
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    end: Option<i64>,
    window: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub outcome: WriteOutcome,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/devices/:device_id/history", get(get_history))
        .route(
            "/api/v1/calibration",
            get(get_default_calibration).post(post_calibration),
        )
        .route("/api/v1/calibration/:button_id", get(get_calibration))
        .route("/api/v1/shadow", post(post_shadow))
        .with_state(state)
}

async fn get_history(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<WindowResponse>, AppError> {
    let end = params.end.unwrap_or_else(|| Utc::now().timestamp());
    let window = params.window.unwrap_or(state.queries.default_window());

    let data = query_deadline(
        state.store_timeout,
        state.queries.query_window(&device_id, end, window),
    )
    .await?;

    Ok(Json(WindowResponse { data }))
}

async fn get_default_calibration(
    state: State<AppState>,
) -> Result<(StatusCode, Json<Option<CalibrationRecord>>), AppError> {
    get_calibration(state, Path(DEFAULT_BUTTON_ID)).await
}

async fn get_calibration(
    State(state): State<AppState>,
    Path(button_id): Path<i64>,
) -> Result<(StatusCode, Json<Option<CalibrationRecord>>), AppError> {
    let record = query_deadline(state.store_timeout, state.queries.get_calibration(button_id)).await?;
    let status = if record.is_some() {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    };
    Ok((status, Json(record)))
}

async fn post_shadow(
    State(state): State<AppState>,
    Json(document): Json<ShadowDocument>,
) -> Result<Json<IngestResponse>, AppError> {
    let outcome = with_deadline(
        state.store_timeout,
        state.pipeline.ingest(document.into_transition()),
    )
    .await?;
    Ok(Json(IngestResponse { outcome }))
}

async fn post_calibration(
    State(state): State<AppState>,
    Json(document): Json<CalibrationDocument>,
) -> Result<Json<IngestResponse>, AppError> {
    let outcome = with_deadline(
        state.store_timeout,
        state.pipeline.ingest_calibration(document.into_update()),
    )
    .await?;
    Ok(Json(IngestResponse { outcome }))
}

async fn query_deadline<T, F>(deadline: Duration, call: F) -> Result<T, QueryError>
where
    F: Future<Output = Result<T, QueryError>>,
{
    tokio::time::timeout(deadline, call).await.unwrap_or_else(|_| {
        Err(QueryError::Store(StoreError::Unavailable(format!(
            "no response within {}ms",
            deadline.as_millis()
        ))))
    })
}

enum AppError {
    Ingest(IngestError),
    Query(QueryError),
}

impl From<IngestError> for AppError {
    fn from(err: IngestError) -> Self {
        Self::Ingest(err)
    }
}

impl From<QueryError> for AppError {
    fn from(err: QueryError) -> Self {
        Self::Query(err)
    }
}

fn store_status(err: &StoreError) -> StatusCode {
    if err.is_transient() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::Ingest(e) => {
                let status = match &e {
                    IngestError::SchemaMismatch(_) | IngestError::InvalidTimestamp(_) => {
                        StatusCode::BAD_REQUEST
                    }
                    IngestError::Store(s) => store_status(s),
                };
                (status, e.to_string())
            }
            AppError::Query(e) => {
                let status = match &e {
                    QueryError::InvalidWindow { .. } => StatusCode::BAD_REQUEST,
                    QueryError::Store(s) => store_status(s),
                    QueryError::Corrupt { .. } => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, e.to_string())
            }
        };

        if status.is_server_error() {
            error!("API error: {}", message);
        } else {
            warn!("API request rejected: {}", message);
        }
        (status, message).into_response()
    }
}
