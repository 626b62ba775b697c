//! HTTP surface of the gateway

use axum::{
    extract::State,
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use hanzo_pii_guard::{
    AuditStatus, Entity, GenerationErrorKind, GuardError, GuardOutcome, GuardPipeline,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Header reporting what happened to the audit record
pub const AUDIT_STATUS_HEADER: &str = "x-audit-status";

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<GuardPipeline>,
}

/// Build the gateway router
pub fn router(pipeline: Arc<GuardPipeline>) -> Router {
    Router::new()
        .route("/", get(health_handler))
        .route("/health", get(health_handler))
        .route("/detect_anomalies", post(detect_anomalies_handler))
        .route("/detect_anomalies/", post(detect_anomalies_handler))
        .route("/detect", post(detect_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { pipeline })
}

// ─────────────────────────────────────────────────────────────────────────────
// API Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct DetectAnomaliesRequest {
    text: String,
}

/// Shape sent by the browser client
#[derive(Deserialize)]
struct DetectRequest {
    prompt: String,
}

#[derive(Serialize, Deserialize, Debug)]
struct SensitiveItem {
    entity: String,
    value: String,
}

impl From<Entity> for SensitiveItem {
    fn from(entity: Entity) -> Self {
        Self {
            entity: entity.category.as_str().to_string(),
            value: entity.surface_text,
        }
    }
}

#[derive(Serialize, Deserialize, Debug)]
struct DetectResponse {
    generated_text: String,
    anomaly: Option<String>,
    warning: Option<String>,
    sensitive_data: Vec<SensitiveItem>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    audit_warning: Option<String>,
}

impl From<GuardOutcome> for DetectResponse {
    fn from(outcome: GuardOutcome) -> Self {
        let audit_warning = match outcome.audit {
            AuditStatus::Lost { .. } => {
                Some("This anomaly could not be written to the audit log".to_string())
            }
            _ => None,
        };
        let response = outcome.response;

        Self {
            generated_text: response.generated_text,
            anomaly: response.anomaly_category.map(|c| c.as_str().to_string()),
            warning: response.warning_message,
            sensitive_data: response
                .sensitive_data
                .into_iter()
                .map(SensitiveItem::from)
                .collect(),
            audit_warning,
        }
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    store: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    message: String,
    r#type: String,
    code: String,
}

fn error_body(status: StatusCode, message: String, kind: &str, code: &str) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: ErrorDetail {
                message,
                r#type: kind.to_string(),
                code: code.to_string(),
            },
        }),
    )
        .into_response()
}

/// Map a pipeline failure to a status and a body that leaks no internals
fn error_response(err: &GuardError) -> Response {
    match err {
        GuardError::Validation(msg) => error_body(
            StatusCode::BAD_REQUEST,
            msg.clone(),
            "invalid_request_error",
            "validation_error",
        ),
        GuardError::Scan(_) => error_body(
            StatusCode::SERVICE_UNAVAILABLE,
            "Entity recognition service unavailable".to_string(),
            "server_error",
            "scanner_unavailable",
        ),
        GuardError::Generation(e) if e.kind == GenerationErrorKind::Quota => error_body(
            StatusCode::TOO_MANY_REQUESTS,
            "Generation quota exhausted".to_string(),
            "server_error",
            "generation_quota",
        ),
        GuardError::Generation(e) if e.is_retryable() => error_body(
            StatusCode::SERVICE_UNAVAILABLE,
            "Generation service unavailable, try again later".to_string(),
            "server_error",
            "generation_unavailable",
        ),
        GuardError::Generation(_) => error_body(
            StatusCode::BAD_GATEWAY,
            "Generation service rejected the request".to_string(),
            "server_error",
            "generation_failed",
        ),
        _ => error_body(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal server error".to_string(),
            "server_error",
            "internal_error",
        ),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        store: state.pipeline.store_kind().to_string(),
    })
}

async fn detect_anomalies_handler(
    State(state): State<AppState>,
    Json(request): Json<DetectAnomaliesRequest>,
) -> Response {
    screen(&state, &request.text).await
}

async fn detect_handler(
    State(state): State<AppState>,
    Json(request): Json<DetectRequest>,
) -> Response {
    screen(&state, &request.prompt).await
}

/// Dropping this future on client disconnect aborts the in-flight call;
/// nothing is recorded for an abandoned request.
async fn screen(state: &AppState, text: &str) -> Response {
    let request_id = Uuid::new_v4();
    info!(%request_id, prompt_chars = text.chars().count(), "Screening request");

    match state.pipeline.screen(text).await {
        Ok(outcome) => {
            let audit = outcome.audit.as_str();
            if outcome.audit.is_lost() {
                warn!(%request_id, "Responding without an audit record");
            }
            info!(
                %request_id,
                anomalous = outcome.response.is_anomalous(),
                audit,
                "Screening complete"
            );

            let mut response = Json(DetectResponse::from(outcome)).into_response();
            response
                .headers_mut()
                .insert(AUDIT_STATUS_HEADER, HeaderValue::from_static(audit));
            response
        }
        Err(e) => {
            if e.is_client_error() {
                info!(%request_id, error = %e, "Rejected request");
            } else {
                error!(%request_id, error = %e, "Screening failed");
            }
            error_response(&e)
        }
    }
}
