//! RPC façade (C10): a thin axum boundary over the engine (spec.md 4.10).
//! Request validation (shape, size limits) and error-to-status mapping live
//! here; every other module stays transport-agnostic. Mirrors how
//! `api/backtest_v2.rs` wraps `ArtifactStore` in the teacher codebase: one
//! `AppState` struct, one router-builder function per resource, a shared
//! error envelope.

mod meta;
mod schematics;
mod strategies;

use crate::cache::CompiledStrategyCache;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::registry::{RuleRegistry, VendorRegistry};
use crate::repository::{SchematicRepo, StrategyRepo, ValidationRepo};
use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub struct AppState {
    pub strategy_repo: Arc<dyn StrategyRepo>,
    pub schematic_repo: Arc<dyn SchematicRepo>,
    pub validation_repo: Arc<dyn ValidationRepo>,
    pub rule_registry: RuleRegistry,
    pub vendor_registry: VendorRegistry,
    pub cache: CompiledStrategyCache,
    pub config: EngineConfig,
}

/// Wire error envelope (spec.md 6.4).
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    validation_errors: Option<Vec<crate::error::FieldError>>,
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    error: ErrorBody,
    request_id: String,
    timestamp: chrono::DateTime<chrono::Utc>,
}

/// Maps an `EngineError` to its HTTP status (spec.md 6.3).
fn status_for(err: &EngineError) -> StatusCode {
    match err {
        EngineError::ValidationError { .. } | EngineError::FileUploadError { .. } => {
            StatusCode::BAD_REQUEST
        }
        EngineError::NotFound { .. } => StatusCode::NOT_FOUND,
        EngineError::LifecycleViolation { .. } => StatusCode::CONFLICT,
        EngineError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        EngineError::BusinessLogicError { .. }
        | EngineError::CompileError { .. }
        | EngineError::TooManyDies { .. }
        | EngineError::UnknownPlugin { .. }
        | EngineError::NoEligibleRules
        | EngineError::EmptyWafer
        | EngineError::ToolConstraintInfeasible { .. }
        | EngineError::ParserError { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        EngineError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        EngineError::Cancelled => StatusCode::BAD_REQUEST,
        EngineError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Newtype so handlers can simply return `Result<T, ApiError>` and `?` an
/// `EngineError` straight through, the way handlers in `api/backtest_v2.rs`
/// collapse store errors into a `Response`.
pub struct ApiError(pub EngineError);

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self.0, "internal error serving request");
        } else {
            tracing::warn!(error = %self.0, code = self.0.code(), "request failed");
        }
        let (details, validation_errors) = match &self.0 {
            EngineError::CompileError { reasons } => (None, Some(reasons.clone())),
            EngineError::ValidationError { errors } => (None, Some(errors.clone())),
            EngineError::LifecycleViolation { from, to, .. } => (
                Some(serde_json::json!({ "from": from, "to": to })),
                None,
            ),
            _ => (None, None),
        };
        let body = ErrorEnvelope {
            error: ErrorBody {
                code: self.0.code(),
                message: self.0.to_string(),
                details,
                validation_errors,
            },
            request_id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now(),
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Builds the full router (spec.md 6.2's principal subset plus the metadata
/// and health endpoints spec.md 4.10 names). `/metrics` is mounted
/// separately by the caller so it can stay off the CORS'd public surface if
/// desired.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = if state.config.cors_origins.iter().any(|o| o == "*") {
        CorsLayer::permissive()
    } else {
        let origins: Vec<_> = state
            .config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new().allow_origin(origins)
    };

    let max_upload = state.config.limits.max_upload_bytes as usize;

    Router::new()
        .route("/health", get(meta::health))
        .route("/formats", get(meta::get_supported_formats))
        .route("/rule-types", get(meta::get_rule_types))
        .route("/vendors", get(meta::get_vendors))
        .route(
            "/schematics/upload",
            post(schematics::upload).layer(DefaultBodyLimit::max(max_upload)),
        )
        .route("/schematics", get(schematics::list))
        .route("/schematics/:id", get(schematics::get).delete(schematics::remove))
        .route("/schematics/:id/die-boundaries", get(schematics::die_boundaries))
        .route("/schematics/:id/export/:format", get(schematics::export))
        .route("/schematics/:id/validate", post(schematics::validate))
        .route("/strategies", post(strategies::create).get(strategies::list))
        .route(
            "/strategies/:id",
            get(strategies::get).put(strategies::update).delete(strategies::remove),
        )
        .route("/strategies/:id/simulate", post(strategies::simulate))
        .route("/strategies/:id/promote", post(strategies::promote))
        .route("/strategies/:id/clone", post(strategies::clone_strategy))
        .route("/strategies/:id/export/:vendor", post(strategies::export))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Serves the Prometheus text-exposition format (SPEC_FULL.md A's
/// observability section). Mounted as its own tiny router so it can bind a
/// different address than the main API, matching `metrics_addr` being
/// separate from `bind_addr` in `EngineConfig`.
pub fn metrics_router(handle: metrics_exporter_prometheus::PrometheusHandle) -> Router {
    Router::new().route(
        "/metrics",
        get(move || {
            let handle = handle.clone();
            async move { handle.render() }
        }),
    )
}
