//! Schematic endpoints: upload/list/get/delete, die-boundary listing,
//! SVG/DXF re-emit, and strategy-alignment validation (spec.md 6.2).

use super::{ApiError, ApiResult, AppState};
use crate::error::EngineError;
use crate::schematic::{DieBoundary, ParseHints, SchematicData};
use crate::strategy::compiler::compile;
use crate::validator::{validate as run_validation, ValidationMode, ValidationResult};
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadQuery {
    #[allow(dead_code)]
    pub created_by: Option<String>,
    pub coordinate_scale: Option<f64>,
    pub target_layer: Option<String>,
    pub target_cell: Option<String>,
    pub die_size_filter_min: Option<f64>,
    pub die_size_filter_max: Option<f64>,
}

pub async fn upload(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UploadQuery>,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<SchematicData>)> {
    let mut filename = None;
    let mut bytes = None;
    while let Some(field) = multipart.next_field().await.map_err(|e| {
        ApiError(EngineError::FileUploadError { reason: e.to_string() })
    })? {
        if field.name() == Some("file") {
            filename = field.file_name().map(str::to_string);
            bytes = Some(
                field
                    .bytes()
                    .await
                    .map_err(|e| ApiError(EngineError::FileUploadError { reason: e.to_string() }))?,
            );
        }
    }
    let filename = filename.ok_or_else(|| {
        ApiError(EngineError::FileUploadError { reason: "missing `file` field".to_string() })
    })?;
    let bytes = bytes.ok_or_else(|| {
        ApiError(EngineError::FileUploadError { reason: "missing file content".to_string() })
    })?;

    let limit = state.config.limits.max_upload_bytes;
    if bytes.len() as u64 > limit {
        return Err(ApiError(EngineError::PayloadTooLarge {
            limit_bytes: limit,
            actual_bytes: bytes.len() as u64,
        }));
    }

    let die_size_filter = match (query.die_size_filter_min, query.die_size_filter_max) {
        (Some(min), Some(max)) => Some((min, max)),
        _ => None,
    };
    let hints = ParseHints {
        target_cell: query.target_cell,
        target_layer: query.target_layer,
        coordinate_scale: query.coordinate_scale,
        die_size_filter,
    };

    let data = crate::schematic::parse(&filename, &bytes, &hints)?;
    let stored = state.schematic_repo.store(data).await?;
    Ok((StatusCode::CREATED, Json(stored)))
}

pub async fn list(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<SchematicData>>> {
    Ok(Json(state.schematic_repo.list().await?))
}

pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<SchematicData>> {
    Ok(Json(state.schematic_repo.get(&id).await?))
}

pub async fn remove(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.schematic_repo.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn die_boundaries(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<DieBoundary>>> {
    let data = state.schematic_repo.get(&id).await?;
    Ok(Json(data.dies))
}

pub async fn export(
    State(state): State<Arc<AppState>>,
    Path((id, format)): Path<(String, String)>,
) -> ApiResult<Response> {
    let data = state.schematic_repo.get(&id).await?;
    match format.as_str() {
        "svg" => {
            let body = crate::schematic::emit_svg(&data);
            Ok(([(header::CONTENT_TYPE, "image/svg+xml")], body).into_response())
        }
        "dxf" => {
            let body = crate::schematic::emit_dxf(&data);
            Ok(([(header::CONTENT_TYPE, "application/dxf")], body).into_response())
        }
        other => Err(ApiError(EngineError::ValidationError {
            errors: vec![crate::error::FieldError::on_field(
                "format",
                format!("unsupported re-emit format `{other}`, expected svg or dxf"),
            )],
        })),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateRequest {
    pub strategy_id: uuid::Uuid,
    #[serde(default)]
    pub validation_mode: ValidationModeWire,
    #[serde(default = "default_max_cluster_density")]
    pub max_cluster_density: usize,
}

fn default_max_cluster_density() -> usize {
    3
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationModeWire {
    #[default]
    Permissive,
    Strict,
}

impl From<ValidationModeWire> for ValidationMode {
    fn from(w: ValidationModeWire) -> Self {
        match w {
            ValidationModeWire::Permissive => ValidationMode::Permissive,
            ValidationModeWire::Strict => ValidationMode::Strict,
        }
    }
}

pub async fn validate(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<ValidateRequest>,
) -> ApiResult<Json<ValidationResult>> {
    let schematic = state.schematic_repo.get(&id).await?;
    let strategy = state.strategy_repo.get_current(req.strategy_id).await?;

    let compiled = match state.cache.get(&strategy.id.to_string(), &strategy.version) {
        Some(c) => c,
        None => {
            let compiled = compile(&strategy, &state.rule_registry, &state.vendor_registry)
                .map_err(|reasons| ApiError(EngineError::CompileError { reasons }))?;
            state
                .cache
                .insert(&strategy.id.to_string(), &strategy.version, compiled)
        }
    };

    let result = run_validation(
        &schematic,
        &compiled,
        req.validation_mode.into(),
        req.max_cluster_density,
    );
    let stored = state.validation_repo.store(result).await?;
    let had_errors = stored
        .conflicts
        .iter()
        .any(|c| c.severity == crate::validator::Severity::Error);
    state
        .strategy_repo
        .record_simulation(strategy.id, &strategy.version, had_errors)
        .await?;
    Ok(Json(stored))
}
