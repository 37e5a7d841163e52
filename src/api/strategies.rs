//! Strategy endpoints: CRUD, lifecycle transitions, simulate, and
//! vendor export (spec.md 6.2, 4.9, 4.10).

use super::{ApiError, ApiResult, AppState};
use crate::error::EngineError;
use crate::execution::{execute, ExecutionContext, SimulationResult, ToolConstraints};
use crate::geometry::TransformationConfig;
use crate::repository::{StrategyFilter, StrategyUpdate, VersionBump};
use crate::strategy::compiler::{compile, CompiledStrategy};
use crate::strategy::{ConditionalLogic, LifecycleState, RuleConfig, StrategyDefinition, StrategyType};
use crate::vendor::StrategyMeta;
use crate::wafer::{WaferMap, WaferMapWire};
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

fn compiled_of(
    state: &AppState,
    def: &StrategyDefinition,
) -> ApiResult<Arc<CompiledStrategy>> {
    if let Some(c) = state.cache.get(&def.id.to_string(), &def.version) {
        return Ok(c);
    }
    let compiled = compile(def, &state.rule_registry, &state.vendor_registry)
        .map_err(|reasons| ApiError(EngineError::CompileError { reasons }))?;
    Ok(state.cache.insert(&def.id.to_string(), &def.version, compiled))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateStrategyRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub strategy_type: StrategyType,
    pub process_step: String,
    pub tool_type: String,
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
    #[serde(default)]
    pub global_conditions: Option<ConditionalLogic>,
    #[serde(default)]
    pub transformations: Option<TransformationConfig>,
    #[serde(default)]
    pub target_vendor: Option<String>,
    #[serde(default)]
    pub vendor_specific_params: serde_json::Value,
    pub author: String,
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateStrategyRequest>,
) -> ApiResult<(StatusCode, Json<StrategyDefinition>)> {
    if req.name.trim().is_empty() {
        return Err(ApiError(EngineError::ValidationError {
            errors: vec![crate::error::FieldError::on_field("name", "name must not be empty")],
        }));
    }
    let now = chrono::Utc::now();
    let def = StrategyDefinition {
        id: Uuid::new_v4(),
        name: req.name,
        description: req.description,
        strategy_type: req.strategy_type,
        process_step: req.process_step,
        tool_type: req.tool_type,
        rules: req.rules,
        global_conditions: req.global_conditions,
        transformations: req.transformations,
        target_vendor: req.target_vendor,
        vendor_specific_params: req.vendor_specific_params,
        version: "1.0.0".to_string(),
        author: req.author,
        created_at: now,
        modified_at: now,
        lifecycle_state: LifecycleState::Draft,
        schema_version: 1,
    };
    let created = state.strategy_repo.create(def).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListStrategiesQuery {
    pub author: Option<String>,
    pub strategy_type: Option<StrategyType>,
    pub process_step: Option<String>,
    pub lifecycle_state: Option<LifecycleState>,
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ListStrategiesQuery>,
) -> ApiResult<Json<Vec<StrategyDefinition>>> {
    let filter = StrategyFilter {
        author: q.author,
        strategy_type: q.strategy_type,
        process_step: q.process_step,
        lifecycle_state: q.lifecycle_state,
    };
    Ok(Json(state.strategy_repo.list(&filter).await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct VersionQuery {
    pub version: Option<String>,
}

pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(q): Query<VersionQuery>,
) -> ApiResult<Json<StrategyDefinition>> {
    Ok(Json(state.strategy_repo.get(id, q.version.as_deref()).await?))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStrategyRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub process_step: Option<String>,
    pub tool_type: Option<String>,
    pub rules: Option<Vec<RuleConfig>>,
    pub global_conditions: Option<Option<ConditionalLogic>>,
    pub transformations: Option<Option<TransformationConfig>>,
    pub target_vendor: Option<Option<String>>,
    pub vendor_specific_params: Option<serde_json::Value>,
    #[serde(default)]
    pub version_bump: VersionBumpWire,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionBumpWire {
    #[default]
    Patch,
    Minor,
    Major,
}

impl From<VersionBumpWire> for VersionBump {
    fn from(w: VersionBumpWire) -> Self {
        match w {
            VersionBumpWire::Patch => VersionBump::Patch,
            VersionBumpWire::Minor => VersionBump::Minor,
            VersionBumpWire::Major => VersionBump::Major,
        }
    }
}

pub async fn update(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateStrategyRequest>,
) -> ApiResult<Json<StrategyDefinition>> {
    let bump = req.version_bump.into();
    let update = StrategyUpdate {
        name: req.name,
        description: req.description,
        process_step: req.process_step,
        tool_type: req.tool_type,
        rules: req.rules,
        global_conditions: req.global_conditions,
        transformations: req.transformations,
        target_vendor: req.target_vendor,
        vendor_specific_params: req.vendor_specific_params,
    };
    let updated = state.strategy_repo.update(id, update, bump).await?;
    state.cache.invalidate_definition(&id.to_string());
    Ok(Json(updated))
}

pub async fn remove(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.strategy_repo.delete(id).await?;
    state.cache.invalidate_definition(&id.to_string());
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserQuery {
    pub user: Option<String>,
}

pub async fn promote(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(q): Query<UserQuery>,
) -> ApiResult<Json<StrategyDefinition>> {
    let actor = q.user.unwrap_or_else(|| "unknown".to_string());
    let promoted = state
        .strategy_repo
        .promote(id, &actor, &state.rule_registry, &state.vendor_registry)
        .await?;
    Ok(Json(promoted))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloneQuery {
    pub new_name: String,
    pub author: String,
}

pub async fn clone_strategy(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(q): Query<CloneQuery>,
) -> ApiResult<(StatusCode, Json<StrategyDefinition>)> {
    let cloned = state.strategy_repo.clone_strategy(id, &q.new_name, &q.author).await?;
    Ok((StatusCode::CREATED, Json(cloned)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulateRequest {
    pub wafer_map: WaferMapWire,
    #[serde(default)]
    pub process_params: std::collections::HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub tool_constraints: ToolConstraints,
    #[serde(default)]
    pub product_type: Option<String>,
    #[serde(default)]
    pub process_layer: Option<String>,
    #[serde(default)]
    pub defect_density: Option<f64>,
}

impl SimulateRequest {
    fn into_context(self) -> (WaferMap, ExecutionContext) {
        let wafer_size = self.wafer_map.metadata.wafer_size.clone();
        let wafer: WaferMap = self.wafer_map.into();
        let ctx = ExecutionContext {
            process_params: self.process_params,
            tool_constraints: self.tool_constraints,
            wafer_size,
            product_type: self.product_type,
            process_layer: self.process_layer,
            defect_density: self.defect_density,
        };
        (wafer, ctx)
    }
}

pub async fn simulate(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<SimulateRequest>,
) -> ApiResult<Json<SimulationResult>> {
    let strategy = state.strategy_repo.get_current(id).await?;
    // A zero-rule strategy never reaches here: `compile` already rejects it
    // with `compileError` (spec.md 4.5 check 4, Σ weights over enabled rules
    // > 0). Runtime ineligibility (every rule gated out by conditions) is
    // `execute`'s job, which returns a well-formed empty result with a
    // warning rather than an error (spec.md 4.6/§7).
    let compiled = compiled_of(&state, &strategy)?;
    let (wafer, ctx) = req.into_context();
    let result = execute(&compiled, &wafer, &ctx);
    let had_errors = result.selected_points.is_empty()
        && result.warnings.iter().any(|w| {
            w == "emptyWafer" || w == "noEligibleRules" || w.starts_with("toolConstraintInfeasible")
        });
    state
        .strategy_repo
        .record_simulation(strategy.id, &strategy.version, had_errors)
        .await?;
    Ok(Json(result))
}

pub async fn export(
    State(state): State<Arc<AppState>>,
    Path((id, vendor)): Path<(Uuid, String)>,
    Json(req): Json<SimulateRequest>,
) -> ApiResult<Response> {
    let strategy = state.strategy_repo.get_current(id).await?;
    let compiled = compiled_of(&state, &strategy)?;
    let (wafer, ctx) = req.into_context();
    let result = execute(&compiled, &wafer, &ctx);

    let emitter = state.vendor_registry.create(&vendor)?;
    let meta = StrategyMeta {
        wafer_size: ctx.wafer_size,
        product_type: ctx.product_type,
        process_layer: ctx.process_layer,
        strategy_version: strategy.version.clone(),
    };
    let output = emitter.emit(&result, &meta, None);
    Ok(([(header::CONTENT_TYPE, output.content_type)], output.bytes).into_response())
}
