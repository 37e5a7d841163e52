//! Liveness and read-only capability endpoints (spec.md 4.10's `health`,
//! `getSupportedFormats`, `getRuleTypes`, `getVendors`) — no business logic,
//! just reflecting what's registered.

use super::AppState;
use axum::extract::State;
use axum::Json;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthBody {
    status: &'static str,
    cached_strategies: usize,
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthBody> {
    Json(HealthBody { status: "ok", cached_strategies: state.cache.len() })
}

pub async fn get_supported_formats() -> Json<Vec<&'static str>> {
    Json(vec!["gdsii", "dxf", "svg"])
}

pub async fn get_rule_types(State(state): State<Arc<AppState>>) -> Json<Vec<String>> {
    Json(state.rule_registry.names())
}

pub async fn get_vendors(State(state): State<Arc<AppState>>) -> Json<Vec<String>> {
    Json(state.vendor_registry.names())
}
