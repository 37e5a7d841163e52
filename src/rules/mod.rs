//! Rule plugins (C4): pluggable sampling algorithms. The `Rule` trait mirrors
//! `backtest_v2::strategy::Strategy`'s shape (pure callback methods over a
//! context struct) but adapted to this engine's pull-model execution: a rule
//! is asked once for its candidate points rather than driven by a stream of
//! book/trade events.

pub mod center_edge;
pub mod fixed_point;
pub mod random_sampling;
pub mod uniform_grid;

use crate::error::FieldError;
use crate::execution::ToolConstraints;
use crate::wafer::{DieCoord, WaferMap};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Context passed to every rule at apply time: process parameters the
/// conditional-gating layer doesn't already consume, tool constraints (passed
/// through so a rule can size its own output, e.g. `randomSampling`'s count),
/// and a fallback seed derived by the execution engine from
/// `hash(strategyId, version)` when the strategy author didn't supply one
/// (spec.md 4.6, determinism).
#[derive(Debug, Clone, Default)]
pub struct RuleContext {
    pub process_params: HashMap<String, serde_json::Value>,
    pub tool_constraints: ToolConstraints,
    pub fallback_seed: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CostClass {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostEstimate {
    pub expected_point_count: usize,
    pub expected_cost_class: CostClass,
}

#[derive(Debug, Clone, Default)]
pub struct RuleOutcome {
    pub candidates: Vec<(DieCoord, f64)>,
    pub warnings: Vec<String>,
}

/// A pluggable sampling algorithm. Implementations must be deterministic
/// given the same inputs (and seed, where applicable) — spec.md 4.4.
pub trait Rule: Send + Sync {
    /// Validates raw JSON parameters, returning the (possibly
    /// defaulted/normalized) parameters on success or the full list of
    /// problems on failure — compilation aggregates these rather than
    /// failing on the first rule (spec.md 4.5).
    fn validate(&self, params: &serde_json::Value) -> Result<serde_json::Value, Vec<FieldError>>;

    fn apply(&self, wafer: &WaferMap, params: &serde_json::Value, ctx: &RuleContext) -> RuleOutcome;

    /// Predicts how many points `apply` will return for the given
    /// (validated) params, feeding the execution engine's "produced > 3x
    /// expected" warning (spec.md 4.6 step 9). Must be cheap: no need to
    /// actually run `apply`.
    fn estimate(&self, wafer: &WaferMap, params: &serde_json::Value) -> CostEstimate;
}

pub(crate) fn require_f64(obj: &serde_json::Value, field: &str) -> Result<f64, FieldError> {
    obj.get(field)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| FieldError::on_field(field, format!("missing or non-numeric field `{field}`")))
}

pub(crate) fn optional_f64(obj: &serde_json::Value, field: &str, default: f64) -> f64 {
    obj.get(field).and_then(|v| v.as_f64()).unwrap_or(default)
}

pub(crate) fn require_usize(obj: &serde_json::Value, field: &str) -> Result<usize, FieldError> {
    obj.get(field)
        .and_then(|v| v.as_u64())
        .map(|v| v as usize)
        .ok_or_else(|| FieldError::on_field(field, format!("missing or non-numeric field `{field}`")))
}
