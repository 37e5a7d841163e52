//! Strategy definition (C5): the immutable declarative shape a user authors,
//! distinct from the `CompiledStrategy` the execution engine actually runs
//! (see [`compiler`]). Mirrors `models.rs`'s split between a wire/storage DTO
//! and the resolved runtime form used once plugins are looked up.

pub mod compiler;

use crate::geometry::TransformationConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StrategyType {
    FixedPoint,
    CenterEdge,
    UniformGrid,
    RandomSampling,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Draft,
    Review,
    Approved,
    Active,
    Deprecated,
}

impl Default for LifecycleState {
    fn default() -> Self {
        Self::Draft
    }
}

/// A rule fires iff every present condition matches the execution context;
/// an absent field means "don't care" (spec.md 3.4).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionalLogic {
    #[serde(default)]
    pub wafer_size: Option<String>,
    #[serde(default)]
    pub product_type: Option<String>,
    #[serde(default)]
    pub process_layer: Option<String>,
    #[serde(default)]
    pub defect_density_threshold: Option<f64>,
    #[serde(default)]
    pub custom_conditions: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleConfig {
    pub rule_type: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
    pub weight: f64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub conditions: Option<ConditionalLogic>,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyDefinition {
    pub id: uuid::Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub strategy_type: StrategyType,
    pub process_step: String,
    pub tool_type: String,
    pub rules: Vec<RuleConfig>,
    #[serde(default)]
    pub global_conditions: Option<ConditionalLogic>,
    #[serde(default)]
    pub transformations: Option<TransformationConfig>,
    #[serde(default)]
    pub target_vendor: Option<String>,
    #[serde(default)]
    pub vendor_specific_params: serde_json::Value,
    pub version: String,
    pub author: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub modified_at: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    pub lifecycle_state: LifecycleState,
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
}

fn default_schema_version() -> u32 {
    1
}

impl StrategyDefinition {
    /// A strategy may be simulated or promoted past `draft` only once it has
    /// at least one rule (spec.md 3.4 invariants).
    pub fn has_rules(&self) -> bool {
        !self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_lifecycle_state_is_draft() {
        assert_eq!(LifecycleState::default(), LifecycleState::Draft);
    }
}
