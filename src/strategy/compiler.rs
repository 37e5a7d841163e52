//! Strategy compilation (C5): resolves a `StrategyDefinition` into an
//! immutable, cacheable `CompiledStrategy` the execution engine can run
//! without touching the registry or re-validating parameters again.

use super::{ConditionalLogic, StrategyDefinition};
use crate::error::FieldError;
use crate::geometry::TransformationConfig;
use crate::registry::{RuleRegistry, VendorRegistry};
use crate::rules::Rule;

/// One enabled, resolved rule: a live plugin handle plus the parameters its
/// own `validate` hook already normalized.
pub struct CompiledRule {
    pub name: String,
    pub weight: f64,
    pub conditions: Option<ConditionalLogic>,
    pub plugin: Box<dyn Rule>,
    pub validated_params: serde_json::Value,
}

/// Immutable, may be cached by (definitionId, version) — spec.md 4.5.
pub struct CompiledStrategy {
    pub strategy_id: String,
    pub version: String,
    pub rules: Vec<CompiledRule>,
    pub transformation: Option<TransformationConfig>,
    pub target_vendor: Option<String>,
}

/// Compiles a `StrategyDefinition` against the live plugin registries.
///
/// Never fails fast: every problem across every rule (and the
/// transformation, and the target vendor) is collected into one
/// `compileError{reasons}` so a UI form can surface all of them at once
/// (spec.md 4.5).
pub fn compile(
    def: &StrategyDefinition,
    rules_registry: &RuleRegistry,
    vendor_registry: &VendorRegistry,
) -> Result<CompiledStrategy, Vec<FieldError>> {
    let mut reasons = Vec::new();
    let mut compiled_rules = Vec::new();

    if def.rules.is_empty() {
        reasons.push(FieldError::on_field("rules", "strategy must declare at least one rule"));
    }

    for (i, rule_cfg) in def.rules.iter().enumerate() {
        if !rule_cfg.enabled {
            continue;
        }
        if rule_cfg.weight < 0.0 {
            reasons.push(FieldError::on_rule(i, format!("weight must be >= 0, got {}", rule_cfg.weight)));
            continue;
        }
        let plugin = match rules_registry.create(&rule_cfg.rule_type) {
            Ok(p) => p,
            Err(_) => {
                reasons.push(FieldError::on_rule(
                    i,
                    format!("unknown rule type `{}`", rule_cfg.rule_type),
                ));
                continue;
            }
        };
        match plugin.validate(&rule_cfg.parameters) {
            Ok(validated_params) => {
                compiled_rules.push(CompiledRule {
                    name: rule_cfg.rule_type.clone(),
                    weight: rule_cfg.weight,
                    conditions: rule_cfg.conditions.clone(),
                    plugin,
                    validated_params,
                });
            }
            Err(field_errors) => {
                for fe in field_errors {
                    reasons.push(FieldError::on_rule(i, fe.message));
                }
            }
        }
    }

    let enabled_weight: f64 = def
        .rules
        .iter()
        .filter(|r| r.enabled)
        .map(|r| r.weight.max(0.0))
        .sum();
    if enabled_weight <= 0.0 {
        reasons.push(FieldError::new("sum of enabled rule weights must be > 0"));
    }

    if let Some(t) = &def.transformations {
        if let Err(msg) = t.validate() {
            reasons.push(FieldError::on_field("transformations", msg));
        }
    }

    if let Some(vendor) = &def.target_vendor {
        if !vendor_registry.contains(vendor) {
            reasons.push(FieldError::on_field("targetVendor", format!("unknown vendor `{vendor}`")));
        }
    }

    if !reasons.is_empty() {
        return Err(reasons);
    }

    Ok(CompiledStrategy {
        strategy_id: def.id.to_string(),
        version: def.version.clone(),
        rules: compiled_rules,
        transformation: def.transformations,
        target_vendor: def.target_vendor.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::bootstrap;
    use crate::strategy::{LifecycleState, RuleConfig, StrategyType};
    use chrono::Utc;

    fn base_def(rules: Vec<RuleConfig>) -> StrategyDefinition {
        StrategyDefinition {
            id: uuid::Uuid::new_v4(),
            name: "s".to_string(),
            description: String::new(),
            strategy_type: StrategyType::Custom,
            process_step: "etch".to_string(),
            tool_type: "toolA".to_string(),
            rules,
            global_conditions: None,
            transformations: None,
            target_vendor: None,
            vendor_specific_params: serde_json::json!({}),
            version: "1.0.0".to_string(),
            author: "tester".to_string(),
            created_at: Utc::now(),
            modified_at: Utc::now(),
            lifecycle_state: LifecycleState::Draft,
            schema_version: 1,
        }
    }

    #[test]
    fn compiles_with_valid_rule() {
        let (rules_reg, vendor_reg) = bootstrap();
        let def = base_def(vec![RuleConfig {
            rule_type: "fixedPoint".to_string(),
            parameters: serde_json::json!({ "points": [[0, 0]] }),
            weight: 1.0,
            enabled: true,
            conditions: None,
        }]);
        let compiled = compile(&def, &rules_reg, &vendor_reg).expect("should compile");
        assert_eq!(compiled.rules.len(), 1);
    }

    #[test]
    fn aggregates_every_problem_instead_of_failing_fast() {
        let (rules_reg, vendor_reg) = bootstrap();
        let def = base_def(vec![
            RuleConfig {
                rule_type: "not_a_real_rule".to_string(),
                parameters: serde_json::json!({}),
                weight: 1.0,
                enabled: true,
                conditions: None,
            },
            RuleConfig {
                rule_type: "fixedPoint".to_string(),
                parameters: serde_json::json!({}),
                weight: 1.0,
                enabled: true,
                conditions: None,
            },
        ]);
        let errs = compile(&def, &rules_reg, &vendor_reg).unwrap_err();
        assert!(errs.len() >= 2);
    }

    #[test]
    fn zero_total_weight_is_a_compile_error() {
        let (rules_reg, vendor_reg) = bootstrap();
        let def = base_def(vec![RuleConfig {
            rule_type: "fixedPoint".to_string(),
            parameters: serde_json::json!({ "points": [[0, 0]] }),
            weight: 0.0,
            enabled: true,
            conditions: None,
        }]);
        let errs = compile(&def, &rules_reg, &vendor_reg).unwrap_err();
        assert!(errs.iter().any(|e| e.message.contains("weight")));
    }
}
