//! Execution engine (C6): runs a `CompiledStrategy` against a `WaferMap`,
//! applying conditional gating, weight normalization, deduplication,
//! transformation, and tool constraints, per spec.md 4.6.
//!
//! The pipeline itself is a pure, clamped numeric computation in the style of
//! `risk.rs`'s Kelly/drawdown math: no I/O, every output bounded, every step
//! independently testable.

use crate::error::EngineError;
use crate::geometry::{apply_transform, Point2D, TransformationConfig};
use crate::rules::{RuleContext, RuleOutcome};
use crate::strategy::compiler::CompiledStrategy;
use crate::wafer::{DieCoord, WaferMap};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolConstraints {
    pub max_sites: Option<usize>,
    pub min_spacing: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContext {
    pub process_params: HashMap<String, serde_json::Value>,
    pub tool_constraints: ToolConstraints,
    #[serde(default)]
    pub wafer_size: Option<String>,
    #[serde(default)]
    pub product_type: Option<String>,
    #[serde(default)]
    pub process_layer: Option<String>,
    #[serde(default)]
    pub defect_density: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectedPoint {
    pub x: f64,
    pub y: f64,
    pub rule_source: String,
    pub priority: f64,
    pub available: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverageStats {
    pub total_dies: usize,
    pub available_dies: usize,
    pub selected_count: usize,
    pub coverage_pct: f64,
    pub rule_distribution: HashMap<String, usize>,
    pub centroid: Option<(f64, f64)>,
    pub x_range: (f64, f64),
    pub y_range: (f64, f64),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceMetrics {
    pub elapsed_ms: f64,
    pub rules_evaluated: usize,
    pub rules_eligible: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationResult {
    pub selected_points: Vec<SelectedPoint>,
    pub coverage_stats: CoverageStats,
    pub performance_metrics: PerformanceMetrics,
    pub warnings: Vec<String>,
}

/// Derives a deterministic fallback seed from a strategy's identity when the
/// author didn't supply one for `randomSampling` (spec.md 4.6).
pub fn derive_seed(strategy_id: &str, version: &str) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(strategy_id.as_bytes());
    hasher.update(b":");
    hasher.update(version.as_bytes());
    let digest = hasher.finalize();
    u64::from_be_bytes(digest[0..8].try_into().unwrap())
}

struct GatedRule<'a> {
    name: &'a str,
    weight: f64,
    outcome: RuleOutcome,
    warnings: Vec<String>,
}

fn conditions_match(
    conditions: &Option<crate::strategy::ConditionalLogic>,
    ctx: &ExecutionContext,
) -> bool {
    let Some(cond) = conditions else { return true };
    if let Some(ws) = &cond.wafer_size {
        if ctx.wafer_size.as_deref() != Some(ws.as_str()) {
            return false;
        }
    }
    if let Some(pt) = &cond.product_type {
        if ctx.product_type.as_deref() != Some(pt.as_str()) {
            return false;
        }
    }
    if let Some(pl) = &cond.process_layer {
        if ctx.process_layer.as_deref() != Some(pl.as_str()) {
            return false;
        }
    }
    if let Some(threshold) = cond.defect_density_threshold {
        match ctx.defect_density {
            Some(actual) if actual <= threshold => {}
            _ => return false,
        }
    }
    for (key, expected) in &cond.custom_conditions {
        match ctx.process_params.get(key) {
            Some(actual) if actual == expected => {}
            _ => return false,
        }
    }
    true
}

/// Runs the full pipeline. Never raises for `noEligibleRules` / `emptyWafer`
/// / `toolConstraintInfeasible` — those surface as a well-formed empty result
/// with an explanatory warning (spec.md 4.6), so a UI preview never crashes.
pub fn execute(
    compiled: &CompiledStrategy,
    wafer: &WaferMap,
    exec_ctx: &ExecutionContext,
) -> SimulationResult {
    let start = std::time::Instant::now();
    let mut warnings = Vec::new();

    if wafer.is_empty() {
        warnings.push("emptyWafer".to_string());
        return empty_result(warnings, start, 0, 0);
    }

    let fallback_seed = derive_seed(&compiled.strategy_id, &compiled.version);

    // Rule application is pure per-rule (each plugin only reads the wafer map
    // and its own validated params), so the fan-out across rules runs on
    // rayon's work-stealing pool; `collect()` over an indexed parallel
    // iterator preserves `compiled.rules`' declared order, so the merge below
    // stays deterministic regardless of which thread finishes first.
    let evaluated: Vec<Option<GatedRule>> = compiled
        .rules
        .par_iter()
        .map(|rule| {
            if !conditions_match(&rule.conditions, exec_ctx) {
                return None;
            }
            let ctx = RuleContext {
                process_params: exec_ctx.process_params.clone(),
                tool_constraints: exec_ctx.tool_constraints.clone(),
                fallback_seed,
            };
            let outcome = rule.plugin.apply(wafer, &rule.validated_params, &ctx);
            let estimate = rule.plugin.estimate(wafer, &rule.validated_params);
            let mut rule_warnings = Vec::new();
            if outcome.candidates.is_empty() {
                rule_warnings.push(format!("rule `{}` produced 0 points", rule.name));
            } else if outcome.candidates.len() > estimate.expected_point_count * 3
                && estimate.expected_point_count > 0
            {
                rule_warnings.push(format!(
                    "rule `{}` produced {} points, more than 3x the expected {}",
                    rule.name,
                    outcome.candidates.len(),
                    estimate.expected_point_count
                ));
            }
            rule_warnings.extend(outcome.warnings.clone());
            Some(GatedRule { name: &rule.name, weight: rule.weight, outcome, warnings: rule_warnings })
        })
        .collect();

    let mut gated: Vec<GatedRule> = Vec::new();
    for g in evaluated.into_iter().flatten() {
        warnings.extend(g.warnings.clone());
        gated.push(g);
    }

    let rules_evaluated = compiled.rules.len();
    let rules_eligible = gated.len();

    let total_weight: f64 = gated.iter().map(|r| r.weight).sum();
    if gated.is_empty() || total_weight <= 0.0 {
        warnings.push("noEligibleRules".to_string());
        return empty_result(warnings, start, rules_evaluated, rules_eligible);
    }

    // Weight-and-merge, then dedup-by-coordinate keeping max priority and all
    // contributing rule names (alphabetical, comma-joined) — spec.md 4.6.
    let mut by_coord: HashMap<DieCoord, (f64, Vec<String>)> = HashMap::new();
    let mut rule_distribution: HashMap<String, usize> = HashMap::new();
    for r in &compiled.rules {
        rule_distribution.insert(r.name.clone(), 0);
    }

    for g in &gated {
        let mut count_for_rule = 0usize;
        for (coord, raw_priority) in &g.outcome.candidates {
            let final_priority = (raw_priority * g.weight / total_weight).clamp(0.0, 1.0);
            let entry = by_coord.entry(*coord).or_insert((0.0, Vec::new()));
            if final_priority > entry.0 {
                entry.0 = final_priority;
            }
            if !entry.1.iter().any(|n| n == g.name) {
                entry.1.push(g.name.to_string());
            }
            count_for_rule += 1;
        }
        *rule_distribution.entry(g.name.to_string()).or_insert(0) += count_for_rule;
    }

    let transform = compiled.transformation.unwrap_or_default();

    let mut points: Vec<SelectedPoint> = by_coord
        .into_iter()
        .map(|(coord, (priority, mut rule_names))| {
            rule_names.sort();
            let source_point = Point2D::new(coord.x as f64, coord.y as f64);
            let transformed = apply_transform(source_point, &transform);
            let available = wafer.get(coord).map(|d| d.available).unwrap_or(false);
            SelectedPoint {
                x: transformed.x,
                y: transformed.y,
                rule_source: rule_names.join(","),
                priority,
                available,
            }
        })
        .collect();

    // Transformed-out-of-bounds warning.
    let wafer_bounds = wafer_point_bounds(wafer);
    if let Some((xmin, ymin, xmax, ymax)) = wafer_bounds {
        for p in &points {
            if p.x < xmin || p.x > xmax || p.y < ymin || p.y > ymax {
                warnings.push(format!("point ({:.3}, {:.3}) falls outside wafer map bounds after transform", p.x, p.y));
            }
        }
    }

    points.sort_by(|a, b| {
        b.priority
            .partial_cmp(&a.priority)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.rule_source.cmp(&b.rule_source))
            .then_with(|| a.x.partial_cmp(&b.x).unwrap_or(std::cmp::Ordering::Equal))
            .then_with(|| a.y.partial_cmp(&b.y).unwrap_or(std::cmp::Ordering::Equal))
    });

    let candidate_count = points.len();

    // minSpacing: greedy from highest priority.
    if let Some(min_spacing) = exec_ctx.tool_constraints.min_spacing {
        let mut kept: Vec<SelectedPoint> = Vec::new();
        for p in points.into_iter() {
            let too_close = kept.iter().any(|k| {
                ((k.x - p.x).powi(2) + (k.y - p.y).powi(2)).sqrt() < min_spacing
            });
            if !too_close {
                kept.push(p);
            }
        }
        let truncated = candidate_count - kept.len();
        if candidate_count > 0 && (truncated as f64 / candidate_count as f64) > 0.20 {
            warnings.push(format!(
                "minSpacing truncated {truncated} of {candidate_count} candidates (> 20%)"
            ));
        }
        points = kept;
    }

    // maxSites: truncate after priority sort.
    if let Some(max_sites) = exec_ctx.tool_constraints.max_sites {
        if max_sites == 0 {
            warnings.push("toolConstraintInfeasible: maxSites = 0".to_string());
            return empty_result(warnings, start, rules_evaluated, rules_eligible);
        }
        points.truncate(max_sites);
    }

    let limit = crate::config::ResourceLimits::default().max_sites_per_simulation;
    if points.len() > limit {
        points.truncate(limit);
        warnings.push(format!("result clamped to the {limit}-site hard limit"));
    }

    let coverage_stats = compute_stats(wafer, &points, rule_distribution);
    let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
    metrics::histogram!("wafer_engine_execute_ms").record(elapsed_ms);
    metrics::counter!("wafer_engine_simulations_total").increment(1);

    SimulationResult {
        selected_points: points,
        coverage_stats,
        performance_metrics: PerformanceMetrics {
            elapsed_ms,
            rules_evaluated,
            rules_eligible,
        },
        warnings,
    }
}

fn wafer_point_bounds(wafer: &WaferMap) -> Option<(f64, f64, f64, f64)> {
    let mut it = wafer.dies().map(|d| (d.x as f64, d.y as f64));
    let (mut xmin, mut ymin) = it.next()?;
    let (mut xmax, mut ymax) = (xmin, ymin);
    for (x, y) in it {
        xmin = xmin.min(x);
        ymin = ymin.min(y);
        xmax = xmax.max(x);
        ymax = ymax.max(y);
    }
    Some((xmin, ymin, xmax, ymax))
}

fn compute_stats(
    wafer: &WaferMap,
    points: &[SelectedPoint],
    rule_distribution: HashMap<String, usize>,
) -> CoverageStats {
    let total_dies = wafer.len();
    let available_dies = wafer.available_count();
    let selected_count = points.len();
    let coverage_pct = if available_dies > 0 {
        (selected_count as f64 / available_dies as f64) * 100.0
    } else {
        0.0
    };

    let centroid = if selected_count > 0 {
        let sum_x: f64 = points.iter().map(|p| p.x).sum();
        let sum_y: f64 = points.iter().map(|p| p.y).sum();
        Some((sum_x / selected_count as f64, sum_y / selected_count as f64))
    } else {
        None
    };

    let x_range = range_of(points.iter().map(|p| p.x));
    let y_range = range_of(points.iter().map(|p| p.y));

    CoverageStats {
        total_dies,
        available_dies,
        selected_count,
        coverage_pct,
        rule_distribution,
        centroid,
        x_range,
        y_range,
    }
}

fn range_of(it: impl Iterator<Item = f64>) -> (f64, f64) {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    let mut any = false;
    for v in it {
        any = true;
        min = min.min(v);
        max = max.max(v);
    }
    if any {
        (min, max)
    } else {
        (0.0, 0.0)
    }
}

fn empty_result(
    warnings: Vec<String>,
    start: std::time::Instant,
    rules_evaluated: usize,
    rules_eligible: usize,
) -> SimulationResult {
    SimulationResult {
        selected_points: Vec::new(),
        coverage_stats: CoverageStats::default(),
        performance_metrics: PerformanceMetrics {
            elapsed_ms: start.elapsed().as_secs_f64() * 1000.0,
            rules_evaluated,
            rules_eligible,
        },
        warnings,
    }
}

/// Maps an `EngineError` that could plausibly arise from compiling right
/// before execution back into the facade's expected shape. Execution itself
/// never returns `Err` (see module docs); this exists for callers that
/// compile-then-execute in one request.
pub fn compile_error_to_engine_error(reasons: Vec<crate::error::FieldError>) -> EngineError {
    EngineError::CompileError { reasons }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::RuleOutcome;
    use crate::strategy::compiler::CompiledRule;
    use crate::wafer::Die;

    fn wafer_3x3() -> WaferMap {
        let mut w = WaferMap::new();
        for x in 0..3 {
            for y in 0..3 {
                w.insert(Die { x, y, available: true });
            }
        }
        w
    }

    struct StaticRule(Vec<(DieCoord, f64)>);
    impl crate::rules::Rule for StaticRule {
        fn validate(&self, params: &serde_json::Value) -> Result<serde_json::Value, Vec<crate::error::FieldError>> {
            Ok(params.clone())
        }
        fn apply(&self, _wafer: &WaferMap, _params: &serde_json::Value, _ctx: &RuleContext) -> RuleOutcome {
            RuleOutcome { candidates: self.0.clone(), warnings: vec![] }
        }
        fn estimate(&self, _wafer: &WaferMap, _params: &serde_json::Value) -> crate::rules::CostEstimate {
            crate::rules::CostEstimate { expected_point_count: self.0.len(), expected_cost_class: crate::rules::CostClass::Low }
        }
    }

    fn compiled_with(rules: Vec<CompiledRule>) -> CompiledStrategy {
        CompiledStrategy {
            strategy_id: "s1".to_string(),
            version: "1.0.0".to_string(),
            rules,
            transformation: None,
            target_vendor: None,
        }
    }

    #[test]
    fn determinism_same_inputs_same_output() {
        let wafer = wafer_3x3();
        let rule = CompiledRule {
            name: "a".to_string(),
            weight: 1.0,
            conditions: None,
            plugin: Box::new(StaticRule(vec![(DieCoord::new(0, 0), 1.0), (DieCoord::new(1, 1), 0.5)])),
            validated_params: serde_json::json!({}),
        };
        let compiled = compiled_with(vec![rule]);
        let ctx = ExecutionContext::default();
        let r1 = execute(&compiled, &wafer, &ctx);
        let rule2 = CompiledRule {
            name: "a".to_string(),
            weight: 1.0,
            conditions: None,
            plugin: Box::new(StaticRule(vec![(DieCoord::new(0, 0), 1.0), (DieCoord::new(1, 1), 0.5)])),
            validated_params: serde_json::json!({}),
        };
        let compiled2 = compiled_with(vec![rule2]);
        let r2 = execute(&compiled2, &wafer, &ctx);
        assert_eq!(r1.selected_points.len(), r2.selected_points.len());
        for (a, b) in r1.selected_points.iter().zip(r2.selected_points.iter()) {
            assert_eq!(a.x, b.x);
            assert_eq!(a.y, b.y);
            assert_eq!(a.priority, b.priority);
        }
    }

    #[test]
    fn empty_wafer_returns_warning_not_error() {
        let wafer = WaferMap::new();
        let compiled = compiled_with(vec![]);
        let result = execute(&compiled, &wafer, &ExecutionContext::default());
        assert!(result.selected_points.is_empty());
        assert!(result.warnings.iter().any(|w| w == "emptyWafer"));
    }

    #[test]
    fn dedup_keeps_max_priority_and_joins_rule_names() {
        let wafer = wafer_3x3();
        let rule_a = CompiledRule {
            name: "alpha".to_string(),
            weight: 1.0,
            conditions: None,
            plugin: Box::new(StaticRule(vec![(DieCoord::new(0, 0), 0.3)])),
            validated_params: serde_json::json!({}),
        };
        let rule_b = CompiledRule {
            name: "beta".to_string(),
            weight: 1.0,
            conditions: None,
            plugin: Box::new(StaticRule(vec![(DieCoord::new(0, 0), 0.9)])),
            validated_params: serde_json::json!({}),
        };
        let compiled = compiled_with(vec![rule_a, rule_b]);
        let result = execute(&compiled, &wafer, &ExecutionContext::default());
        assert_eq!(result.selected_points.len(), 1);
        assert_eq!(result.selected_points[0].rule_source, "alpha,beta");
    }
}
