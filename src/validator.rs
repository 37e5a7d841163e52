//! Validator (C7): checks a compiled strategy's output against a schematic's
//! die layout, scoring alignment and flagging conflicts (spec.md 4.7).

use crate::execution::{execute, ExecutionContext, SelectedPoint};
use crate::geometry::Point2D;
use crate::schematic::{DieBoundary, SchematicData};
use crate::strategy::compiler::CompiledStrategy;
use crate::wafer::{Die, DieCoord, WaferMap};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationMode {
    Strict,
    Permissive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationStatus {
    Pass,
    Warning,
    Fail,
    NotValidated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConflictType {
    OutOfBounds,
    Overlap,
    DuplicateSite,
    UnavailableDie,
    ClusterViolation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    fn weight(self) -> f64 {
        match self {
            Severity::Error => 1.0,
            Severity::Warning => 0.4,
            Severity::Info => 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationConflict {
    pub conflict_type: ConflictType,
    pub strategy_point: SelectedPoint,
    pub description: String,
    pub severity: Severity,
    #[serde(default)]
    pub affected_die_id: Option<String>,
    #[serde(default)]
    pub recommendation: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub id: uuid::Uuid,
    pub strategy_id: String,
    pub schematic_id: String,
    pub validation_status: ValidationStatus,
    pub alignment_score: f64,
    pub coverage_pct: f64,
    pub total_points: usize,
    pub valid_points: usize,
    pub conflicts: Vec<ValidationConflict>,
    pub warnings: Vec<String>,
    pub recommendations: Vec<String>,
    pub validated_by: String,
    pub validation_date: chrono::DateTime<chrono::Utc>,
}

/// Builds a `WaferMap` from a schematic's die boundaries: one `Die` per
/// boundary, grid position assigned by sorting centers in row-major order
/// (spec.md 4.7 step 1). Rows are detected by clustering centers whose `y`
/// falls within half the median die height of each other; within a row,
/// dies are ordered by ascending `x`. Returns the wafer plus a lookup from
/// grid coordinate back to the originating boundary index, which doubles as
/// the "interval index" the validator queries selected points against.
fn wafer_from_schematic(schematic: &SchematicData) -> (WaferMap, HashMap<DieCoord, usize>) {
    let mut indexed: Vec<(usize, Point2D)> = schematic
        .dies
        .iter()
        .enumerate()
        .map(|(i, d)| (i, d.center()))
        .collect();
    indexed.sort_by(|a, b| {
        a.1.y
            .partial_cmp(&b.1.y)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.1.x.partial_cmp(&b.1.x).unwrap_or(std::cmp::Ordering::Equal))
    });

    let median_height = {
        let mut heights: Vec<f64> = schematic.dies.iter().map(|d| d.height).collect();
        heights.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        heights.get(heights.len() / 2).copied().unwrap_or(1.0).max(f64::EPSILON)
    };
    let row_tolerance = median_height / 2.0;

    let mut wafer = WaferMap::new();
    let mut grid_to_die: HashMap<DieCoord, usize> = HashMap::with_capacity(indexed.len());
    let mut grid_y = 0i64;
    let mut grid_x = 0i64;
    let mut row_anchor_y = indexed.first().map(|(_, p)| p.y);

    for (die_index, center) in &indexed {
        if let Some(anchor) = row_anchor_y {
            if (center.y - anchor).abs() > row_tolerance {
                grid_y += 1;
                grid_x = 0;
                row_anchor_y = Some(center.y);
            }
        }
        let die = &schematic.dies[*die_index];
        wafer.insert(Die { x: grid_x, y: grid_y, available: die.available });
        grid_to_die.insert(DieCoord::new(grid_x, grid_y), *die_index);
        grid_x += 1;
    }
    (wafer, grid_to_die)
}

/// Finds the `DieBoundary` a selected (grid-space) point maps onto, if any.
fn locate_boundary<'a>(
    dies: &'a [DieBoundary],
    grid_to_die: &HashMap<DieCoord, usize>,
    point: Point2D,
) -> Option<&'a DieBoundary> {
    let coord = DieCoord::new(point.x.round() as i64, point.y.round() as i64);
    grid_to_die.get(&coord).map(|&i| &dies[i])
}

fn recommend(conflicts: &[ValidationConflict]) -> Vec<String> {
    if conflicts.is_empty() {
        return Vec::new();
    }
    let mut counts: std::collections::HashMap<ConflictType, usize> = std::collections::HashMap::new();
    for c in conflicts {
        *counts.entry(c.conflict_type).or_insert(0) += 1;
    }
    let dominant = counts
        .into_iter()
        .max_by_key(|(_, n)| *n)
        .map(|(t, _)| t);

    let mut out = Vec::new();
    match dominant {
        Some(ConflictType::OutOfBounds) => {
            out.push("Adjust transformation offset or edge margin.".to_string())
        }
        Some(ConflictType::DuplicateSite) => {
            out.push("Increase minSpacing or reduce overlapping rules.".to_string())
        }
        Some(ConflictType::UnavailableDie) => {
            out.push("Exclude unavailable dies via a tighter conditional filter.".to_string())
        }
        Some(ConflictType::ClusterViolation) => {
            out.push("Spread sampling density; lower maxClusterDensity candidates.".to_string())
        }
        Some(ConflictType::Overlap) => {
            out.push("Review rule weights contributing overlapping candidates.".to_string())
        }
        None => {}
    }
    out
}

/// Runs the full alignment check (spec.md 4.7).
pub fn validate(
    schematic: &SchematicData,
    compiled: &CompiledStrategy,
    mode: ValidationMode,
    max_cluster_density: usize,
) -> ValidationResult {
    let (wafer, grid_to_die) = wafer_from_schematic(schematic);
    let exec_ctx = ExecutionContext {
        wafer_size: schematic.wafer_size.clone(),
        ..Default::default()
    };
    let sim = execute(compiled, &wafer, &exec_ctx);

    let mut conflicts = Vec::new();
    let mut seen_boundaries: HashMap<String, usize> = HashMap::new();

    let median_width = {
        let mut widths: Vec<f64> = schematic.dies.iter().map(|d| d.width).collect();
        widths.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        widths.get(widths.len() / 2).copied().unwrap_or(1.0)
    };

    for point in &sim.selected_points {
        let p = Point2D::new(point.x, point.y);
        match locate_boundary(&schematic.dies, &grid_to_die, p) {
            None => {
                conflicts.push(ValidationConflict {
                    conflict_type: ConflictType::OutOfBounds,
                    strategy_point: point.clone(),
                    description: format!("point ({:.3}, {:.3}) falls outside every die boundary", point.x, point.y),
                    severity: if mode == ValidationMode::Strict { Severity::Error } else { Severity::Warning },
                    affected_die_id: None,
                    recommendation: None,
                });
            }
            Some(boundary) => {
                let prior = *seen_boundaries.get(&boundary.die_id).unwrap_or(&0);
                seen_boundaries.insert(boundary.die_id.clone(), prior + 1);
                if prior > 0 {
                    conflicts.push(ValidationConflict {
                        conflict_type: ConflictType::DuplicateSite,
                        strategy_point: point.clone(),
                        description: format!("die `{}` already has a selected point", boundary.die_id),
                        severity: if mode == ValidationMode::Strict { Severity::Error } else { Severity::Warning },
                        affected_die_id: Some(boundary.die_id.clone()),
                        recommendation: None,
                    });
                }
                if !boundary.available {
                    conflicts.push(ValidationConflict {
                        conflict_type: ConflictType::UnavailableDie,
                        strategy_point: point.clone(),
                        description: format!("die `{}` is marked unavailable", boundary.die_id),
                        severity: Severity::Warning,
                        affected_die_id: Some(boundary.die_id.clone()),
                        recommendation: None,
                    });
                }
            }
        }
    }

    // Cluster density: more than max_cluster_density points within a radius
    // of the median die width of each other.
    for (i, p1) in sim.selected_points.iter().enumerate() {
        let neighbors = sim
            .selected_points
            .iter()
            .filter(|p2| {
                let d = ((p1.x - p2.x).powi(2) + (p1.y - p2.y).powi(2)).sqrt();
                d <= median_width
            })
            .count();
        if neighbors > max_cluster_density + 1 {
            conflicts.push(ValidationConflict {
                conflict_type: ConflictType::ClusterViolation,
                strategy_point: sim.selected_points[i].clone(),
                description: format!(
                    "{neighbors} points within {median_width:.3} units of ({:.3}, {:.3}), exceeding max density {max_cluster_density}",
                    p1.x, p1.y
                ),
                severity: Severity::Warning,
                affected_die_id: None,
                recommendation: None,
            });
        }
    }

    let total_points = sim.selected_points.len();
    let weighted: f64 = conflicts.iter().map(|c| c.severity.weight()).sum();
    let alignment_score = if total_points > 0 {
        (1.0 - weighted / total_points as f64).clamp(0.0, 1.0)
    } else {
        1.0
    };

    let valid_points = total_points.saturating_sub(
        conflicts
            .iter()
            .filter(|c| matches!(c.conflict_type, ConflictType::OutOfBounds | ConflictType::UnavailableDie))
            .count(),
    );

    let total_boundaries = schematic.dies.len();
    let distinct_hit = seen_boundaries.len();
    let coverage_pct = if total_boundaries > 0 {
        (distinct_hit as f64 / total_boundaries as f64) * 100.0
    } else {
        0.0
    };

    let has_error = conflicts.iter().any(|c| c.severity == Severity::Error);
    let validation_status = if has_error {
        ValidationStatus::Fail
    } else if alignment_score >= 0.9 {
        ValidationStatus::Pass
    } else if alignment_score >= 0.5 {
        ValidationStatus::Warning
    } else {
        ValidationStatus::Fail
    };

    let recommendations = recommend(&conflicts);

    ValidationResult {
        id: uuid::Uuid::new_v4(),
        strategy_id: compiled.strategy_id.clone(),
        schematic_id: schematic.id.clone(),
        validation_status,
        alignment_score,
        coverage_pct,
        total_points,
        valid_points,
        conflicts,
        warnings: sim.warnings,
        recommendations,
        validated_by: "system".to_string(),
        validation_date: chrono::Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Bounds;
    use crate::registry::bootstrap;
    use crate::schematic::{FormatType, SchematicSourceMetadata};
    use crate::strategy::compiler::compile;
    use crate::strategy::{LifecycleState, RuleConfig, StrategyDefinition, StrategyType};
    use chrono::Utc;

    fn grid_schematic(n: i64) -> SchematicData {
        let mut dies = Vec::new();
        for x in 0..n {
            for y in 0..n {
                let bounds = Bounds::new(x as f64, y as f64, x as f64 + 1.0, y as f64 + 1.0);
                dies.push(DieBoundary::from_bounds(format!("die_{x}_{y}"), bounds, true));
            }
        }
        SchematicData::new(
            "s1",
            "f.svg",
            FormatType::Svg,
            crate::geometry::CoordinateSystem::SvgUnits,
            None,
            dies,
            SchematicSourceMetadata::default(),
        )
    }

    fn compiled_fixed_point(
        points: Vec<(i64, i64)>,
        transformations: Option<crate::geometry::TransformationConfig>,
    ) -> CompiledStrategy {
        let (rules_reg, vendor_reg) = bootstrap();
        let def = StrategyDefinition {
            id: uuid::Uuid::new_v4(),
            name: "s".to_string(),
            description: String::new(),
            strategy_type: StrategyType::FixedPoint,
            process_step: "etch".to_string(),
            tool_type: "toolA".to_string(),
            rules: vec![RuleConfig {
                rule_type: "fixedPoint".to_string(),
                parameters: serde_json::json!({ "points": points.iter().map(|(x,y)| [x,y]).collect::<Vec<_>>() }),
                weight: 1.0,
                enabled: true,
                conditions: None,
            }],
            global_conditions: None,
            transformations,
            target_vendor: None,
            vendor_specific_params: serde_json::json!({}),
            version: "1.0.0".to_string(),
            author: "tester".to_string(),
            created_at: Utc::now(),
            modified_at: Utc::now(),
            lifecycle_state: LifecycleState::Draft,
            schema_version: 1,
        };
        compile(&def, &rules_reg, &vendor_reg).expect("compiles")
    }

    #[test]
    fn aligned_points_score_well() {
        let schematic = grid_schematic(3);
        let compiled = compiled_fixed_point(vec![(0, 0)], None);
        let result = validate(&schematic, &compiled, ValidationMode::Permissive, 3);
        assert!(result.alignment_score > 0.5);
        assert_eq!(result.total_points, 1);
    }

    #[test]
    fn strict_mode_escalates_out_of_bounds_to_error() {
        let schematic = grid_schematic(2);
        let mut transform = crate::geometry::TransformationConfig::default();
        transform.offset_x = 50.0;
        transform.offset_y = 50.0;
        let compiled = compiled_fixed_point(vec![(0, 0)], Some(transform));
        let result = validate(&schematic, &compiled, ValidationMode::Strict, 3);
        assert!(result.conflicts.iter().any(|c| c.severity == Severity::Error));
        assert_eq!(result.validation_status, ValidationStatus::Fail);
    }
}
