//! `fixedPoint` rule: emits exactly the configured points, priority 1.0,
//! dropping coordinates absent from the wafer map with a warning (spec.md
//! 4.4).

use super::{CostClass, CostEstimate, Rule, RuleContext, RuleOutcome};
use crate::error::FieldError;
use crate::wafer::{DieCoord, WaferMap};

pub struct FixedPointRule;

fn parse_points(params: &serde_json::Value) -> Result<Vec<DieCoord>, Vec<FieldError>> {
    let raw = params
        .get("points")
        .and_then(|v| v.as_array())
        .ok_or_else(|| vec![FieldError::on_field("points", "missing or non-array field `points`")])?;

    let mut points = Vec::with_capacity(raw.len());
    let mut errors = Vec::new();
    for (i, p) in raw.iter().enumerate() {
        let pair = p.as_array();
        match pair {
            Some(pair) if pair.len() == 2 => {
                let x = pair[0].as_i64();
                let y = pair[1].as_i64();
                match (x, y) {
                    (Some(x), Some(y)) => points.push(DieCoord::new(x, y)),
                    _ => errors.push(FieldError::on_field(
                        format!("points[{i}]"),
                        "expected [x, y] integer pair",
                    )),
                }
            }
            _ => errors.push(FieldError::on_field(
                format!("points[{i}]"),
                "expected [x, y] integer pair",
            )),
        }
    }
    if !errors.is_empty() {
        return Err(errors);
    }
    Ok(points)
}

impl Rule for FixedPointRule {
    fn validate(&self, params: &serde_json::Value) -> Result<serde_json::Value, Vec<FieldError>> {
        let points = parse_points(params)?;
        if points.is_empty() {
            return Err(vec![FieldError::on_field("points", "must contain at least one point")]);
        }
        Ok(serde_json::json!({ "points": points.iter().map(|p| [p.x, p.y]).collect::<Vec<_>>() }))
    }

    fn apply(&self, wafer: &WaferMap, params: &serde_json::Value, _ctx: &RuleContext) -> RuleOutcome {
        let points = parse_points(params).unwrap_or_default();
        let mut candidates = Vec::new();
        let mut warnings = Vec::new();
        for p in points {
            if wafer.contains(p) {
                candidates.push((p, 1.0));
            } else {
                warnings.push(format!("fixedPoint: coordinate ({}, {}) not present in wafer map, dropped", p.x, p.y));
            }
        }
        RuleOutcome { candidates, warnings }
    }

    fn estimate(&self, _wafer: &WaferMap, params: &serde_json::Value) -> CostEstimate {
        let count = parse_points(params).map(|p| p.len()).unwrap_or(1);
        CostEstimate { expected_point_count: count.max(1), expected_cost_class: CostClass::Low }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wafer::Die;

    #[test]
    fn drops_missing_coordinates_with_warning() {
        let mut wafer = WaferMap::new();
        wafer.insert(Die { x: 0, y: 0, available: true });
        let params = serde_json::json!({ "points": [[0, 0], [5, 5]] });
        let outcome = FixedPointRule.apply(&wafer, &params, &RuleContext::default());
        assert_eq!(outcome.candidates, vec![(DieCoord::new(0, 0), 1.0)]);
        assert_eq!(outcome.warnings.len(), 1);
    }
}
