//! `centerEdge` rule: centroid-nearest center dies plus hull-nearest edge
//! dies (spec.md 4.4).

use super::{require_f64, CostClass, CostEstimate, Rule, RuleContext, RuleOutcome};
use crate::error::FieldError;
use crate::geometry::distance;
use crate::wafer::{DieCoord, WaferMap};
use crate::geometry::Point2D;

pub struct CenterEdgeRule;

struct Params {
    center_count: usize,
    edge_count: usize,
    edge_margin: f64,
}

fn parse(params: &serde_json::Value) -> Result<Params, Vec<FieldError>> {
    let mut errors = Vec::new();
    let center_count = params.get("centerCount").and_then(|v| v.as_u64()).unwrap_or(0) as usize;
    let edge_count = params.get("edgeCount").and_then(|v| v.as_u64()).unwrap_or(0) as usize;
    let edge_margin = match require_f64(params, "edgeMargin") {
        Ok(v) if v >= 0.0 => v,
        Ok(v) => {
            errors.push(FieldError::on_field("edgeMargin", format!("must be >= 0, got {v}")));
            0.0
        }
        Err(e) => {
            errors.push(e);
            0.0
        }
    };
    if center_count == 0 && edge_count == 0 {
        errors.push(FieldError::on_field(
            "centerCount/edgeCount",
            "at least one of centerCount, edgeCount must be > 0",
        ));
    }
    if !errors.is_empty() {
        return Err(errors);
    }
    Ok(Params { center_count, edge_count, edge_margin })
}

impl Rule for CenterEdgeRule {
    fn validate(&self, params: &serde_json::Value) -> Result<serde_json::Value, Vec<FieldError>> {
        let p = parse(params)?;
        Ok(serde_json::json!({
            "centerCount": p.center_count,
            "edgeCount": p.edge_count,
            "edgeMargin": p.edge_margin,
        }))
    }

    fn apply(&self, wafer: &WaferMap, params: &serde_json::Value, _ctx: &RuleContext) -> RuleOutcome {
        let p = match parse(params) {
            Ok(p) => p,
            Err(_) => return RuleOutcome::default(),
        };

        let Some((cx, cy)) = wafer.centroid() else {
            return RuleOutcome::default();
        };
        let centroid = Point2D::new(cx, cy);

        let mut with_dist: Vec<(DieCoord, f64)> = wafer
            .available_dies()
            .map(|d| (d.coord(), distance(Point2D::new(d.x as f64, d.y as f64), centroid)))
            .collect();
        with_dist.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal).then(a.0.x.cmp(&b.0.x)).then(a.0.y.cmp(&b.0.y)));

        let mut candidates = Vec::new();

        let n_center = p.center_count.min(with_dist.len());
        for (i, (coord, _)) in with_dist.iter().take(n_center).enumerate() {
            let priority = if n_center <= 1 {
                1.0
            } else {
                1.0 - (i as f64 / (n_center - 1) as f64)
            };
            candidates.push((*coord, priority));
        }

        let max_dist = with_dist.iter().map(|(_, d)| *d).fold(0.0f64, f64::max);
        if max_dist > 0.0 && p.edge_count > 0 {
            // "closest to the hull minus the edgeMargin ring": farthest dies
            // from centroid, excluding the outermost sliver thinner than
            // edge_margin, which is treated as outside the usable hull.
            let ring_threshold = (max_dist - p.edge_margin).max(0.0);
            let mut edge_candidates: Vec<(DieCoord, f64)> = with_dist
                .iter()
                .filter(|(_, d)| *d <= ring_threshold || p.edge_margin <= 0.0)
                .cloned()
                .collect();
            edge_candidates.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then(a.0.x.cmp(&b.0.x)).then(a.0.y.cmp(&b.0.y)));
            for (coord, dist) in edge_candidates.into_iter().take(p.edge_count) {
                let priority = 0.8 * (dist / max_dist).clamp(0.0, 1.0);
                candidates.push((coord, priority));
            }
        }

        RuleOutcome { candidates, warnings: Vec::new() }
    }

    fn estimate(&self, wafer: &WaferMap, params: &serde_json::Value) -> CostEstimate {
        let n = wafer.available_count();
        let expected = parse(params).map(|p| p.center_count + p.edge_count).unwrap_or(0).min(n);
        CostEstimate {
            expected_point_count: expected,
            expected_cost_class: if n > 10_000 { CostClass::Medium } else { CostClass::Low },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wafer::Die;

    #[test]
    fn center_and_edge_both_populate() {
        let mut wafer = WaferMap::new();
        for x in 0..5 {
            for y in 0..5 {
                wafer.insert(Die { x, y, available: true });
            }
        }
        let params = serde_json::json!({ "centerCount": 2, "edgeCount": 2, "edgeMargin": 1.0 });
        let outcome = CenterEdgeRule.apply(&wafer, &params, &RuleContext::default());
        assert!(outcome.candidates.len() >= 2);
        for (_, priority) in &outcome.candidates {
            assert!(*priority >= 0.0 && *priority <= 1.0);
        }
    }
}
