//! `uniformGrid` rule: lattice points snapped to the nearest available die
//! (spec.md 4.4).

use super::{optional_f64, require_f64, CostClass, CostEstimate, Rule, RuleContext, RuleOutcome};
use crate::error::FieldError;
use crate::geometry::{distance, Point2D};
use crate::wafer::WaferMap;

pub struct UniformGridRule;

struct Params {
    grid_spacing: f64,
    offset_x: f64,
    offset_y: f64,
    rotation_deg: f64,
}

fn parse(params: &serde_json::Value) -> Result<Params, Vec<FieldError>> {
    let grid_spacing = require_f64(params, "gridSpacing").map_err(|e| vec![e])?;
    if grid_spacing <= 0.0 {
        return Err(vec![FieldError::on_field("gridSpacing", "must be > 0")]);
    }
    Ok(Params {
        grid_spacing,
        offset_x: optional_f64(params, "offsetX", 0.0),
        offset_y: optional_f64(params, "offsetY", 0.0),
        rotation_deg: optional_f64(params, "rotation", 0.0),
    })
}

impl Rule for UniformGridRule {
    fn validate(&self, params: &serde_json::Value) -> Result<serde_json::Value, Vec<FieldError>> {
        let p = parse(params)?;
        Ok(serde_json::json!({
            "gridSpacing": p.grid_spacing,
            "offsetX": p.offset_x,
            "offsetY": p.offset_y,
            "rotation": p.rotation_deg,
        }))
    }

    fn apply(&self, wafer: &WaferMap, params: &serde_json::Value, _ctx: &RuleContext) -> RuleOutcome {
        let p = match parse(params) {
            Ok(p) => p,
            Err(_) => return RuleOutcome::default(),
        };

        let available: Vec<_> = wafer.available_dies().collect();
        if available.is_empty() {
            return RuleOutcome::default();
        }

        let xs: Vec<f64> = available.iter().map(|d| d.x as f64).collect();
        let ys: Vec<f64> = available.iter().map(|d| d.y as f64).collect();
        let (xmin, xmax) = (xs.iter().cloned().fold(f64::INFINITY, f64::min), xs.iter().cloned().fold(f64::NEG_INFINITY, f64::max));
        let (ymin, ymax) = (ys.iter().cloned().fold(f64::INFINITY, f64::min), ys.iter().cloned().fold(f64::NEG_INFINITY, f64::max));

        let theta = p.rotation_deg.to_radians();
        let (sin, cos) = theta.sin_cos();

        let span_x = (xmax - xmin).abs() + p.grid_spacing * 2.0;
        let span_y = (ymax - ymin).abs() + p.grid_spacing * 2.0;
        let n_i = (span_x / p.grid_spacing).ceil() as i64 + 2;
        let n_j = (span_y / p.grid_spacing).ceil() as i64 + 2;

        let mut candidates = Vec::new();
        for i in -n_i..=n_i {
            for j in -n_j..=n_j {
                let gx = p.offset_x + i as f64 * p.grid_spacing;
                let gy = p.offset_y + j as f64 * p.grid_spacing;
                // rotate about the origin
                let rx = gx * cos - gy * sin;
                let ry = gx * sin + gy * cos;
                if rx < xmin - p.grid_spacing || rx > xmax + p.grid_spacing
                    || ry < ymin - p.grid_spacing || ry > ymax + p.grid_spacing
                {
                    continue;
                }
                let lattice_point = Point2D::new(rx, ry);
                if let Some((coord, dist)) = nearest_available(&available, lattice_point) {
                    let priority = (1.0 - dist / p.grid_spacing).clamp(0.0, 1.0);
                    candidates.push((coord, priority));
                }
            }
        }

        RuleOutcome { candidates, warnings: Vec::new() }
    }

    fn estimate(&self, wafer: &WaferMap, _params: &serde_json::Value) -> CostEstimate {
        let n = wafer.available_count();
        CostEstimate {
            expected_point_count: n,
            expected_cost_class: if n > 10_000 { CostClass::High } else { CostClass::Medium },
        }
    }
}

fn nearest_available(
    available: &[&crate::wafer::Die],
    point: Point2D,
) -> Option<(crate::wafer::DieCoord, f64)> {
    available
        .iter()
        .map(|d| {
            let dist = distance(Point2D::new(d.x as f64, d.y as f64), point);
            (d.coord(), dist)
        })
        .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wafer::Die;

    #[test]
    fn snaps_to_nearest_available_die() {
        let mut wafer = WaferMap::new();
        for x in 0..4 {
            for y in 0..4 {
                wafer.insert(Die { x, y, available: true });
            }
        }
        let params = serde_json::json!({ "gridSpacing": 2.0, "offsetX": 0.0, "offsetY": 0.0, "rotation": 0.0 });
        let outcome = UniformGridRule.apply(&wafer, &params, &RuleContext::default());
        assert!(!outcome.candidates.is_empty());
        for (_, priority) in &outcome.candidates {
            assert!(*priority >= 0.0 && *priority <= 1.0);
        }
    }
}
