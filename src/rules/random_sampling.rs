//! `randomSampling` rule: deterministic PRNG draw without replacement from
//! available dies (spec.md 4.4).

use super::{require_usize, CostClass, CostEstimate, Rule, RuleContext, RuleOutcome};
use crate::error::FieldError;
use crate::wafer::WaferMap;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

pub struct RandomSamplingRule;

struct Params {
    count: usize,
    seed: Option<u64>,
}

fn parse(params: &serde_json::Value) -> Result<Params, Vec<FieldError>> {
    let count = require_usize(params, "count").map_err(|e| vec![e])?;
    if count == 0 {
        return Err(vec![FieldError::on_field("count", "must be > 0")]);
    }
    let seed = params.get("seed").and_then(|v| v.as_u64());
    Ok(Params { count, seed })
}

impl Rule for RandomSamplingRule {
    fn validate(&self, params: &serde_json::Value) -> Result<serde_json::Value, Vec<FieldError>> {
        let p = parse(params)?;
        Ok(serde_json::json!({ "count": p.count, "seed": p.seed }))
    }

    fn apply(&self, wafer: &WaferMap, params: &serde_json::Value, ctx: &RuleContext) -> RuleOutcome {
        let p = match parse(params) {
            Ok(p) => p,
            Err(_) => return RuleOutcome::default(),
        };

        let mut available: Vec<_> = wafer.available_dies().map(|d| d.coord()).collect();
        available.sort_by(|a, b| a.x.cmp(&b.x).then(a.y.cmp(&b.y)));
        if available.is_empty() {
            return RuleOutcome::default();
        }

        let seed = p.seed.unwrap_or(ctx.fallback_seed);
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        available.shuffle(&mut rng);

        let n = p.count.min(available.len());
        let candidates = available.into_iter().take(n).map(|c| (c, 0.5)).collect();
        RuleOutcome { candidates, warnings: Vec::new() }
    }

    fn estimate(&self, wafer: &WaferMap, params: &serde_json::Value) -> CostEstimate {
        let n = wafer.available_count();
        let expected = parse(params).map(|p| p.count).unwrap_or(0).min(n);
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
    fn same_seed_same_draw() {
        let mut wafer = WaferMap::new();
        for x in 0..10 {
            wafer.insert(Die { x, y: 0, available: true });
        }
        let params = serde_json::json!({ "count": 3, "seed": 42 });
        let ctx = RuleContext::default();
        let a = RandomSamplingRule.apply(&wafer, &params, &ctx);
        let b = RandomSamplingRule.apply(&wafer, &params, &ctx);
        assert_eq!(a.candidates, b.candidates);
        assert_eq!(a.candidates.len(), 3);
    }

    #[test]
    fn falls_back_to_context_seed_when_unset() {
        let mut wafer = WaferMap::new();
        for x in 0..5 {
            wafer.insert(Die { x, y: 0, available: true });
        }
        let params = serde_json::json!({ "count": 2 });
        let ctx = RuleContext { fallback_seed: 7, ..Default::default() };
        let outcome = RandomSamplingRule.apply(&wafer, &params, &ctx);
        assert_eq!(outcome.candidates.len(), 2);
    }
}
