//! Plugin registry (C3).
//!
//! Two parallel name -> factory maps, one for rules and one for vendor
//! emitters, in the same shape as `strategy_factory::make_strategy` /
//! `available_strategies`: case-insensitive lookup by name, with the
//! `unknownPlugin` error listing every registered name so callers (and the
//! wizard UI) can self-correct. Registration happens once at process
//! bootstrap; after that, reads need no synchronization (spec.md 5).

use crate::error::EngineError;
use crate::rules::Rule;
use crate::vendor::VendorEmitter;
use std::collections::HashMap;
use std::sync::Arc;

type RuleFactory = Arc<dyn Fn() -> Box<dyn Rule> + Send + Sync>;
type VendorFactory = Arc<dyn Fn() -> Box<dyn VendorEmitter> + Send + Sync>;

#[derive(Default)]
pub struct RuleRegistry {
    factories: HashMap<String, RuleFactory>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str, factory: impl Fn() -> Box<dyn Rule> + Send + Sync + 'static) {
        self.factories.insert(name.to_ascii_lowercase(), Arc::new(factory));
    }

    pub fn create(&self, name: &str) -> Result<Box<dyn Rule>, EngineError> {
        self.factories
            .get(&name.to_ascii_lowercase())
            .map(|f| f())
            .ok_or_else(|| EngineError::UnknownPlugin {
                kind: "rule",
                name: name.to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(&name.to_ascii_lowercase())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}

#[derive(Default)]
pub struct VendorRegistry {
    factories: HashMap<String, VendorFactory>,
}

impl VendorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str, factory: impl Fn() -> Box<dyn VendorEmitter> + Send + Sync + 'static) {
        self.factories.insert(name.to_ascii_lowercase(), Arc::new(factory));
    }

    pub fn create(&self, name: &str) -> Result<Box<dyn VendorEmitter>, EngineError> {
        self.factories
            .get(&name.to_ascii_lowercase())
            .map(|f| f())
            .ok_or_else(|| EngineError::UnknownPlugin {
                kind: "vendor",
                name: name.to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(&name.to_ascii_lowercase())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Builds the registries with every built-in rule/vendor registered, the way
/// bootstrap code in `main.rs` wires state before the listener binds.
pub fn bootstrap() -> (RuleRegistry, VendorRegistry) {
    let mut rules = RuleRegistry::new();
    rules.register("fixedPoint", || Box::new(crate::rules::fixed_point::FixedPointRule));
    rules.register("centerEdge", || Box::new(crate::rules::center_edge::CenterEdgeRule));
    rules.register("uniformGrid", || Box::new(crate::rules::uniform_grid::UniformGridRule));
    rules.register("randomSampling", || Box::new(crate::rules::random_sampling::RandomSamplingRule));

    let mut vendors = VendorRegistry::new();
    vendors.register("asml", || Box::new(crate::vendor::asml::AsmlEmitter));
    vendors.register("kla", || Box::new(crate::vendor::kla::KlaEmitter));

    (rules, vendors)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_plugin_lists_available_names() {
        let (rules, _) = bootstrap();
        let err = rules.create("not_a_rule").unwrap_err();
        match err {
            EngineError::UnknownPlugin { kind, name } => {
                assert_eq!(kind, "rule");
                assert_eq!(name, "not_a_rule");
            }
            _ => panic!("expected UnknownPlugin"),
        }
        assert!(rules.names().contains(&"fixedpoint".to_string()));
    }
}
