//! Compiled-strategy cache (spec.md §5): process-wide, read-mostly, entries
//! immutable once inserted, evicted by LRU with a bounded size (default 256).
//! Keyed by `(definitionId, version)` per spec.md §4.5. Hand-rolled rather
//! than pulling in an `lru` crate — the teacher's codebase reaches for
//! `parking_lot::Mutex` plus a plain `HashMap`/order-list combination for
//! its own bounded caches rather than an extra dependency for this shape.

use crate::strategy::compiler::CompiledStrategy;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;

fn cache_key(definition_id: &str, version: &str) -> String {
    format!("{definition_id}@{version}")
}

struct Inner {
    entries: HashMap<String, Arc<CompiledStrategy>>,
    /// Most-recently-used key at the back; eviction pops from the front.
    order: VecDeque<String>,
    capacity: usize,
}

/// Copy-on-write compiled-strategy cache: `get` never mutates an entry in
/// place, `insert` only ever adds a brand-new immutable `Arc`.
pub struct CompiledStrategyCache {
    inner: Mutex<Inner>,
}

impl CompiledStrategyCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                order: VecDeque::new(),
                capacity: capacity.max(1),
            }),
        }
    }

    pub fn get(&self, definition_id: &str, version: &str) -> Option<Arc<CompiledStrategy>> {
        let key = cache_key(definition_id, version);
        let mut inner = self.inner.lock();
        let hit = inner.entries.get(&key).cloned();
        if hit.is_some() {
            inner.order.retain(|k| k != &key);
            inner.order.push_back(key);
        }
        hit
    }

    pub fn insert(&self, definition_id: &str, version: &str, compiled: CompiledStrategy) -> Arc<CompiledStrategy> {
        let key = cache_key(definition_id, version);
        let arc = Arc::new(compiled);
        let mut inner = self.inner.lock();
        inner.order.retain(|k| k != &key);
        inner.order.push_back(key.clone());
        inner.entries.insert(key, arc.clone());
        while inner.entries.len() > inner.capacity {
            if let Some(evict_key) = inner.order.pop_front() {
                inner.entries.remove(&evict_key);
            } else {
                break;
            }
        }
        arc
    }

    /// Evicts every cached entry for a definition id, regardless of version
    /// — used when a strategy is deleted so stale compiled forms never get
    /// served again (spec.md §4.9 repository discipline).
    pub fn invalidate_definition(&self, definition_id: &str) {
        let prefix = format!("{definition_id}@");
        let mut inner = self.inner.lock();
        inner.entries.retain(|k, _| !k.starts_with(&prefix));
        inner.order.retain(|k| !k.starts_with(&prefix));
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for CompiledStrategyCache {
    fn default() -> Self {
        Self::new(crate::config::ResourceLimits::default().compiled_strategy_cache_entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::bootstrap;
    use crate::strategy::compiler::compile;
    use crate::strategy::{LifecycleState, RuleConfig, StrategyDefinition, StrategyType};
    use chrono::Utc;

    fn sample_def() -> StrategyDefinition {
        StrategyDefinition {
            id: uuid::Uuid::new_v4(),
            name: "s".to_string(),
            description: String::new(),
            strategy_type: StrategyType::FixedPoint,
            process_step: "etch".to_string(),
            tool_type: "toolA".to_string(),
            rules: vec![RuleConfig {
                rule_type: "fixedPoint".to_string(),
                parameters: serde_json::json!({ "points": [[0, 0]] }),
                weight: 1.0,
                enabled: true,
                conditions: None,
            }],
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
    fn evicts_oldest_entry_past_capacity() {
        let cache = CompiledStrategyCache::new(2);
        let (rules_reg, vendor_reg) = bootstrap();
        for v in ["1.0.0", "1.0.1", "1.0.2"] {
            let mut def = sample_def();
            def.version = v.to_string();
            let compiled = compile(&def, &rules_reg, &vendor_reg).unwrap();
            cache.insert(&def.id.to_string(), v, compiled);
        }
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn get_refreshes_recency() {
        let cache = CompiledStrategyCache::new(2);
        let (rules_reg, vendor_reg) = bootstrap();
        let mut def_a = sample_def();
        def_a.version = "1.0.0".to_string();
        let id_a = def_a.id.to_string();
        cache.insert(&id_a, "1.0.0", compile(&def_a, &rules_reg, &vendor_reg).unwrap());

        let mut def_b = sample_def();
        def_b.version = "1.0.0".to_string();
        let id_b = def_b.id.to_string();
        cache.insert(&id_b, "1.0.0", compile(&def_b, &rules_reg, &vendor_reg).unwrap());

        // touch `a` so it is no longer the least-recently-used entry
        assert!(cache.get(&id_a, "1.0.0").is_some());

        let mut def_c = sample_def();
        def_c.version = "1.0.0".to_string();
        let id_c = def_c.id.to_string();
        cache.insert(&id_c, "1.0.0", compile(&def_c, &rules_reg, &vendor_reg).unwrap());

        assert!(cache.get(&id_a, "1.0.0").is_some());
        assert!(cache.get(&id_b, "1.0.0").is_none());
    }
}
