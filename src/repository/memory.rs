//! In-memory repository backend: used by tests and by deployments that
//! embed the engine without a filesystem (spec.md 4.9 — the contract
//! prescribes behavior, not backend). Writes to a single strategy aggregate
//! are serialized by that aggregate's own `RwLock` (spec.md §5's "per-key
//! mutex" sharded naturally across `Uuid` keys); reads see either the
//! pre- or post-update version, never a partial one, because a writer holds
//! the lock for the whole append.

use super::{
    bump_version, next_promotion_state, not_found, ReviewAudit, SchematicRepo, StrategyFilter,
    StrategyRepo, StrategyUpdate, ValidationRepo, VersionBump,
};
use crate::error::{EngineError, EngineResult};
use crate::lifecycle::check_transition;
use crate::schematic::SchematicData;
use crate::strategy::compiler::compile;
use crate::strategy::{LifecycleState, StrategyDefinition};
use crate::validator::ValidationResult;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

fn state_name(s: LifecycleState) -> String {
    match s {
        LifecycleState::Draft => "draft",
        LifecycleState::Review => "review",
        LifecycleState::Approved => "approved",
        LifecycleState::Active => "active",
        LifecycleState::Deprecated => "deprecated",
    }
    .to_string()
}

struct StrategyAggregate {
    versions: Vec<StrategyDefinition>,
    audit: ReviewAudit,
}

impl StrategyAggregate {
    fn latest(&self) -> StrategyDefinition {
        self.versions
            .last()
            .cloned()
            .expect("aggregate always holds at least one version")
    }
}

#[derive(Default)]
pub struct InMemoryStrategyRepo {
    by_id: RwLock<HashMap<Uuid, Arc<RwLock<StrategyAggregate>>>>,
    /// (processStep, toolType) -> currently active strategy id (spec.md
    /// 4.9's "at most one active version per (processStep, toolType)").
    active_index: Mutex<HashMap<(String, String), Uuid>>,
}

impl InMemoryStrategyRepo {
    pub fn new() -> Self {
        Self::default()
    }

    fn aggregate(&self, id: Uuid) -> EngineResult<Arc<RwLock<StrategyAggregate>>> {
        self.by_id
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found("strategy", id))
    }

    /// Moves `id`'s current version straight to `deprecated`, without
    /// touching `active_index` (the caller already holds that responsibility
    /// when this is used to auto-deprecate a prior active version).
    fn force_deprecate(&self, id: Uuid, _actor: &str) -> EngineResult<()> {
        let agg = self.aggregate(id)?;
        let mut write = agg.write();
        let latest = write.latest();
        check_transition(latest.lifecycle_state, LifecycleState::Deprecated)?;
        let mut updated = latest.clone();
        updated.lifecycle_state = LifecycleState::Deprecated;
        updated.modified_at = Utc::now();
        write.versions.push(updated);
        Ok(())
    }
}

#[async_trait]
impl StrategyRepo for InMemoryStrategyRepo {
    async fn create(&self, def: StrategyDefinition) -> EngineResult<StrategyDefinition> {
        if def.name.trim().is_empty() {
            return Err(EngineError::ValidationError {
                errors: vec![crate::error::FieldError::on_field("name", "name must not be empty")],
            });
        }
        let id = def.id;
        let agg = StrategyAggregate { versions: vec![def.clone()], audit: ReviewAudit::default() };
        self.by_id.write().insert(id, Arc::new(RwLock::new(agg)));
        Ok(def)
    }

    async fn get(&self, id: Uuid, version: Option<&str>) -> EngineResult<StrategyDefinition> {
        let agg = self.aggregate(id)?;
        let read = agg.read();
        match version {
            None => Ok(read.latest()),
            Some(v) => read
                .versions
                .iter()
                .rev()
                .find(|d| d.version == v)
                .cloned()
                .ok_or_else(|| not_found("strategy version", format!("{id}@{v}"))),
        }
    }

    async fn get_current(&self, id: Uuid) -> EngineResult<StrategyDefinition> {
        self.get(id, None).await
    }

    async fn list(&self, filter: &StrategyFilter) -> EngineResult<Vec<StrategyDefinition>> {
        let by_id = self.by_id.read();
        Ok(by_id
            .values()
            .map(|agg| agg.read().latest())
            .filter(|d| filter.matches(d))
            .collect())
    }

    async fn update(
        &self,
        id: Uuid,
        update: StrategyUpdate,
        bump: VersionBump,
    ) -> EngineResult<StrategyDefinition> {
        let agg = self.aggregate(id)?;
        let mut write = agg.write();
        let latest = write.latest();

        let mut next = latest.clone();
        if let Some(v) = update.name {
            next.name = v;
        }
        if let Some(v) = update.description {
            next.description = v;
        }
        if let Some(v) = update.process_step {
            next.process_step = v;
        }
        if let Some(v) = update.tool_type {
            next.tool_type = v;
        }
        if let Some(v) = update.rules {
            next.rules = v;
        }
        if let Some(v) = update.global_conditions {
            next.global_conditions = v;
        }
        if let Some(v) = update.transformations {
            next.transformations = v;
        }
        if let Some(v) = update.target_vendor {
            next.target_vendor = v;
        }
        if let Some(v) = update.vendor_specific_params {
            next.vendor_specific_params = v;
        }

        next.version = bump_version(&latest.version, bump);
        next.modified_at = Utc::now();
        // Mutating an approved-or-later strategy forks a new draft rather
        // than editing the live version in place (spec.md 4.9 "Versioning").
        if matches!(
            latest.lifecycle_state,
            LifecycleState::Approved | LifecycleState::Active | LifecycleState::Deprecated
        ) {
            next.lifecycle_state = LifecycleState::Draft;
        }

        write.versions.push(next.clone());
        write.audit = ReviewAudit::default();
        Ok(next)
    }

    async fn delete(&self, id: Uuid) -> EngineResult<()> {
        let removed = self.by_id.write().remove(&id);
        if removed.is_none() {
            return Err(not_found("strategy", id));
        }
        self.active_index.lock().retain(|_, v| *v != id);
        Ok(())
    }

    async fn promote(
        &self,
        id: Uuid,
        actor: &str,
        rules_registry: &crate::registry::RuleRegistry,
        vendor_registry: &crate::registry::VendorRegistry,
    ) -> EngineResult<StrategyDefinition> {
        let agg = self.aggregate(id)?;
        let latest = agg.read().latest();

        let to_state = next_promotion_state(latest.lifecycle_state).ok_or_else(|| {
            EngineError::LifecycleViolation {
                from: state_name(latest.lifecycle_state),
                to: state_name(latest.lifecycle_state),
                reason: "no further promotion is possible from this state".to_string(),
            }
        })?;
        check_transition(latest.lifecycle_state, to_state)?;

        match to_state {
            LifecycleState::Review => {
                if !latest.has_rules() {
                    return Err(EngineError::LifecycleViolation {
                        from: state_name(latest.lifecycle_state),
                        to: state_name(to_state),
                        reason: "strategy must declare at least one rule before review".to_string(),
                    });
                }
                if let Err(reasons) = compile(&latest, rules_registry, vendor_registry) {
                    return Err(EngineError::CompileError { reasons });
                }
            }
            LifecycleState::Approved => {
                if !agg.read().audit.last_simulation_clean {
                    return Err(EngineError::LifecycleViolation {
                        from: state_name(latest.lifecycle_state),
                        to: state_name(to_state),
                        reason: "latest simulation has not completed without errors".to_string(),
                    });
                }
            }
            LifecycleState::Active => {
                let key = (latest.process_step.clone(), latest.tool_type.clone());
                let prior = {
                    let mut idx = self.active_index.lock();
                    let prior = idx.get(&key).copied();
                    idx.insert(key, id);
                    prior
                };
                if let Some(prior_id) = prior {
                    if prior_id != id {
                        // Canonical lock order (lexicographic by id) avoids
                        // deadlocking against a concurrent promote on the
                        // other strategy (spec.md §5).
                        let (first, second) = if prior_id.to_string() < id.to_string() {
                            (prior_id, id)
                        } else {
                            (id, prior_id)
                        };
                        let _ = (first, second);
                        self.force_deprecate(prior_id, actor)?;
                    }
                }
            }
            LifecycleState::Draft | LifecycleState::Deprecated => unreachable!(),
        }

        let mut write = agg.write();
        let mut updated = latest.clone();
        updated.lifecycle_state = to_state;
        updated.modified_at = Utc::now();
        if to_state == LifecycleState::Approved {
            write.audit.reviewed_by = Some(actor.to_string());
            write.audit.reviewed_at = Some(Utc::now());
        }
        write.versions.push(updated.clone());
        Ok(updated)
    }

    async fn retract(&self, id: Uuid, _actor: &str) -> EngineResult<StrategyDefinition> {
        let agg = self.aggregate(id)?;
        let mut write = agg.write();
        let latest = write.latest();
        check_transition(latest.lifecycle_state, LifecycleState::Draft)?;
        let mut updated = latest.clone();
        updated.lifecycle_state = LifecycleState::Draft;
        updated.modified_at = Utc::now();
        write.versions.push(updated.clone());
        write.audit = ReviewAudit::default();
        Ok(updated)
    }

    async fn deprecate(&self, id: Uuid, actor: &str) -> EngineResult<StrategyDefinition> {
        self.force_deprecate(id, actor)?;
        self.active_index.lock().retain(|_, v| *v != id);
        self.get_current(id).await
    }

    async fn clone_strategy(
        &self,
        id: Uuid,
        new_name: &str,
        author: &str,
    ) -> EngineResult<StrategyDefinition> {
        let source = self.get_current(id).await?;
        let cloned = StrategyDefinition {
            id: Uuid::new_v4(),
            name: new_name.to_string(),
            version: "1.0.0".to_string(),
            author: author.to_string(),
            created_at: Utc::now(),
            modified_at: Utc::now(),
            lifecycle_state: LifecycleState::Draft,
            ..source
        };
        self.create(cloned).await
    }

    async fn record_simulation(&self, id: Uuid, version: &str, had_errors: bool) -> EngineResult<()> {
        let agg = self.aggregate(id)?;
        let mut write = agg.write();
        if write.latest().version == version {
            write.audit.last_simulation_clean = !had_errors;
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemorySchematicRepo {
    by_id: RwLock<HashMap<String, SchematicData>>,
}

impl InMemorySchematicRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SchematicRepo for InMemorySchematicRepo {
    async fn store(&self, data: SchematicData) -> EngineResult<SchematicData> {
        self.by_id.write().insert(data.id.clone(), data.clone());
        Ok(data)
    }

    async fn get(&self, id: &str) -> EngineResult<SchematicData> {
        self.by_id
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| not_found("schematic", id))
    }

    async fn list(&self) -> EngineResult<Vec<SchematicData>> {
        Ok(self.by_id.read().values().cloned().collect())
    }

    async fn delete(&self, id: &str) -> EngineResult<()> {
        self.by_id
            .write()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| not_found("schematic", id))
    }

    async fn update_metadata(
        &self,
        id: &str,
        tags: Option<Vec<String>>,
        notes: Option<Option<String>>,
    ) -> EngineResult<SchematicData> {
        let mut by_id = self.by_id.write();
        let entry = by_id.get_mut(id).ok_or_else(|| not_found("schematic", id))?;
        if let Some(tags) = tags {
            entry.tags = tags;
        }
        if let Some(notes) = notes {
            entry.notes = notes;
        }
        Ok(entry.clone())
    }
}

#[derive(Default)]
pub struct InMemoryValidationRepo {
    by_id: RwLock<HashMap<Uuid, ValidationResult>>,
}

impl InMemoryValidationRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ValidationRepo for InMemoryValidationRepo {
    async fn store(&self, result: ValidationResult) -> EngineResult<ValidationResult> {
        self.by_id.write().insert(result.id, result.clone());
        Ok(result)
    }

    async fn get(&self, id: Uuid) -> EngineResult<ValidationResult> {
        self.by_id
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found("validationResult", id))
    }

    async fn list_by_schematic(&self, schematic_id: &str) -> EngineResult<Vec<ValidationResult>> {
        Ok(self
            .by_id
            .read()
            .values()
            .filter(|v| v.schematic_id == schematic_id)
            .cloned()
            .collect())
    }

    async fn list_by_strategy(&self, strategy_id: &str) -> EngineResult<Vec<ValidationResult>> {
        Ok(self
            .by_id
            .read()
            .values()
            .filter(|v| v.strategy_id == strategy_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::bootstrap;
    use crate::strategy::{RuleConfig, StrategyType};

    fn draft(process_step: &str, tool_type: &str) -> StrategyDefinition {
        StrategyDefinition {
            id: Uuid::new_v4(),
            name: "s".to_string(),
            description: String::new(),
            strategy_type: StrategyType::FixedPoint,
            process_step: process_step.to_string(),
            tool_type: tool_type.to_string(),
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

    #[tokio::test]
    async fn full_promotion_chain() {
        let repo = InMemoryStrategyRepo::new();
        let (rules, vendors) = bootstrap();
        let def = draft("etch", "toolA");
        let id = def.id;
        repo.create(def).await.unwrap();

        let reviewed = repo.promote(id, "alice", &rules, &vendors).await.unwrap();
        assert_eq!(reviewed.lifecycle_state, LifecycleState::Review);

        repo.record_simulation(id, &reviewed.version, false).await.unwrap();
        let approved = repo.promote(id, "alice", &rules, &vendors).await.unwrap();
        assert_eq!(approved.lifecycle_state, LifecycleState::Approved);

        let active = repo.promote(id, "alice", &rules, &vendors).await.unwrap();
        assert_eq!(active.lifecycle_state, LifecycleState::Active);
    }

    #[tokio::test]
    async fn approved_to_active_auto_deprecates_prior() {
        let repo = InMemoryStrategyRepo::new();
        let (rules, vendors) = bootstrap();

        let def_a = draft("etch", "toolA");
        let id_a = def_a.id;
        repo.create(def_a).await.unwrap();
        let r = repo.promote(id_a, "alice", &rules, &vendors).await.unwrap();
        repo.record_simulation(id_a, &r.version, false).await.unwrap();
        repo.promote(id_a, "alice", &rules, &vendors).await.unwrap();
        repo.promote(id_a, "alice", &rules, &vendors).await.unwrap();

        let def_b = draft("etch", "toolA");
        let id_b = def_b.id;
        repo.create(def_b).await.unwrap();
        let r = repo.promote(id_b, "bob", &rules, &vendors).await.unwrap();
        repo.record_simulation(id_b, &r.version, false).await.unwrap();
        repo.promote(id_b, "bob", &rules, &vendors).await.unwrap();
        repo.promote(id_b, "bob", &rules, &vendors).await.unwrap();

        let a_current = repo.get_current(id_a).await.unwrap();
        assert_eq!(a_current.lifecycle_state, LifecycleState::Deprecated);
        let b_current = repo.get_current(id_b).await.unwrap();
        assert_eq!(b_current.lifecycle_state, LifecycleState::Active);
    }

    #[tokio::test]
    async fn review_to_approved_requires_clean_simulation() {
        let repo = InMemoryStrategyRepo::new();
        let (rules, vendors) = bootstrap();
        let def = draft("etch", "toolA");
        let id = def.id;
        repo.create(def).await.unwrap();
        repo.promote(id, "alice", &rules, &vendors).await.unwrap();
        let err = repo.promote(id, "alice", &rules, &vendors).await.unwrap_err();
        assert!(matches!(err, EngineError::LifecycleViolation { .. }));
    }

    #[tokio::test]
    async fn version_never_decreases_across_edits() {
        let repo = InMemoryStrategyRepo::new();
        let def = draft("etch", "toolA");
        let id = def.id;
        repo.create(def).await.unwrap();
        let v1 = repo.update(id, StrategyUpdate::default(), VersionBump::Patch).await.unwrap();
        let v2 = repo.update(id, StrategyUpdate::default(), VersionBump::Minor).await.unwrap();
        assert_eq!(v1.version, "1.0.1");
        assert_eq!(v2.version, "1.1.0");
    }
}
