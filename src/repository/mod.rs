//! Repository & lifecycle (C9): versioned persistence for the three
//! aggregates (`StrategyDefinition`, `SchematicData`, `ValidationResult`)
//! plus the lifecycle state machine enforcement that sits in front of
//! strategy mutation (spec.md 4.9, 3.6, 5).
//!
//! Domain types stay free of storage concerns (spec.md §9, "ORM ->
//! repository interface + plain data types"): this module exposes one trait
//! per aggregate with CRUD + query methods, the way `UserStore` and
//! `ArtifactStore` do it in the teacher codebase, and two implementations —
//! [`memory`] (HashMap + fine-grained locking, used in tests and for
//! filesystem-less embedding) and [`sqlite`] (the durable backend, schema
//! versioned like `ArtifactStore`).

pub mod memory;
pub mod sqlite;

use crate::error::{EngineError, EngineResult};
use crate::geometry::TransformationConfig;
use crate::schematic::SchematicData;
use crate::strategy::{ConditionalLogic, LifecycleState, RuleConfig, StrategyDefinition};
use crate::validator::ValidationResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Which component of a strategy's semver string bumps on an edit (spec.md
/// 4.9's "caller may request minor/major", default patch).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionBump {
    Patch,
    Minor,
    Major,
}

/// Parses a `major.minor.patch` string (missing components default to 0,
/// unparsable components default to 0 rather than rejecting the whole
/// string — strategies authored outside strict semver still get a bump)
/// and returns the bumped string.
pub fn bump_version(version: &str, bump: VersionBump) -> String {
    let mut parts: Vec<u64> = version
        .split('.')
        .map(|s| s.parse::<u64>().unwrap_or(0))
        .collect();
    parts.resize(3, 0);
    match bump {
        VersionBump::Major => {
            parts[0] += 1;
            parts[1] = 0;
            parts[2] = 0;
        }
        VersionBump::Minor => {
            parts[1] += 1;
            parts[2] = 0;
        }
        VersionBump::Patch => {
            parts[2] += 1;
        }
    }
    format!("{}.{}.{}", parts[0], parts[1], parts[2])
}

/// Sparse update applied to a strategy's mutable fields; `None` leaves the
/// field untouched. Outer `Option` on already-optional fields distinguishes
/// "don't touch" from "set to None".
#[derive(Debug, Clone, Default)]
pub struct StrategyUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub process_step: Option<String>,
    pub tool_type: Option<String>,
    pub rules: Option<Vec<RuleConfig>>,
    pub global_conditions: Option<Option<ConditionalLogic>>,
    pub transformations: Option<Option<TransformationConfig>>,
    pub target_vendor: Option<Option<String>>,
    pub vendor_specific_params: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default)]
pub struct StrategyFilter {
    pub author: Option<String>,
    pub strategy_type: Option<crate::strategy::StrategyType>,
    pub process_step: Option<String>,
    pub lifecycle_state: Option<LifecycleState>,
}

impl StrategyFilter {
    fn matches(&self, def: &StrategyDefinition) -> bool {
        if let Some(a) = &self.author {
            if &def.author != a {
                return false;
            }
        }
        if let Some(t) = self.strategy_type {
            if def.strategy_type != t {
                return false;
            }
        }
        if let Some(p) = &self.process_step {
            if &def.process_step != p {
                return false;
            }
        }
        if let Some(s) = self.lifecycle_state {
            if def.lifecycle_state != s {
                return false;
            }
        }
        true
    }
}

/// Everything the repository tracks for a strategy id beyond the wire
/// `StrategyDefinition` itself: the reviewer audit trail spec.md §1 keeps in
/// scope ("recording author/timestamp") and the "did the latest simulation
/// come back clean" gate that `review -> approved` checks (spec.md 4.9).
#[derive(Debug, Clone, Default)]
pub struct ReviewAudit {
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub last_simulation_clean: bool,
}

#[async_trait]
pub trait StrategyRepo: Send + Sync {
    async fn create(&self, def: StrategyDefinition) -> EngineResult<StrategyDefinition>;
    async fn get(&self, id: Uuid, version: Option<&str>) -> EngineResult<StrategyDefinition>;
    async fn get_current(&self, id: Uuid) -> EngineResult<StrategyDefinition>;
    async fn list(&self, filter: &StrategyFilter) -> EngineResult<Vec<StrategyDefinition>>;
    async fn update(
        &self,
        id: Uuid,
        update: StrategyUpdate,
        bump: VersionBump,
    ) -> EngineResult<StrategyDefinition>;
    async fn delete(&self, id: Uuid) -> EngineResult<()>;
    /// Advances the strategy one step along `draft -> review -> approved ->
    /// active` (spec.md 4.9), enforcing that step's extra precondition.
    async fn promote(
        &self,
        id: Uuid,
        actor: &str,
        rules_registry: &crate::registry::RuleRegistry,
        vendor_registry: &crate::registry::VendorRegistry,
    ) -> EngineResult<StrategyDefinition>;
    /// `review`/`approved` -> `draft`; clears reviewer fields.
    async fn retract(&self, id: Uuid, actor: &str) -> EngineResult<StrategyDefinition>;
    /// Any non-draft -> `deprecated`; terminal.
    async fn deprecate(&self, id: Uuid, actor: &str) -> EngineResult<StrategyDefinition>;
    async fn clone_strategy(
        &self,
        id: Uuid,
        new_name: &str,
        author: &str,
    ) -> EngineResult<StrategyDefinition>;
    /// Records whether the latest simulation of (id, version) came back
    /// clean, feeding the `review -> approved` precondition.
    async fn record_simulation(&self, id: Uuid, version: &str, had_errors: bool) -> EngineResult<()>;
}

#[async_trait]
pub trait SchematicRepo: Send + Sync {
    async fn store(&self, data: SchematicData) -> EngineResult<SchematicData>;
    async fn get(&self, id: &str) -> EngineResult<SchematicData>;
    async fn list(&self) -> EngineResult<Vec<SchematicData>>;
    async fn delete(&self, id: &str) -> EngineResult<()>;
    async fn update_metadata(
        &self,
        id: &str,
        tags: Option<Vec<String>>,
        notes: Option<Option<String>>,
    ) -> EngineResult<SchematicData>;
}

#[async_trait]
pub trait ValidationRepo: Send + Sync {
    async fn store(&self, result: ValidationResult) -> EngineResult<ValidationResult>;
    async fn get(&self, id: Uuid) -> EngineResult<ValidationResult>;
    async fn list_by_schematic(&self, schematic_id: &str) -> EngineResult<Vec<ValidationResult>>;
    async fn list_by_strategy(&self, strategy_id: &str) -> EngineResult<Vec<ValidationResult>>;
}

pub(crate) fn not_found(kind: &'static str, id: impl ToString) -> EngineError {
    EngineError::NotFound { kind, id: id.to_string() }
}

/// What a promotion call is actually trying to do, used by both backends to
/// share the lifecycle precondition logic.
pub(crate) fn next_promotion_state(from: LifecycleState) -> Option<LifecycleState> {
    match from {
        LifecycleState::Draft => Some(LifecycleState::Review),
        LifecycleState::Review => Some(LifecycleState::Approved),
        LifecycleState::Approved => Some(LifecycleState::Active),
        LifecycleState::Active | LifecycleState::Deprecated => None,
    }
}
