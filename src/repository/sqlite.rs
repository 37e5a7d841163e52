//! SQLite-backed repository (the durable backend spec.md 4.9 requires at
//! least one of — "a successful write is visible after restart"). Schema
//! versioned and `WITHOUT ROWID` on natural-key tables, the same shape as
//! `ArtifactStore`'s `run_artifacts` table: a handful of indexed columns for
//! filtering plus the full aggregate serialized as a JSON blob.

use super::{
    bump_version, next_promotion_state, not_found, SchematicRepo, StrategyFilter, StrategyRepo,
    StrategyUpdate, ValidationRepo, VersionBump,
};
use crate::error::{EngineError, EngineResult};
use crate::lifecycle::check_transition;
use crate::schematic::SchematicData;
use crate::strategy::compiler::compile;
use crate::strategy::{LifecycleState, StrategyDefinition};
use crate::validator::ValidationResult;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

const SCHEMA_VERSION: u32 = 1;

fn to_internal(err: rusqlite::Error) -> EngineError {
    EngineError::Internal { message: format!("sqlite error: {err}") }
}

fn lifecycle_str(s: LifecycleState) -> &'static str {
    match s {
        LifecycleState::Draft => "draft",
        LifecycleState::Review => "review",
        LifecycleState::Approved => "approved",
        LifecycleState::Active => "active",
        LifecycleState::Deprecated => "deprecated",
    }
}

pub struct SqliteStrategyRepo {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStrategyRepo {
    pub fn open<P: AsRef<Path>>(path: P) -> EngineResult<Self> {
        let conn = Connection::open(path).map_err(to_internal)?;
        let repo = Self { conn: Arc::new(Mutex::new(conn)) };
        repo.init_schema()?;
        Ok(repo)
    }

    pub fn in_memory() -> EngineResult<Self> {
        let conn = Connection::open_in_memory().map_err(to_internal)?;
        let repo = Self { conn: Arc::new(Mutex::new(conn)) };
        repo.init_schema()?;
        Ok(repo)
    }

    fn init_schema(&self) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;

            CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY);

            CREATE TABLE IF NOT EXISTS strategy_versions (
                strategy_id TEXT NOT NULL,
                version TEXT NOT NULL,
                lifecycle_state TEXT NOT NULL,
                author TEXT NOT NULL,
                process_step TEXT NOT NULL,
                tool_type TEXT NOT NULL,
                created_at TEXT NOT NULL,
                definition_blob TEXT NOT NULL,
                PRIMARY KEY (strategy_id, version)
            ) WITHOUT ROWID;

            CREATE INDEX IF NOT EXISTS idx_strategy_versions_id
                ON strategy_versions(strategy_id, created_at DESC);

            CREATE TABLE IF NOT EXISTS strategy_pointer (
                strategy_id TEXT PRIMARY KEY,
                current_version TEXT NOT NULL,
                reviewed_by TEXT,
                reviewed_at TEXT,
                last_simulation_clean INTEGER NOT NULL DEFAULT 0
            ) WITHOUT ROWID;

            CREATE TABLE IF NOT EXISTS active_index (
                process_step TEXT NOT NULL,
                tool_type TEXT NOT NULL,
                strategy_id TEXT NOT NULL,
                PRIMARY KEY (process_step, tool_type)
            ) WITHOUT ROWID;
            "#,
        )
        .map_err(to_internal)?;

        let current: Option<u32> = conn
            .query_row("SELECT version FROM schema_version LIMIT 1", [], |r| r.get(0))
            .optional()
            .map_err(to_internal)?;
        if current.is_none() {
            conn.execute("INSERT INTO schema_version (version) VALUES (?1)", params![SCHEMA_VERSION])
                .map_err(to_internal)?;
        }
        Ok(())
    }

    fn insert_version(&self, def: &StrategyDefinition) -> EngineResult<()> {
        let conn = self.conn.lock();
        let blob = serde_json::to_string(def)
            .map_err(|e| EngineError::Internal { message: e.to_string() })?;
        conn.execute(
            "INSERT OR REPLACE INTO strategy_versions
                (strategy_id, version, lifecycle_state, author, process_step, tool_type, created_at, definition_blob)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                def.id.to_string(),
                def.version,
                lifecycle_str(def.lifecycle_state),
                def.author,
                def.process_step,
                def.tool_type,
                def.modified_at.to_rfc3339(),
                blob,
            ],
        )
        .map_err(to_internal)?;
        conn.execute(
            "INSERT INTO strategy_pointer (strategy_id, current_version, last_simulation_clean)
             VALUES (?1, ?2, 0)
             ON CONFLICT(strategy_id) DO UPDATE SET current_version = excluded.current_version",
            params![def.id.to_string(), def.version],
        )
        .map_err(to_internal)?;
        Ok(())
    }

    fn load_version_row(row: &rusqlite::Row) -> rusqlite::Result<StrategyDefinition> {
        let blob: String = row.get(0)?;
        serde_json::from_str(&blob)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
    }
}

#[async_trait]
impl StrategyRepo for SqliteStrategyRepo {
    async fn create(&self, def: StrategyDefinition) -> EngineResult<StrategyDefinition> {
        if def.name.trim().is_empty() {
            return Err(EngineError::ValidationError {
                errors: vec![crate::error::FieldError::on_field("name", "name must not be empty")],
            });
        }
        self.insert_version(&def)?;
        Ok(def)
    }

    async fn get(&self, id: Uuid, version: Option<&str>) -> EngineResult<StrategyDefinition> {
        let conn = self.conn.lock();
        let version = match version {
            Some(v) => v.to_string(),
            None => conn
                .query_row(
                    "SELECT current_version FROM strategy_pointer WHERE strategy_id = ?1",
                    params![id.to_string()],
                    |r| r.get::<_, String>(0),
                )
                .optional()
                .map_err(to_internal)?
                .ok_or_else(|| not_found("strategy", id))?,
        };
        conn.query_row(
            "SELECT definition_blob FROM strategy_versions WHERE strategy_id = ?1 AND version = ?2",
            params![id.to_string(), version],
            Self::load_version_row,
        )
        .optional()
        .map_err(to_internal)?
        .ok_or_else(|| not_found("strategy version", format!("{id}@{version}")))
    }

    async fn get_current(&self, id: Uuid) -> EngineResult<StrategyDefinition> {
        self.get(id, None).await
    }

    async fn list(&self, filter: &StrategyFilter) -> EngineResult<Vec<StrategyDefinition>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT sv.definition_blob FROM strategy_versions sv
                 JOIN strategy_pointer sp
                   ON sp.strategy_id = sv.strategy_id AND sp.current_version = sv.version",
            )
            .map_err(to_internal)?;
        let rows = stmt
            .query_map([], Self::load_version_row)
            .map_err(to_internal)?;
        let mut out = Vec::new();
        for row in rows {
            let def = row.map_err(to_internal)?;
            if filter.matches(&def) {
                out.push(def);
            }
        }
        Ok(out)
    }

    async fn update(
        &self,
        id: Uuid,
        update: StrategyUpdate,
        bump: VersionBump,
    ) -> EngineResult<StrategyDefinition> {
        let latest = self.get_current(id).await?;
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
        if matches!(
            latest.lifecycle_state,
            LifecycleState::Approved | LifecycleState::Active | LifecycleState::Deprecated
        ) {
            next.lifecycle_state = LifecycleState::Draft;
        }
        self.insert_version(&next)?;
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE strategy_pointer SET reviewed_by = NULL, reviewed_at = NULL, last_simulation_clean = 0 WHERE strategy_id = ?1",
            params![id.to_string()],
        )
        .map_err(to_internal)?;
        Ok(next)
    }

    async fn delete(&self, id: Uuid) -> EngineResult<()> {
        let conn = self.conn.lock();
        let changed = conn
            .execute("DELETE FROM strategy_pointer WHERE strategy_id = ?1", params![id.to_string()])
            .map_err(to_internal)?;
        conn.execute("DELETE FROM strategy_versions WHERE strategy_id = ?1", params![id.to_string()])
            .map_err(to_internal)?;
        conn.execute("DELETE FROM active_index WHERE strategy_id = ?1", params![id.to_string()])
            .map_err(to_internal)?;
        if changed == 0 {
            return Err(not_found("strategy", id));
        }
        Ok(())
    }

    async fn promote(
        &self,
        id: Uuid,
        actor: &str,
        rules_registry: &crate::registry::RuleRegistry,
        vendor_registry: &crate::registry::VendorRegistry,
    ) -> EngineResult<StrategyDefinition> {
        let latest = self.get_current(id).await?;
        let to_state = next_promotion_state(latest.lifecycle_state).ok_or_else(|| {
            EngineError::LifecycleViolation {
                from: lifecycle_str(latest.lifecycle_state).to_string(),
                to: lifecycle_str(latest.lifecycle_state).to_string(),
                reason: "no further promotion is possible from this state".to_string(),
            }
        })?;
        check_transition(latest.lifecycle_state, to_state)?;

        match to_state {
            LifecycleState::Review => {
                if !latest.has_rules() {
                    return Err(EngineError::LifecycleViolation {
                        from: lifecycle_str(latest.lifecycle_state).to_string(),
                        to: lifecycle_str(to_state).to_string(),
                        reason: "strategy must declare at least one rule before review".to_string(),
                    });
                }
                if let Err(reasons) = compile(&latest, rules_registry, vendor_registry) {
                    return Err(EngineError::CompileError { reasons });
                }
            }
            LifecycleState::Approved => {
                let clean: i64 = self
                    .conn
                    .lock()
                    .query_row(
                        "SELECT last_simulation_clean FROM strategy_pointer WHERE strategy_id = ?1",
                        params![id.to_string()],
                        |r| r.get(0),
                    )
                    .map_err(to_internal)?;
                if clean == 0 {
                    return Err(EngineError::LifecycleViolation {
                        from: lifecycle_str(latest.lifecycle_state).to_string(),
                        to: lifecycle_str(to_state).to_string(),
                        reason: "latest simulation has not completed without errors".to_string(),
                    });
                }
            }
            LifecycleState::Active => {
                let prior: Option<String> = self
                    .conn
                    .lock()
                    .query_row(
                        "SELECT strategy_id FROM active_index WHERE process_step = ?1 AND tool_type = ?2",
                        params![latest.process_step, latest.tool_type],
                        |r| r.get(0),
                    )
                    .optional()
                    .map_err(to_internal)?;
                self.conn
                    .lock()
                    .execute(
                        "INSERT OR REPLACE INTO active_index (process_step, tool_type, strategy_id) VALUES (?1, ?2, ?3)",
                        params![latest.process_step, latest.tool_type, id.to_string()],
                    )
                    .map_err(to_internal)?;
                if let Some(prior_id) = prior {
                    if prior_id != id.to_string() {
                        let prior_uuid = Uuid::parse_str(&prior_id)
                            .map_err(|e| EngineError::Internal { message: e.to_string() })?;
                        let prior_def = self.get_current(prior_uuid).await?;
                        if check_transition(prior_def.lifecycle_state, LifecycleState::Deprecated).is_ok() {
                            let mut deprecated = prior_def.clone();
                            deprecated.lifecycle_state = LifecycleState::Deprecated;
                            deprecated.modified_at = Utc::now();
                            self.insert_version(&deprecated)?;
                        }
                    }
                }
            }
            LifecycleState::Draft | LifecycleState::Deprecated => unreachable!(),
        }

        let mut updated = latest.clone();
        updated.lifecycle_state = to_state;
        updated.modified_at = Utc::now();
        self.insert_version(&updated)?;
        if to_state == LifecycleState::Approved {
            self.conn
                .lock()
                .execute(
                    "UPDATE strategy_pointer SET reviewed_by = ?1, reviewed_at = ?2 WHERE strategy_id = ?3",
                    params![actor, Utc::now().to_rfc3339(), id.to_string()],
                )
                .map_err(to_internal)?;
        }
        Ok(updated)
    }

    async fn retract(&self, id: Uuid, _actor: &str) -> EngineResult<StrategyDefinition> {
        let latest = self.get_current(id).await?;
        check_transition(latest.lifecycle_state, LifecycleState::Draft)?;
        let mut updated = latest.clone();
        updated.lifecycle_state = LifecycleState::Draft;
        updated.modified_at = Utc::now();
        self.insert_version(&updated)?;
        self.conn
            .lock()
            .execute(
                "UPDATE strategy_pointer SET reviewed_by = NULL, reviewed_at = NULL, last_simulation_clean = 0 WHERE strategy_id = ?1",
                params![id.to_string()],
            )
            .map_err(to_internal)?;
        Ok(updated)
    }

    async fn deprecate(&self, id: Uuid, _actor: &str) -> EngineResult<StrategyDefinition> {
        let latest = self.get_current(id).await?;
        check_transition(latest.lifecycle_state, LifecycleState::Deprecated)?;
        let mut updated = latest.clone();
        updated.lifecycle_state = LifecycleState::Deprecated;
        updated.modified_at = Utc::now();
        self.insert_version(&updated)?;
        self.conn
            .lock()
            .execute("DELETE FROM active_index WHERE strategy_id = ?1", params![id.to_string()])
            .map_err(to_internal)?;
        Ok(updated)
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
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE strategy_pointer SET last_simulation_clean = ?1
             WHERE strategy_id = ?2 AND current_version = ?3",
            params![(!had_errors) as i64, id.to_string(), version],
        )
        .map_err(to_internal)?;
        Ok(())
    }
}

pub struct SqliteSchematicRepo {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSchematicRepo {
    pub fn open<P: AsRef<Path>>(path: P) -> EngineResult<Self> {
        let conn = Connection::open(path).map_err(to_internal)?;
        let repo = Self { conn: Arc::new(Mutex::new(conn)) };
        repo.init_schema()?;
        Ok(repo)
    }

    pub fn in_memory() -> EngineResult<Self> {
        let conn = Connection::open_in_memory().map_err(to_internal)?;
        let repo = Self { conn: Arc::new(Mutex::new(conn)) };
        repo.init_schema()?;
        Ok(repo)
    }

    fn init_schema(&self) -> EngineResult<()> {
        self.conn
            .lock()
            .execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS schematics (
                    id TEXT PRIMARY KEY,
                    filename TEXT NOT NULL,
                    format_type TEXT NOT NULL,
                    upload_date TEXT NOT NULL,
                    data_blob TEXT NOT NULL
                ) WITHOUT ROWID;
                "#,
            )
            .map_err(to_internal)
    }
}

#[async_trait]
impl SchematicRepo for SqliteSchematicRepo {
    async fn store(&self, data: SchematicData) -> EngineResult<SchematicData> {
        let blob = serde_json::to_string(&data).map_err(|e| EngineError::Internal { message: e.to_string() })?;
        self.conn
            .lock()
            .execute(
                "INSERT OR REPLACE INTO schematics (id, filename, format_type, upload_date, data_blob)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![data.id, data.filename, data.format_type.as_str(), data.upload_date.to_rfc3339(), blob],
            )
            .map_err(to_internal)?;
        Ok(data)
    }

    async fn get(&self, id: &str) -> EngineResult<SchematicData> {
        self.conn
            .lock()
            .query_row("SELECT data_blob FROM schematics WHERE id = ?1", params![id], |r| {
                let blob: String = r.get(0)?;
                serde_json::from_str::<SchematicData>(&blob)
                    .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
            })
            .optional()
            .map_err(to_internal)?
            .ok_or_else(|| not_found("schematic", id))
    }

    async fn list(&self) -> EngineResult<Vec<SchematicData>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT data_blob FROM schematics").map_err(to_internal)?;
        let rows = stmt
            .query_map([], |r| {
                let blob: String = r.get(0)?;
                serde_json::from_str::<SchematicData>(&blob)
                    .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
            })
            .map_err(to_internal)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(to_internal)?);
        }
        Ok(out)
    }

    async fn delete(&self, id: &str) -> EngineResult<()> {
        let changed = self
            .conn
            .lock()
            .execute("DELETE FROM schematics WHERE id = ?1", params![id])
            .map_err(to_internal)?;
        if changed == 0 {
            return Err(not_found("schematic", id));
        }
        Ok(())
    }

    async fn update_metadata(
        &self,
        id: &str,
        tags: Option<Vec<String>>,
        notes: Option<Option<String>>,
    ) -> EngineResult<SchematicData> {
        let mut data = self.get(id).await?;
        if let Some(tags) = tags {
            data.tags = tags;
        }
        if let Some(notes) = notes {
            data.notes = notes;
        }
        self.store(data).await
    }
}

pub struct SqliteValidationRepo {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteValidationRepo {
    pub fn open<P: AsRef<Path>>(path: P) -> EngineResult<Self> {
        let conn = Connection::open(path).map_err(to_internal)?;
        let repo = Self { conn: Arc::new(Mutex::new(conn)) };
        repo.init_schema()?;
        Ok(repo)
    }

    pub fn in_memory() -> EngineResult<Self> {
        let conn = Connection::open_in_memory().map_err(to_internal)?;
        let repo = Self { conn: Arc::new(Mutex::new(conn)) };
        repo.init_schema()?;
        Ok(repo)
    }

    fn init_schema(&self) -> EngineResult<()> {
        self.conn
            .lock()
            .execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS validation_results (
                    id TEXT PRIMARY KEY,
                    schematic_id TEXT NOT NULL,
                    strategy_id TEXT NOT NULL,
                    validation_date TEXT NOT NULL,
                    result_blob TEXT NOT NULL
                ) WITHOUT ROWID;
                CREATE INDEX IF NOT EXISTS idx_validation_schematic ON validation_results(schematic_id);
                CREATE INDEX IF NOT EXISTS idx_validation_strategy ON validation_results(strategy_id);
                "#,
            )
            .map_err(to_internal)
    }
}

#[async_trait]
impl ValidationRepo for SqliteValidationRepo {
    async fn store(&self, result: ValidationResult) -> EngineResult<ValidationResult> {
        let blob = serde_json::to_string(&result).map_err(|e| EngineError::Internal { message: e.to_string() })?;
        self.conn
            .lock()
            .execute(
                "INSERT OR REPLACE INTO validation_results (id, schematic_id, strategy_id, validation_date, result_blob)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    result.id.to_string(),
                    result.schematic_id,
                    result.strategy_id,
                    result.validation_date.to_rfc3339(),
                    blob,
                ],
            )
            .map_err(to_internal)?;
        Ok(result)
    }

    async fn get(&self, id: Uuid) -> EngineResult<ValidationResult> {
        self.conn
            .lock()
            .query_row(
                "SELECT result_blob FROM validation_results WHERE id = ?1",
                params![id.to_string()],
                |r| {
                    let blob: String = r.get(0)?;
                    serde_json::from_str::<ValidationResult>(&blob)
                        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
                },
            )
            .optional()
            .map_err(to_internal)?
            .ok_or_else(|| not_found("validationResult", id))
    }

    async fn list_by_schematic(&self, schematic_id: &str) -> EngineResult<Vec<ValidationResult>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT result_blob FROM validation_results WHERE schematic_id = ?1")
            .map_err(to_internal)?;
        let rows = stmt
            .query_map(params![schematic_id], |r| {
                let blob: String = r.get(0)?;
                serde_json::from_str::<ValidationResult>(&blob)
                    .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
            })
            .map_err(to_internal)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(to_internal)?);
        }
        Ok(out)
    }

    async fn list_by_strategy(&self, strategy_id: &str) -> EngineResult<Vec<ValidationResult>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT result_blob FROM validation_results WHERE strategy_id = ?1")
            .map_err(to_internal)?;
        let rows = stmt
            .query_map(params![strategy_id], |r| {
                let blob: String = r.get(0)?;
                serde_json::from_str::<ValidationResult>(&blob)
                    .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
            })
            .map_err(to_internal)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(to_internal)?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::bootstrap;
    use crate::strategy::{RuleConfig, StrategyType};

    fn draft() -> StrategyDefinition {
        StrategyDefinition {
            id: Uuid::new_v4(),
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

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let repo = SqliteStrategyRepo::in_memory().unwrap();
        let def = draft();
        let id = def.id;
        repo.create(def.clone()).await.unwrap();
        let fetched = repo.get_current(id).await.unwrap();
        assert_eq!(fetched.name, def.name);
    }

    #[tokio::test]
    async fn promotion_persists_across_queries() {
        let repo = SqliteStrategyRepo::in_memory().unwrap();
        let (rules, vendors) = bootstrap();
        let def = draft();
        let id = def.id;
        repo.create(def).await.unwrap();
        let reviewed = repo.promote(id, "alice", &rules, &vendors).await.unwrap();
        assert_eq!(reviewed.lifecycle_state, LifecycleState::Review);
        let fetched = repo.get_current(id).await.unwrap();
        assert_eq!(fetched.lifecycle_state, LifecycleState::Review);
    }

    #[tokio::test]
    async fn schematic_round_trip() {
        let repo = SqliteSchematicRepo::in_memory().unwrap();
        let data = SchematicData::new(
            "sch1",
            "f.svg",
            crate::schematic::FormatType::Svg,
            crate::geometry::CoordinateSystem::SvgUnits,
            None,
            vec![crate::schematic::DieBoundary::from_bounds(
                "d1",
                crate::geometry::Bounds::new(0.0, 0.0, 1.0, 1.0),
                true,
            )],
            crate::schematic::SchematicSourceMetadata::default(),
        );
        repo.store(data.clone()).await.unwrap();
        let fetched = repo.get("sch1").await.unwrap();
        assert_eq!(fetched.dies.len(), 1);
    }

    /// Crash-consistency check (spec.md 4.9): a write to an on-disk database
    /// must be visible after the connection is dropped and reopened, not just
    /// from the handle that wrote it.
    #[tokio::test]
    async fn write_survives_reopen_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.db");

        let def = draft();
        let id = def.id;
        {
            let repo = SqliteStrategyRepo::open(&path).unwrap();
            repo.create(def.clone()).await.unwrap();
        }

        let reopened = SqliteStrategyRepo::open(&path).unwrap();
        let fetched = reopened.get_current(id).await.unwrap();
        assert_eq!(fetched.name, def.name);
    }
}
