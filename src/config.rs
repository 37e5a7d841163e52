//! Engine configuration.
//! Mission: centralize environment- and file-derived knobs (storage backend,
//! resource limits, CORS, timeouts) the way `main.rs::load_env` and
//! `models::from_env` do it in the teacher codebase — `dotenv` loads an
//! optional `.env`, then typed `env::var` reads populate defaults, with a
//! `toml`-based static file layered underneath for deployment config.

use std::env;
use std::time::Duration;

/// Per-operation timeout budget (spec.md 5).
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timeouts {
    pub upload_ms: u64,
    pub parse_ms: u64,
    pub simulate_ms: u64,
    pub validate_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            upload_ms: 30_000,
            parse_ms: 60_000,
            simulate_ms: 10_000,
            validate_ms: 10_000,
        }
    }
}

impl Timeouts {
    pub fn upload(&self) -> Duration {
        Duration::from_millis(self.upload_ms)
    }
    pub fn parse(&self) -> Duration {
        Duration::from_millis(self.parse_ms)
    }
    pub fn simulate(&self) -> Duration {
        Duration::from_millis(self.simulate_ms)
    }
    pub fn validate(&self) -> Duration {
        Duration::from_millis(self.validate_ms)
    }
}

/// Resource limits (spec.md 5).
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceLimits {
    pub max_upload_bytes: u64,
    pub max_dies_per_schematic: usize,
    pub max_sites_per_simulation: usize,
    pub compiled_strategy_cache_entries: usize,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_upload_bytes: 100 * 1024 * 1024,
            max_dies_per_schematic: 100_000,
            max_sites_per_simulation: 10_000,
            compiled_strategy_cache_entries: 256,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// e.g. `sqlite:///var/lib/wafer-engine/engine.db` or `memory://`.
    pub storage_backend_url: String,
    pub cors_origins: Vec<String>,
    pub plugin_auto_discover: bool,
    pub timeouts: Timeouts,
    pub limits: ResourceLimits,
    pub bind_addr: String,
    pub metrics_addr: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            storage_backend_url: "memory://".to_string(),
            cors_origins: vec!["*".to_string()],
            plugin_auto_discover: false,
            timeouts: Timeouts::default(),
            limits: ResourceLimits::default(),
            bind_addr: "0.0.0.0:8080".to_string(),
            metrics_addr: None,
        }
    }
}

impl EngineConfig {
    /// Loads configuration the way the teacher's `main.rs` does: `.env` first
    /// (best-effort, missing file is not an error), then environment
    /// variables overriding hardcoded defaults, then an optional TOML file
    /// for anything not set via env.
    pub fn from_env() -> anyhow::Result<Self> {
        let _ = dotenv::dotenv();
        let mut cfg = if let Ok(path) = env::var("WAFER_ENGINE_CONFIG_FILE") {
            Self::from_toml_file(&path)?
        } else {
            Self::default()
        };

        if let Ok(url) = env::var("STORAGE_BACKEND_URL") {
            cfg.storage_backend_url = url;
        }
        if let Ok(origins) = env::var("CORS_ORIGINS") {
            cfg.cors_origins = origins.split(',').map(|s| s.trim().to_string()).collect();
        }
        if let Ok(flag) = env::var("PLUGIN_AUTO_DISCOVER") {
            cfg.plugin_auto_discover = flag == "1" || flag.eq_ignore_ascii_case("true");
        }
        if let Ok(addr) = env::var("BIND_ADDR") {
            cfg.bind_addr = addr;
        }
        if let Ok(addr) = env::var("METRICS_ADDR") {
            cfg.metrics_addr = Some(addr);
        }
        if let Ok(v) = env::var("MAX_UPLOAD_BYTES") {
            cfg.limits.max_upload_bytes = v.parse().unwrap_or(cfg.limits.max_upload_bytes);
        }
        if let Ok(v) = env::var("SIMULATE_TIMEOUT_MS") {
            cfg.timeouts.simulate_ms = v.parse().unwrap_or(cfg.timeouts.simulate_ms);
        }
        if let Ok(v) = env::var("VALIDATE_TIMEOUT_MS") {
            cfg.timeouts.validate_ms = v.parse().unwrap_or(cfg.timeouts.validate_ms);
        }

        Ok(cfg)
    }

    fn from_toml_file(path: &str) -> anyhow::Result<Self> {
        use anyhow::Context;
        #[derive(serde::Deserialize, Default)]
        struct RawFile {
            storage_backend_url: Option<String>,
            cors_origins: Option<Vec<String>>,
            plugin_auto_discover: Option<bool>,
            bind_addr: Option<String>,
            timeouts: Option<Timeouts>,
            limits: Option<ResourceLimits>,
        }

        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {path}"))?;
        let raw: RawFile = toml::from_str(&text)
            .with_context(|| format!("failed to parse config file {path}"))?;

        let mut cfg = Self::default();
        if let Some(v) = raw.storage_backend_url {
            cfg.storage_backend_url = v;
        }
        if let Some(v) = raw.cors_origins {
            cfg.cors_origins = v;
        }
        if let Some(v) = raw.plugin_auto_discover {
            cfg.plugin_auto_discover = v;
        }
        if let Some(v) = raw.bind_addr {
            cfg.bind_addr = v;
        }
        if let Some(v) = raw.timeouts {
            cfg.timeouts = v;
        }
        if let Some(v) = raw.limits {
            cfg.limits = v;
        }
        Ok(cfg)
    }
}
