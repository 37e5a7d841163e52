//! Entry point: `serve` runs the RPC façade (C10); `simulate-file` runs one
//! strategy against one wafer map offline, the way a CI job or a wizard
//! "preview" action would, without standing up the HTTP server.

use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::path::PathBuf;
use std::sync::Arc;
use wafer_sampling_engine::cache::CompiledStrategyCache;
use wafer_sampling_engine::config::EngineConfig;
use wafer_sampling_engine::registry::bootstrap;
use wafer_sampling_engine::repository::memory::{
    InMemorySchematicRepo, InMemoryStrategyRepo, InMemoryValidationRepo,
};
use wafer_sampling_engine::repository::sqlite::{
    SqliteSchematicRepo, SqliteStrategyRepo, SqliteValidationRepo,
};
use wafer_sampling_engine::repository::{SchematicRepo, StrategyRepo, ValidationRepo};

#[derive(Parser)]
#[command(name = "wafer-engine")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Starts the RPC façade and (if configured) the metrics listener.
    Serve,
    /// Compiles and executes one strategy against one wafer map, printing
    /// the resulting `SimulationResult` as JSON to stdout.
    SimulateFile {
        /// Path to a JSON-serialized `StrategyDefinition`.
        #[arg(long)]
        strategy: PathBuf,
        /// Path to a JSON-serialized `WaferMapWire`.
        #[arg(long)]
        wafer: PathBuf,
    },
}

fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wafer_sampling_engine=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Builds the three repository trait objects from `storage_backend_url`:
/// `memory://` for the in-process HashMap backend, anything else treated as
/// a sqlite file path (`sqlite:///path/to.db` or a bare path).
fn build_repos(
    config: &EngineConfig,
) -> anyhow::Result<(Arc<dyn StrategyRepo>, Arc<dyn SchematicRepo>, Arc<dyn ValidationRepo>)> {
    if config.storage_backend_url == "memory://" {
        return Ok((
            Arc::new(InMemoryStrategyRepo::new()),
            Arc::new(InMemorySchematicRepo::new()),
            Arc::new(InMemoryValidationRepo::new()),
        ));
    }
    let path = config
        .storage_backend_url
        .strip_prefix("sqlite://")
        .unwrap_or(&config.storage_backend_url);
    Ok((
        Arc::new(SqliteStrategyRepo::open(path)?),
        Arc::new(SqliteSchematicRepo::open(path)?),
        Arc::new(SqliteValidationRepo::open(path)?),
    ))
}

async fn serve() -> anyhow::Result<()> {
    init_tracing();
    let config = EngineConfig::from_env()?;
    let (strategy_repo, schematic_repo, validation_repo) = build_repos(&config)?;
    let (rule_registry, vendor_registry) = bootstrap();
    let cache = CompiledStrategyCache::new(config.limits.compiled_strategy_cache_entries);

    let bind_addr = config.bind_addr.clone();
    let metrics_addr = config.metrics_addr.clone();

    let state = Arc::new(wafer_sampling_engine::api::AppState {
        strategy_repo,
        schematic_repo,
        validation_repo,
        rule_registry,
        vendor_registry,
        cache,
        config,
    });

    if let Some(metrics_addr) = metrics_addr {
        let handle = PrometheusBuilder::new().install_recorder()?;
        let metrics_router = wafer_sampling_engine::api::metrics_router(handle);
        let listener = tokio::net::TcpListener::bind(&metrics_addr).await?;
        tracing::info!(addr = %metrics_addr, "metrics listening");
        tokio::spawn(async move {
            if let Err(err) = axum::serve(listener, metrics_router).await {
                tracing::error!(%err, "metrics server error");
            }
        });
    }

    let app = wafer_sampling_engine::api::router(state);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "wafer-engine listening");
    axum::serve(listener, app).await?;
    Ok(())
}

fn simulate_file(strategy_path: PathBuf, wafer_path: PathBuf) -> anyhow::Result<()> {
    use wafer_sampling_engine::execution::{execute, ExecutionContext};
    use wafer_sampling_engine::strategy::compiler::compile;
    use wafer_sampling_engine::strategy::StrategyDefinition;
    use wafer_sampling_engine::wafer::{WaferMap, WaferMapWire};

    let strategy_text = std::fs::read_to_string(&strategy_path)?;
    let def: StrategyDefinition = serde_json::from_str(&strategy_text)?;
    let wafer_text = std::fs::read_to_string(&wafer_path)?;
    let wire: WaferMapWire = serde_json::from_str(&wafer_text)?;
    let wafer: WaferMap = wire.into();

    let (rule_registry, vendor_registry) = bootstrap();
    let compiled = compile(&def, &rule_registry, &vendor_registry).map_err(|reasons| {
        anyhow::anyhow!(
            "compile failed: {}",
            reasons
                .iter()
                .map(|r| r.message.clone())
                .collect::<Vec<_>>()
                .join("; ")
        )
    })?;

    let ctx = ExecutionContext {
        wafer_size: wafer.metadata.wafer_size.clone(),
        product_type: wafer.metadata.product_type.clone(),
        ..Default::default()
    };
    let result = execute(&compiled, &wafer, &ctx);
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Serve => serve().await,
        Commands::SimulateFile { strategy, wafer } => simulate_file(strategy, wafer),
    }
}
