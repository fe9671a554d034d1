//! Trendwatch - headless geopolitical trend scoring backend.
//!
//! Startup order: env + tracing, settings, database (migrations + parity
//! check), operator YAML sync, shared clients, scheduler, API server.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use trendwatch_backend::api::{self, ApiState};
use trendwatch_backend::calibration::drift::DriftNotifier;
use trendwatch_backend::cluster::Clusterer;
use trendwatch_backend::config::{load_sources_file, load_trends_file, Settings};
use trendwatch_backend::embedding::EmbeddingClient;
use trendwatch_backend::llm::{BudgetGuard, ChatClient, LlmPolicy, Tier1Filter, Tier2Extractor};
use trendwatch_backend::nn::IvfFlat;
use trendwatch_backend::pipeline::Pipeline;
use trendwatch_backend::storage::{sources, trends, Db};
use trendwatch_backend::workers::Scheduler;

#[derive(Debug, Parser)]
#[command(name = "trendwatch", about = "Geopolitical trend scoring backend")]
struct Cli {
    /// Run migrations and config sync, then exit without serving.
    #[arg(long)]
    sync_only: bool,

    /// Refuse to boot on schema parity drift (default in production-like
    /// environments).
    #[arg(long, env = "STRICT_SCHEMA")]
    strict_schema: bool,
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,sqlx=warn".into());
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let settings = Settings::from_env().context("loading settings")?;
    info!(environment = ?settings.environment, "trendwatch starting");

    let db = Db::connect(&settings.database_url, 16).await?;
    let strict = cli.strict_schema || settings.environment.is_production_like();
    db.migrate(strict).await?;

    sync_operator_config(&db, &settings).await?;
    if cli.sync_only {
        info!("sync-only run complete");
        return Ok(());
    }

    let prometheus = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("metrics recorder: {e}"))?;

    let http_client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(settings.llm_timeout_secs + 10))
        .build()
        .context("building HTTP client")?;

    // Shared provider plumbing: one budget guard feeds both the embedder
    // and the two LLM tiers.
    let budget = Arc::new(BudgetGuard::new(db.pool().clone(), &settings));
    let embedder = Arc::new(EmbeddingClient::new(
        http_client.clone(),
        &settings,
        budget.clone(),
    ));
    let chat = ChatClient::new(http_client.clone(), &settings.llm_base_url, &settings.llm_api_key);
    let policy = Arc::new(LlmPolicy::new(
        chat,
        budget,
        settings.llm_timeout_secs,
        settings.llm_max_retries,
    ));
    let tier1 = Tier1Filter::new(
        policy.clone(),
        &settings.tier1_model,
        &settings.tier1_fallback_model,
        settings.llm_max_input_tokens,
    );
    let tier2 = Tier2Extractor::new(
        policy.clone(),
        &settings.tier2_model,
        &settings.tier2_fallback_model,
        settings.llm_max_input_tokens,
    );

    let clusterer = Clusterer::new(&settings, Arc::new(IvfFlat));
    let pipeline = Arc::new(Pipeline::new(
        db.pool().clone(),
        settings.clone(),
        embedder,
        clusterer,
        tier1,
        tier2,
    ));

    let notifier = Arc::new(DriftNotifier::new(
        http_client.clone(),
        settings.drift_webhook_url.clone(),
    ));
    let scheduler = Arc::new(Scheduler::new(
        db.pool().clone(),
        settings.clone(),
        pipeline,
        notifier,
    ));
    scheduler.spawn_all();

    let state = ApiState {
        pool: db.pool().clone(),
        settings: Arc::new(settings.clone()),
        prometheus: Some(prometheus),
    };
    let app = api::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));
    info!(%addr, "API listening");
    let listener = TcpListener::bind(addr).await.context("binding API port")?;
    axum::serve(listener, app).await.context("serving API")?;
    Ok(())
}

/// Load and sync the operator YAML files. Missing files are tolerated in
/// development (the API can still create trends) but logged.
async fn sync_operator_config(db: &Db, settings: &Settings) -> Result<()> {
    let trends_path = Path::new(&settings.trends_yaml_path);
    if trends_path.exists() {
        let defs = load_trends_file(trends_path)?;
        let changed = trends::sync_from_definitions(db.pool(), &defs, "startup").await?;
        info!(total = defs.len(), changed, "trend definitions synced");
    } else if settings.environment.is_production_like() {
        anyhow::bail!("trends yaml missing at {}", settings.trends_yaml_path);
    } else {
        warn!(path = %settings.trends_yaml_path, "trends yaml missing, skipping sync");
    }

    let sources_path = Path::new(&settings.sources_yaml_path);
    if sources_path.exists() {
        let defs = load_sources_file(sources_path)?;
        let synced = sources::sync_from_definitions(db.pool(), &defs).await?;
        info!(synced, "sources synced");
    } else if settings.environment.is_production_like() {
        anyhow::bail!("sources yaml missing at {}", settings.sources_yaml_path);
    } else {
        warn!(path = %settings.sources_yaml_path, "sources yaml missing, skipping sync");
    }
    Ok(())
}
