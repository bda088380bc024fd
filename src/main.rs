//! Forecast CLI
//!
//! `forecast run <market-url>` streams progress events as JSON lines on
//! stdout and writes the report to stderr; `forecast history` lists stored
//! forecasts; `forecast init-config` writes the default configuration.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use forecast_agency::agent::{CachedProvider, LLMCache, LLMProvider, OpenAICompatibleProvider};
use forecast_agency::config::{ConfigManager, ForecastConfig, DEFAULT_CONFIG_FILE};
use forecast_agency::orchestrator::{
    ChannelSink, FanoutSink, ForecastPipeline, ForecastRequest, HistoryRecord, HistoryStore, ProgressSink,
    TracingSink,
};
use forecast_agency::telemetry::init_logging;
use forecast_agency::tools::{
    DuckDuckGoSearchProvider, HistoryInterval, HttpMarketFetcher, HttpSearchProvider, SearchContext, SearchProvider,
};

#[derive(Parser, Debug)]
#[command(name = "forecast", version, about = "Evidence-weighted forecasts for prediction markets")]
struct Cli {
    /// Configuration file (created with defaults when missing)
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    /// Also write logs to a daily-rolling file in this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Forecast one market
    Run(RunArgs),
    /// List stored forecasts
    History(HistoryArgs),
    /// Write the default configuration file
    InitConfig(InitArgs),
}

fn parse_interval(raw: &str) -> Result<HistoryInterval, String> {
    HistoryInterval::parse(raw).ok_or_else(|| format!("expected 1h, 4h or 1d, got '{}'", raw))
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Polymarket or Kalshi market URL
    market_url: String,
    /// Force the history interval instead of choosing one
    #[arg(long, value_parser = parse_interval)]
    interval: Option<HistoryInterval>,
    /// Key driver (repeatable); skips driver generation
    #[arg(long = "driver")]
    drivers: Vec<String>,
    #[arg(long)]
    no_books: bool,
    #[arg(long)]
    trades: bool,
    /// Do not append the result to the history file
    #[arg(long)]
    no_history: bool,
}

#[derive(Args, Debug)]
struct HistoryArgs {
    #[arg(long, default_value_t = 20)]
    limit: usize,
}

#[derive(Args, Debug)]
struct InitArgs {
    /// Overwrite an existing file
    #[arg(long)]
    force: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    let _log_guard = init_logging(cli.log_dir.as_deref())?;

    match cli.command {
        Commands::Run(args) => run(&cli.config, args).await,
        Commands::History(args) => history(&cli.config, args).await,
        Commands::InitConfig(args) => init_config(&cli.config, args).await,
    }
}

fn build_pipeline(config: ForecastConfig) -> (ForecastPipeline, Arc<LLMCache>) {
    let base: Arc<dyn LLMProvider> = Arc::new(OpenAICompatibleProvider::new(
        config.llm_base_url.clone(),
        config.llm_api_key.clone(),
    ));
    let cache = Arc::new(LLMCache::with_capacity(config.cache_capacity));
    let llm: Arc<dyn LLMProvider> = Arc::new(CachedProvider::new(base, cache.clone()));

    let search: Arc<dyn SearchProvider> = match &config.search_base_url {
        Some(url) => Arc::new(HttpSearchProvider::new(url.clone()).with_fallback_token(config.search_token.clone())),
        None => Arc::new(DuckDuckGoSearchProvider::new()),
    };
    info!("Search provider: {}", search.name());

    let market = Arc::new(HttpMarketFetcher::new(config.market_data_url.clone()));
    (ForecastPipeline::new(llm, search, market, config), cache)
}

async fn run(config_path: &PathBuf, args: RunArgs) -> Result<()> {
    let config = ConfigManager::new(config_path).load_with_env().await?;
    let history_file = config.history_file.clone();
    let search_ctx = SearchContext::new(config.search_token.clone()).with_session(Uuid::new_v4().to_string());

    let mut request = ForecastRequest::new(&args.market_url).with_search_context(search_ctx);
    request.history_interval = args.interval;
    request.with_books = Some(!args.no_books);
    request.with_trades = Some(args.trades);
    if !args.drivers.is_empty() {
        request = request.with_drivers(args.drivers);
    }

    let (pipeline, cache) = build_pipeline(config);

    let (channel, mut rx) = ChannelSink::new();
    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{}", line),
                Err(e) => tracing::warn!("Could not serialize progress event: {}", e),
            }
        }
    });

    let sinks: Vec<Arc<dyn ProgressSink>> = vec![Arc::new(channel), Arc::new(TracingSink)];
    let sink = FanoutSink::new(sinks);
    let result = pipeline.run_with_events(&request, &sink).await;
    drop(sink);
    writer.await.context("progress writer task panicked")?;

    let stats = cache.stats().await;
    info!("LLM cache: {} hits, {} misses, {} entries", stats.hits, stats.misses, stats.entries);

    let card = result?;
    eprintln!("\n{}", card.markdown_report);

    if !args.no_history {
        HistoryStore::new(history_file)
            .append(HistoryRecord::new(&args.market_url, card))
            .await?;
    }
    Ok(())
}

fn short_id(id: &str) -> String {
    id.chars().take(8).collect()
}

async fn history(config_path: &PathBuf, args: HistoryArgs) -> Result<()> {
    let config = ConfigManager::new(config_path).load().await?;
    let records = HistoryStore::new(config.history_file).load_all().await?;
    if records.is_empty() {
        println!("No stored forecasts.");
        return Ok(());
    }

    let skip = records.len().saturating_sub(args.limit);
    for r in records.iter().skip(skip) {
        let aware = r
            .forecast
            .p_aware
            .map(|p| format!("{:5.1}%", p * 100.0))
            .unwrap_or_else(|| "  n/a ".to_string());
        println!(
            "{}  {}  neutral {:5.1}%  aware {}  {}",
            r.created_at.format("%Y-%m-%d %H:%M"),
            short_id(&r.id),
            r.forecast.p_neutral * 100.0,
            aware,
            r.forecast.question
        );
    }
    Ok(())
}

async fn init_config(config_path: &PathBuf, args: InitArgs) -> Result<()> {
    if config_path.exists() && !args.force {
        bail!("{} already exists (use --force to overwrite)", config_path.display());
    }
    ConfigManager::new(config_path).save(&ForecastConfig::default()).await?;
    println!("Wrote {}", config_path.display());
    Ok(())
}
