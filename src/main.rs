use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use dotenv::dotenv;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use video_harvest::chrome::ChromeDriver;
use video_harvest::config::Config;
use video_harvest::connection::ConnectionManager;
use video_harvest::error::ScrapeError;
use video_harvest::models::{Harvest, Termination, VideoRecord};
use video_harvest::persistence::{BackendSelection, PersistenceCoordinator};
use video_harvest::scraper::VideoSearchScraper;
use video_harvest::{page_options, telemetry};

/// Harvest video search results and store them locally and in Google Sheets.
#[derive(Parser, Debug)]
#[command(name = "video-harvest", version)]
struct Cli {
    /// Search query (defaults to DEFAULT_SEARCH_QUERY)
    #[arg(short, long)]
    query: Option<String>,

    /// Maximum number of results (defaults to MAX_RESULTS)
    #[arg(short, long)]
    max_results: Option<usize>,

    /// Use the remote browser at BROWSERLESS_URL instead of a local one
    #[arg(short = 'b', long)]
    use_browserless: bool,

    /// Do not write to Google Sheets
    #[arg(long)]
    no_sheets: bool,

    /// Do not write local JSON/CSV files
    #[arg(long)]
    no_local: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            // The subscriber may not be up yet.
            eprintln!("video-harvest: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = Config::from_env()?;
    telemetry::init(&config)?;

    let query = cli.query.clone().unwrap_or_else(|| config.default_search_query.clone());
    let max_results = cli.max_results.unwrap_or(config.max_results);
    let span = info_span!("run", run_id = %Uuid::new_v4(), query = %query);

    harvest_and_store(&cli, &config, &query, max_results)
        .instrument(span)
        .await
}

async fn harvest_and_store(cli: &Cli, config: &Config, query: &str, max_results: usize) -> Result<ExitCode> {
    info!(
        "Starting: query='{}', max_results={}, mode={}",
        query,
        max_results,
        if cli.use_browserless { "remote" } else { "local" }
    );

    let driver = Arc::new(ChromeDriver::from_config(config, cli.use_browserless));
    let options = page_options(config);
    let mut manager = ConnectionManager::new(driver, config, options.clone());
    let scraper = VideoSearchScraper::from_config(config, options)?;

    let outcome = tokio::select! {
        result = scrape(&mut manager, &scraper, query, max_results) => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };
    manager.disconnect().await;

    let harvest = match outcome {
        Some(Ok(harvest)) => harvest,
        Some(Err(e)) => {
            error!("Scrape failed: {}", e);
            return Ok(ExitCode::FAILURE);
        }
        None => {
            warn!("Interrupted, browser session released");
            return Ok(ExitCode::FAILURE);
        }
    };

    log_summary(&harvest);
    if harvest.records.is_empty() {
        warn!("No results to persist");
        return Ok(exit_for(&harvest));
    }

    let coordinator = PersistenceCoordinator::from_config(
        config,
        BackendSelection {
            local: !cli.no_local,
            sheets: !cli.no_sheets,
        },
    );
    if coordinator.backend_names().is_empty() {
        warn!("All backends disabled, results not persisted");
        return Ok(exit_for(&harvest));
    }

    let report = tokio::select! {
        report = coordinator.persist(&harvest.records) => report,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted while persisting");
            return Ok(ExitCode::FAILURE);
        }
    };

    info!("Persisted {} record(s) in total", report.total_written());
    if !report.any_success() {
        error!("No storage backend accepted the results");
        return Ok(ExitCode::FAILURE);
    }
    Ok(exit_for(&harvest))
}

async fn scrape(
    manager: &mut ConnectionManager,
    scraper: &VideoSearchScraper,
    query: &str,
    max_results: usize,
) -> Result<Harvest, ScrapeError> {
    let session = manager.connect().await?;
    scraper.search(session.as_ref(), query, max_results).await
}

fn exit_for(harvest: &Harvest) -> ExitCode {
    match harvest.termination {
        Termination::Aborted(_) => ExitCode::FAILURE,
        _ => ExitCode::SUCCESS,
    }
}

fn log_summary(harvest: &Harvest) {
    match &harvest.termination {
        Termination::TargetReached => info!("Harvested {} video(s)", harvest.records.len()),
        Termination::Exhausted => warn!(
            "Harvested {} video(s); results ran out after {} scroll(s)",
            harvest.records.len(),
            harvest.scrolls
        ),
        Termination::Aborted(reason) => warn!(
            "Harvested {} video(s) before the page failed: {}",
            harvest.records.len(),
            reason
        ),
    }

    let mut ranked: Vec<&VideoRecord> = harvest.records.iter().collect();
    ranked.sort_by(|a, b| b.views_count().cmp(&a.views_count()));
    for (rank, record) in ranked.iter().take(5).enumerate() {
        info!(
            "#{} {} ({} views) {}",
            rank + 1,
            record.title(),
            record.views_count(),
            record.url()
        );
    }
}
