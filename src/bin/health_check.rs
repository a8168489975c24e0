//! Connect to the configured browser endpoint and report whether it responds.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use dotenv::dotenv;
use tracing::{error, info};

use video_harvest::chrome::ChromeDriver;
use video_harvest::config::Config;
use video_harvest::connection::ConnectionManager;
use video_harvest::{page_options, telemetry};

#[derive(Parser, Debug)]
#[command(name = "health_check")]
struct Cli {
    /// Check the remote browser at BROWSERLESS_URL instead of a local one
    #[arg(short = 'b', long)]
    use_browserless: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();
    let cli = Cli::parse();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("health_check: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = telemetry::init(&config) {
        eprintln!("health_check: {:#}", e);
        return ExitCode::FAILURE;
    }

    let driver = Arc::new(ChromeDriver::from_config(&config, cli.use_browserless));
    let mut manager = ConnectionManager::new(driver, &config, page_options(&config));

    let healthy = manager.health_check().await;
    manager.disconnect().await;

    if healthy {
        info!("Browser endpoint is healthy");
        ExitCode::SUCCESS
    } else {
        error!("Browser endpoint is not healthy");
        ExitCode::FAILURE
    }
}
