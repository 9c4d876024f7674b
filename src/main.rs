use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{debug, info};

use confession_bot::{Config, config::constants, logging, trigger};

/// Confession Bot - republishes numbered confession posts as image cards.
///
/// Meant to be run by an external trigger (cron, a web hook, a systemd
/// timer). Every invocation of `update` performs at most one run; concurrent
/// invocations are serialized by a lock file in the data directory.
///
/// # Environment Variables
///
/// Required for publishing:
/// * `CONSUMER_KEY`, `CONSUMER_SECRET`, `ACCESS_TOKEN`, `ACCESS_TOKEN_SECRET`
///
/// Optional (with defaults):
/// * `PAGE_NAME` - Page to poll (default: "columbiaconfessionz")
/// * `PAGE_DEPTH` - Listing pages per run (default: "3")
/// * `DATA_DIR` - State, log, lock and expiry files (default: ".")
/// * `TEMPLATE_FILE` - Card template (default: "./assets/template.html")
/// * `FONT_FILE` - Primary font (default: "./assets/fonts/primary.ttf")
/// * `FALLBACK_FONT_FILES` - Comma-separated extra fonts
/// * `PUBLISH_DELAY_MS` - Pause between publishes (default: "500")
/// * `HTTP_TIMEOUT_SECONDS` - Per-request timeout (default: "30")
/// * `OPERATOR_ID` - Account receiving credential reminders
///
/// A `.env` file in the data directory is read first if present.
#[derive(Parser, Debug)]
#[command(name = "confession-bot", version, about)]
struct Cli {
    /// Directory holding state.json, bot.log, expiry.json and bot.lock
    #[arg(short, long, env = "DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, Default)]
enum Command {
    /// Run the pipeline once
    #[default]
    Update,

    /// Print the accumulated log as HTML
    Logs,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let data_dir = cli.data_dir.unwrap_or_else(|| PathBuf::from("."));

    // A missing .env is normal; the variables may come from the environment.
    let env_loaded = dotenvy::from_path(Config::env_file(&data_dir)).is_ok();

    let log_path = data_dir.join(constants::LOG_FILE);
    logging::init(&log_path)
        .with_context(|| format!("Failed to open log file {}", log_path.display()))?;
    debug!("Loaded .env from data directory: {}", env_loaded);

    match cli.command.unwrap_or_default() {
        Command::Update => {
            let config = Config::load()
                .context("Failed to load configuration from environment")?
                .with_data_dir(&data_dir);
            info!(
                "Polling '{}' ({} page(s)), data in {}",
                config.page_name,
                config.page_depth,
                config.data_dir.display()
            );
            println!("{}", trigger::run_update(&config));
        }
        Command::Logs => {
            let html = trigger::read_logs(&log_path)
                .with_context(|| format!("Failed to read {}", log_path.display()))?;
            println!("{}", html);
        }
    }

    Ok(())
}
