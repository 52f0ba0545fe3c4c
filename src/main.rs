//! Show Automator - headless entry point
//!
//! Runs a show against simulated decks: loads the config, queues the show
//! file and drives playback, automation and RadioDJ monitoring until
//! interrupted.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use show_automator::config::AutomatorConfig;
use show_automator::runtime::{self, RunOptions, ShowFile};
use show_automator::scheduler::ControlMode;

/// Command-line arguments for show-automator
#[derive(Parser, Debug)]
#[command(name = "show-automator")]
#[command(about = "Dual-deck radio show automator")]
#[command(version)]
struct Args {
    /// JSON config file; defaults apply when it does not exist
    #[arg(short, long, default_value = "show-automator.json", env = "SHOW_AUTOMATOR_CONFIG")]
    config: PathBuf,

    /// JSON show file with the items to queue
    #[arg(short, long)]
    show: Option<PathBuf>,

    /// Start in this control mode (manual or automation)
    #[arg(short, long)]
    mode: Option<String>,

    /// Exit once the queue has played out
    #[arg(long)]
    exit_when_idle: bool,
}

async fn start(args: Args) -> Result<(), String> {
    let config = AutomatorConfig::load(&args.config)?;
    let mut show = match args.show.as_deref() {
        Some(path) => ShowFile::load(path)?,
        None => ShowFile::default(),
    };
    if let Some(mode) = args.mode.as_deref() {
        show.mode = Some(ControlMode::from_str(mode));
    }
    runtime::run(
        config,
        show,
        RunOptions {
            exit_when_idle: args.exit_when_idle,
        },
    )
    .await
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    log::info!("Config: {}", args.config.display());

    match start(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
