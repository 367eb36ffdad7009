use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn};

use scribe_state::activity_log::{default_log_directory, init_logging};
use scribe_state::{AuthHandle, Config, StateContainer};

/// Headless client that prefetches the scribe state and follows external changes
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Backend API base URL (overrides the config file)
    #[arg(long)]
    api_url: Option<String>,

    /// Bearer access token
    #[arg(long, env = "AI_SCRIBE_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Seconds between external change checks
    #[arg(long)]
    interval: Option<u64>,

    /// Run a single change check and exit
    #[arg(long)]
    once: bool,

    /// Path to a config file (default ~/.aiscribe/config.json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default(),
    };
    if let Some(url) = args.api_url {
        config.api_base_url = url;
    }
    if let Some(interval) = args.interval {
        config.monitor_interval_secs = interval;
    }

    // Initialize logging
    let log_level = if args.verbose { "debug" } else { "info" };
    let log_dir = if config.log_to_file {
        default_log_directory()
    } else {
        None
    };
    init_logging(log_dir.as_deref(), log_level).context("Failed to initialize logging")?;

    let auth = AuthHandle::new();
    if let Some(token) = &args.token {
        auth.set_token(token);
    }
    if !auth.is_ready() {
        anyhow::bail!("No access token: pass --token or set AI_SCRIBE_TOKEN");
    }

    let state = StateContainer::connect(&config, auth).context("Failed to create API client")?;
    info!(api = %config.api_base_url, "Prefetching scribe state");

    let report = state.prefetch().await;
    for (store, error) in &report.failures {
        warn!(store = %store, error = %error, "Prefetch failed");
    }
    print_summary(&state);

    if args.once {
        match state.monitor().tick().await {
            Ok(summary) => println!(
                "Changes: user info {}, note types {}, encounters {}",
                if summary.user_info { "updated" } else { "unchanged" },
                summary.note_definitions,
                summary.encounters
            ),
            Err(e) => warn!(error = %e.name(), "Change check failed"),
        }
    } else {
        state.start_monitor();
        info!(
            interval_secs = config.monitor_interval().as_secs(),
            "Following external changes, press Ctrl-C to stop"
        );
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl-C")?;
        info!("Stopping...");
    }

    state.shutdown().await;
    Ok(())
}

fn print_summary(state: &StateContainer) {
    let encounters = state.encounters();
    println!("\n=== Scribe State ===");
    match state.current_user().get() {
        Some(user) => println!("User:              {}", user.username),
        None => println!("User:              (not loaded)"),
    }
    println!(
        "Encounters:        {} ({:?}, {:?})",
        encounters.len(),
        encounters.init_state(),
        encounters.fetch_state()
    );
    println!(
        "Note types:        {} ({:?})",
        state.note_types().list().len(),
        state.note_types().init_state()
    );
    println!(
        "Sample recordings: {} ({:?})",
        state.sample_recordings().list().len(),
        state.sample_recordings().init_state()
    );
    println!("====================\n");
}
