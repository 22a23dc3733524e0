//! reelstitch - clip concatenation service
//!
//! Entry point for the HTTP service and the one-shot CLI commands.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn, Level};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

use reelstitch::cli::{Args, Commands};
use reelstitch::config::Config;
use reelstitch::job::{JobRequest, JobStage};
use reelstitch::media::MediaProcessorFactory;
use reelstitch::pipeline::{purge_stale, JobRunner};
use reelstitch::server::{self, handlers::JobSucceeded};
use reelstitch::worker::JobPool;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logging to both console and file
    let _log_guard = setup_logging(args.verbose)?;

    let mut config = load_config(&args)?;
    config.apply_env_overrides()?;

    match args.command {
        Commands::Serve { host, port } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            config.validate()?;
            run_server(Arc::new(config)).await?;
        }
        Commands::Run { request } => {
            config.validate()?;
            let content = std::fs::read_to_string(&request)
                .with_context(|| format!("Failed to read job request {}", request.display()))?;
            let request: JobRequest = serde_json::from_str(&content)
                .with_context(|| format!("Invalid job request {}", request.display()))?;
            run_once(Arc::new(config), request).await?;
        }
        Commands::Check => {
            let media = MediaProcessorFactory::create_processor(config.media.clone());
            media.check_availability().await?;
            println!("{}", media.get_version_info().await?);
        }
        Commands::InitConfig { output } => {
            Config::default().save_to_file(&output)?;
            println!("Wrote default configuration to {}", output.display());
        }
        Commands::PurgeScratch => {
            let root = config.pipeline.scratch_root.clone().unwrap_or_else(std::env::temp_dir);
            let removed = purge_stale(&root, config.pipeline.stale_after())?;
            println!("Removed {} stale workspace(s) from {}", removed, root.display());
        }
    }

    Ok(())
}

/// `--config`, then ./config.toml, then built-in defaults
fn load_config(args: &Args) -> Result<Config> {
    let config = match &args.config {
        Some(config_path) => Config::from_file(config_path)?,
        None => {
            if std::path::Path::new("config.toml").exists() {
                info!("Found config.toml in current directory, loading...");
                Config::from_file("config.toml")?
            } else {
                Config::default()
            }
        }
    };
    Ok(config)
}

async fn run_server(config: Arc<Config>) -> Result<()> {
    info!("Starting reelstitch {}", env!("CARGO_PKG_VERSION"));

    let runner = JobRunner::from_config(Arc::clone(&config)).await?;
    match runner.media().check_availability().await {
        Ok(()) => info!("Media tool: {}", runner.media().get_version_info().await?),
        Err(e) => warn!("{}; jobs will fail until it is installed", e),
    }
    purge_stale(runner.scratch_root(), config.pipeline.stale_after())?;

    let pool = JobPool::new(Arc::new(runner), &config.worker, config.server.max_detail_chars);
    server::serve(config, pool).await?;
    Ok(())
}

async fn run_once(config: Arc<Config>, request: JobRequest) -> Result<()> {
    let runner = JobRunner::from_config(Arc::clone(&config)).await?;
    let spec = runner.prepare(request)?;
    let job_id = Uuid::new_v4();

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")?);
    spinner.enable_steady_tick(Duration::from_millis(120));

    let (stage_tx, mut stage_rx) = watch::channel(JobStage::Created);
    let progress = {
        let spinner = spinner.clone();
        tokio::spawn(async move {
            while stage_rx.changed().await.is_ok() {
                spinner.set_message(stage_rx.borrow_and_update().to_string());
            }
        })
    };

    let result = runner.run(job_id, spec, &stage_tx).await;
    drop(stage_tx);
    let _ = progress.await;

    match result {
        Ok(artifact) => {
            spinner.finish_with_message(format!("Finished {}", artifact.output_name));
            let body = JobSucceeded { status: "ok", artifact };
            println!("{}", serde_json::to_string_pretty(&body)?);
            Ok(())
        }
        Err(failure) => {
            spinner.abandon_with_message(format!("Failed while {}", failure.stage));
            let summary = failure.summary(config.server.max_detail_chars);
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Err(failure.into())
        }
    }
}

/// Setup logging to both console and file
fn setup_logging(verbose: bool) -> Result<WorkerGuard> {
    // Create log directory
    let log_dir = std::env::current_dir()?.join(".reelstitch").join("log");
    std::fs::create_dir_all(&log_dir)?;

    // Set up file appender with daily rotation
    let file_appender = rolling::daily(&log_dir, "reelstitch.log");
    let (non_blocking_file, guard) = non_blocking(file_appender);

    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    let console_layer = fmt::layer()
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false); // No ANSI colors in file

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!("Logging initialized - console: {}, file: {}",
          log_level, log_dir.join("reelstitch.log").display());

    Ok(guard)
}
