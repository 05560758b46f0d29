//! Content Updater CLI application
//!
//! Command-line interface for planning, applying and recovering in-place
//! updates of a game installation.

use std::process;

use anyhow::Context;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use content_updater::cli::{
    handle_apply, handle_backup, handle_doctor, handle_hash, handle_plan, handle_recover,
    handle_resolve, handle_status, handle_versions, sidecar, Cli, CommandContext, Commands,
};
use content_updater::config::{AppConfig, RuntimeConfig};
use content_updater::constants::app::{LOGS_DIR, LOG_FILE_PREFIX};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

/// Main application logic
async fn run() -> anyhow::Result<()> {
    // Ignore a missing .env file
    dotenv::dotenv().ok();

    let cli = Cli::parse_args();

    let app_config = AppConfig::load(cli.global.config.clone())
        .await
        .context("Failed to load configuration")?;

    // First-run setup prints to stdout, which the sidecar reserves
    if !cli.is_sidecar() && cli.global.config.is_none() {
        if let Err(e) = AppConfig::initialize_first_run().await {
            eprintln!("Could not create default configuration: {}", e);
        }
    }

    let mut runtime = app_config
        .to_runtime_config()
        .context("Invalid configuration")?;
    if let Some(data_dir) = &cli.global.data_dir {
        runtime.app_data_dir = data_dir.clone();
    }

    let _guard = init_logging(&cli, &app_config, &runtime);
    info!("Content Updater v{} starting", env!("CARGO_PKG_VERSION"));

    let colors = app_config.logging.colored_output;
    let ctx = CommandContext::new(runtime, &cli.global, colors);

    let result = match cli.command {
        Commands::Plan(args) => handle_plan(&ctx, args).await,
        Commands::Apply(args) => handle_apply(&ctx, args).await,
        Commands::Status => handle_status(&ctx).await,
        Commands::Recover { restore_point } => handle_recover(&ctx, restore_point).await,
        Commands::Resolve { packs, deps } => handle_resolve(packs, deps).await,
        Commands::Hash { paths } => handle_hash(&ctx, paths).await,
        Commands::Backup(args) => handle_backup(&ctx, args).await,
        Commands::Doctor { repair } => handle_doctor(&ctx, repair).await,
        Commands::Versions { index_url } => handle_versions(&ctx, index_url).await,
        Commands::Sidecar => sidecar::run(ctx.config.clone()).await,
    };

    if let Err(e) = &result {
        info!("Command failed ({}): {}", e.category(), e);
    }
    Ok(result?)
}

/// Initialize logging from CLI verbosity and the logging config section
///
/// Console output always goes to stderr. The returned guard flushes the
/// optional log file and must live until exit.
fn init_logging(cli: &Cli, config: &AppConfig, runtime: &RuntimeConfig) -> Option<WorkerGuard> {
    let level = if cli.global.verbose || cli.global.very_verbose || cli.global.quiet {
        cli.log_level().to_string().to_lowercase()
    } else {
        config.logging.level.clone()
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("content_updater={}", level)));

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(config.logging.colored_output && !cli.is_sidecar())
        .with_target(false)
        .with_level(cli.global.very_verbose || cli.is_sidecar());

    let mut guard = None;
    let file_layer = if config.logging.file_logging {
        let log_dir = runtime.app_data_dir.join(LOGS_DIR);
        match std::fs::create_dir_all(&log_dir) {
            Ok(()) => {
                let appender = tracing_appender::rolling::daily(&log_dir, LOG_FILE_PREFIX);
                let (writer, file_guard) = tracing_appender::non_blocking(appender);
                guard = Some(file_guard);
                Some(
                    fmt::layer()
                        .with_writer(writer)
                        .with_ansi(false)
                        .with_target(true)
                        .with_line_number(true),
                )
            }
            Err(e) => {
                eprintln!("Could not create log directory {}: {}", log_dir.display(), e);
                None
            }
        }
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    if cli.global.very_verbose {
        info!("Very verbose logging enabled");
    } else if cli.global.verbose {
        info!("Verbose logging enabled");
    }
    guard
}
