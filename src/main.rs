use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use clap::Parser;
use phoneshamer::storage::SqliteEventStore;
use phoneshamer::{AppConfig, Orchestrator, QueryHandle, SharedState};
use std::sync::Arc;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;

#[derive(Parser, Debug)]
#[command(name = "phoneshamer")]
#[command(about = "Detects phone usage on camera and records debounced usage events")]
#[command(version)]
#[command(long_about = "Watches a camera, asks an object detector for people and phones, and \
records a screenshot plus a database row whenever a phone stays in someone's hand for long \
enough. Open palm and closed fist gestures turn monitoring on and off.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "phoneshamer.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    #[arg(long, help = "Validate configuration file and exit without starting the system")]
    validate_config: bool,

    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    #[arg(long, help = "Perform dry run - initialize components but don't start them")]
    dry_run: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    #[arg(long, help = "Print usage statistics as JSON and exit")]
    stats: bool,

    #[arg(long, help = "Print events from the last --days days as JSON and exit")]
    events: bool,

    /// Days covered by --stats and --events, ending now
    #[arg(long, default_value_t = 7)]
    days: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    let config = match AppConfig::load_from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    let guard = init_logging(&args, &config)?;

    info!("Starting phoneshamer v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        eprintln!("✗ Configuration validation failed: {}", e);
        drop(guard);
        std::process::exit(1);
    }

    if args.validate_config {
        info!("Configuration validation successful");
        println!("✓ Configuration is valid");
        return Ok(());
    }

    if args.stats {
        print_stats(&config, args.days).await?;
        return Ok(());
    }

    if args.events {
        print_events(&config, args.days).await?;
        return Ok(());
    }

    let mut orchestrator = Orchestrator::new(config).await.map_err(|e| {
        error!("Failed to create orchestrator: {}", e);
        e
    })?;

    orchestrator.initialize().await.map_err(|e| {
        error!("Failed to initialize system: {}", e);
        e
    })?;

    if args.dry_run {
        info!("Dry run mode - components initialized but not started");
        println!("✓ Dry run completed successfully - all components initialized");
        return Ok(());
    }

    orchestrator.start().await.map_err(|e| {
        error!("Failed to start system: {}", e);
        e
    })?;

    let exit_code = orchestrator.run().await.map_err(|e| {
        error!("System error during execution: {}", e);
        e
    })?;

    info!("phoneshamer exited with code: {}", exit_code);

    // process::exit skips destructors; flush the file writer first
    drop(orchestrator);
    drop(guard);
    std::process::exit(exit_code);
}

fn init_logging(args: &Args, config: &AppConfig) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("phoneshamer={}", log_level)));

    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_target(true)
                .with_thread_ids(args.debug)
                .with_file(args.debug)
                .with_line_number(args.debug)
                .boxed()
        }
    };

    // Daily rolling file next to the console output
    let (file_layer, guard) = match &config.logging.directory {
        Some(directory) => {
            std::fs::create_dir_all(directory)?;
            let appender =
                tracing_appender::rolling::daily(directory, &config.logging.file_prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_ansi(false)
                .with_target(true)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(file_layer)
        .with(env_filter)
        .init();

    Ok(guard)
}

/// Read-only view over the configured database, without starting the pipeline
fn open_query(config: &AppConfig) -> Result<QueryHandle> {
    let tz = config.storage.timezone()?;
    let store = Arc::new(SqliteEventStore::open(&config.storage.database_path)?);
    let state = Arc::new(SharedState::new(
        config.gesture.initial_state,
        config.proximity.cooldown(),
    ));
    Ok(QueryHandle::new(state, store, tz))
}

async fn print_stats(config: &AppConfig, days: u32) -> Result<()> {
    let stats = open_query(config)?.stats(days).await?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

async fn print_events(config: &AppConfig, days: u32) -> Result<()> {
    let end = Utc::now();
    let start = end - ChronoDuration::days(i64::from(days));
    let events = open_query(config)?.events_between(start, end).await?;
    println!("{}", serde_json::to_string_pretty(&events)?);
    Ok(())
}

/// Print default configuration in TOML format
fn print_default_config() -> Result<()> {
    println!("# phoneshamer configuration file");
    println!("# Every key is optional; the values below are the defaults.");
    println!("# Environment overrides use PHONESHAMER_<SECTION>__<KEY>,");
    println!("# e.g. PHONESHAMER_PROXIMITY__COOLDOWN_SECONDS=30");
    println!("#");
    println!("# camera.source: \"device\" (V4L2, needs the `camera` feature), \"snapshot\" or \"replay\"");
    println!("# proximity.overlap_method: \"containment\" (intersection over the smaller box) or \"iou\"");
    println!("# storage.orphan_policy: \"delete\" or \"retain\" a screenshot whose event row failed");
    println!("# storage.retention_days: 0 keeps events forever");
    println!("# screenshot.annotate: outline the person and phone boxes on saved screenshots");
    println!("#");
    println!("# A second camera for gestures can be configured under [gesture_camera]");
    println!("# with the same keys as [camera]; without it gestures use the main camera.");
    println!();

    let default_config = toml::to_string_pretty(&AppConfig::default())?;
    println!("{}", default_config);
    Ok(())
}
