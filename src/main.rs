//! vestro-sync - Vestro batch integration job
//!
//! Fetches every record category for each subject awaiting integration,
//! in parallel per subject, and delivers one payload per subject to the
//! downstream application. Failures are isolated per subject.
//!
//! Exit codes:
//!   0 - Run completed (individual subjects may have been skipped)
//!   1 - Incomplete configuration, or the run itself failed
//!       (subject source unreachable, shared login rejected, interrupted)

mod auth;
mod cli;
mod config;
mod delivery;
mod error;
mod models;
mod remote;
mod report;
mod source;
mod sync;

use anyhow::{Context, Result};
use auth::{AuthStrategy, SessionProvider};
use cli::{Args, OutputFormat};
use config::{Config, DEFAULT_CONFIG_FILE};
use delivery::HttpDelivery;
use indicatif::{ProgressBar, ProgressStyle};
use models::RunSummary;
use remote::{ClientSettings, RemoteClient};
use source::HttpSubjectSource;
use sync::{Aggregator, Orchestrator, SyncSettings};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    // Values in .env behave like real environment variables
    let _ = dotenvy::dotenv();

    let args = Args::parse_args();

    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    init_logging(&args);

    info!("vestro-sync v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    match run_job(args).await {
        Ok(exit_code) => std::process::exit(exit_code),
        Err(e) => {
            error!("Job failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .vestro-sync.toml.
fn handle_init_config() -> Result<()> {
    let path = std::path::Path::new(DEFAULT_CONFIG_FILE);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            DEFAULT_CONFIG_FILE
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", DEFAULT_CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", DEFAULT_CONFIG_FILE);
    println!("   Fill in the API, source and delivery URLs before the first run.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
fn init_logging(args: &Args) {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level())
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

/// Run the complete job. Returns the exit code.
async fn run_job(args: Args) -> Result<i32> {
    let mut config = load_config(&args)?;
    config.merge_with_args(&args);

    if let Err(e) = config.validate() {
        eprintln!("Error: incomplete configuration: {:#}", e);
        return Ok(1);
    }

    // One connection pool for the whole run; every request sets its own timeout
    let http = reqwest::Client::builder()
        .user_agent(concat!("vestro-sync/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")?;

    let client = RemoteClient::new(http.clone(), ClientSettings::from(&config.remote));
    let sessions = SessionProvider::new(client.clone(), AuthStrategy::from_config(&config.remote));
    let source = HttpSubjectSource::new(http.clone(), &config.source);
    let delivery = HttpDelivery::new(http, &config.delivery);

    println!("🔄 Vestro sync");
    println!("   API: {}", client.settings().base_url);
    println!("   Auth mode: {:?}", sessions.mode());
    println!("   Window: {}h", config.sync.fetch_since_hours);

    let mut orchestrator = Orchestrator::new(
        source,
        sessions,
        Aggregator::new(client),
        delivery,
        SyncSettings::from(&config.sync),
    );

    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    if args.dry_run {
        return handle_dry_run(&orchestrator, &cancel).await;
    }

    if !args.quiet {
        orchestrator = orchestrator.with_progress(subject_progress_bar());
    }

    let summary = orchestrator.run(&cancel).await?;

    if let Some(ref path) = args.summary {
        let content = match args.format {
            OutputFormat::Json => report::generate_json_summary(&summary)?,
            OutputFormat::Markdown => report::generate_markdown_summary(&summary),
        };
        report::write_summary(&content, path)?;
        info!("Run summary written to {}", path.display());
    }

    print_summary(&summary);
    Ok(0)
}

/// Cancel the run on Ctrl-C. In-flight requests are abandoned.
fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling run...");
            cancel.cancel();
        }
    });
}

fn subject_progress_bar() -> ProgressBar {
    let pb = ProgressBar::new(0);
    if let Ok(style) =
        ProgressStyle::with_template("   {spinner} [{bar:30}] {pos}/{len} {msg}")
    {
        pb.set_style(style.progress_chars("=> "));
    }
    pb
}

/// Handle --dry-run: list subjects and their effective checkpoints.
async fn handle_dry_run<S, A, D>(
    orchestrator: &Orchestrator<S, A, D>,
    cancel: &CancellationToken,
) -> Result<i32>
where
    S: source::SubjectSource,
    A: auth::Authenticator,
    D: delivery::Delivery,
{
    println!("\n🔍 Dry run: listing subjects (no Vestro calls)...\n");

    let plan = orchestrator.plan(cancel).await?;
    if plan.is_empty() {
        println!("   No subjects awaiting integration.");
    } else {
        for (subject, since) in &plan {
            println!(
                "     • subject {} since {}{}",
                subject.id,
                since.format("%Y-%m-%d %H:%M:%S UTC"),
                if *since > subject.last_sync { " (clamped)" } else { "" }
            );
        }
        println!("\n   Total: {} subjects", plan.len());
    }

    println!("\n✅ Dry run complete. Nothing was fetched or delivered.");
    Ok(0)
}

fn print_summary(summary: &RunSummary) {
    println!("\n📊 Run Summary:");
    println!("   Subjects: {}", summary.subjects.len());
    println!(
        "   - ✅ Delivered: {} | 💤 Empty: {} | ⚠️  Skipped: {}",
        summary.delivered(),
        summary.empty(),
        summary.skipped()
    );
    println!("   Duration: {:.1}s", summary.duration_seconds());
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded default config from {}", DEFAULT_CONFIG_FILE);
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => {
            warn!("Failed to load config: {}", e);
            Ok(Config::default())
        }
    }
}
