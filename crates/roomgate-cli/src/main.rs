// ============================================================================
// roomgate - card reader and control node binary
// ============================================================================
// Usage:
//   roomgate run [--full]                      Run the scan loop on this reader
//   roomgate import [--if-requested]           LMS roster + module import
//   roomgate status                            Show reader and import status
//   roomgate request-update --all              Ask every reader to reload
//   roomgate request-update --reader 3 [...]   Change one reader's properties
//   roomgate request-import                    Flag an LMS import as pending
//
// Configuration comes from ROOMGATE_* variables, optionally via a .env file.
// ============================================================================

use anyhow::{bail, Context, Result};
use clap::{ArgGroup, Parser, Subcommand};
use std::time::Duration;
use tracing::{error, info, warn};

use roomgate_core::cache::{ImportState, ReaderProperties};
use roomgate_core::{
    run_bulk_import, AppConfig, CanvasClient, Color, ExitReason, Feedback, FeedbackConfig,
    LineCardReader, LoadMode, ReaderSession, ScanLoop, SheetsStore, TableCache, TracingStrip,
};

/// How long the startup failure color stays up before exiting
const STARTUP_ALERT: Duration = Duration::from_secs(5);

/// Spreadsheet-driven room access control
#[derive(Parser)]
#[command(name = "roomgate", version, about = "Card reader access control backed by a spreadsheet")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scan loop, reading card tokens from stdin
    Run {
        /// Load full person records instead of the card/access columns only
        #[arg(long)]
        full: bool,
    },

    /// Import the LMS roster and module progress (control node)
    Import {
        /// Only run when an import has been requested
        #[arg(long)]
        if_requested: bool,
    },

    /// Show reader and import status
    Status,

    /// Ask readers to reload, optionally changing their properties
    #[command(group(ArgGroup::new("target").required(true).args(["all", "reader"])))]
    RequestUpdate {
        /// Every reader except the control node
        #[arg(long)]
        all: bool,

        /// A single reader id
        #[arg(long)]
        reader: Option<u32>,

        #[arg(long, requires = "reader")]
        location: Option<String>,

        /// enable or disable
        #[arg(long, requires = "reader", value_parser = parse_alarm)]
        alarm: Option<bool>,

        /// Alarm delay in minutes
        #[arg(long, requires = "reader")]
        delay: Option<u32>,
    },

    /// Flag an LMS import as pending
    RequestImport,
}

fn parse_alarm(s: &str) -> Result<bool, String> {
    match s.to_lowercase().as_str() {
        "enable" | "enabled" | "on" => Ok(true),
        "disable" | "disabled" | "off" => Ok(false),
        _ => Err(format!("Unknown alarm setting '{}'. Valid values: enable, disable", s)),
    }
}

fn init_logging() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("roomgate=debug".parse()?)
                .add_directive("roomgate_core=debug".parse()?),
        )
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Err(e) = dotenvy::dotenv() {
        eprintln!("Warning: Could not load .env file: {}", e);
    }
    init_logging()?;

    let config = AppConfig::from_env()?;
    let store = config.sheets_store()?;
    let cache = TableCache::new(store, config.cache_settings());

    match cli.command {
        Commands::Run { full } => cmd_run(&config, cache, full).await,
        Commands::Import { if_requested } => cmd_import(&config, cache, if_requested).await,
        Commands::Status => cmd_status(cache).await,
        Commands::RequestUpdate {
            all,
            reader,
            location,
            alarm,
            delay,
        } => {
            let props = ReaderProperties {
                location,
                alarm,
                alarm_delay: delay,
            };
            cmd_request_update(&config, cache, all, reader, props).await
        }
        Commands::RequestImport => cmd_request_import(&config, cache).await,
    }
}

fn require_control(config: &AppConfig, command: &str) -> Result<()> {
    if !config.is_control() {
        bail!(
            "'{}' runs on the control node (ROOMGATE_READER_ID=0), this is reader {}",
            command,
            config.reader_id
        );
    }
    Ok(())
}

async fn cmd_run(config: &AppConfig, cache: TableCache<SheetsStore>, full: bool) -> Result<()> {
    let mode = if full || config.is_control() {
        LoadMode::Full
    } else {
        LoadMode::Limited
    };
    let mut feedback = Feedback::spawn(TracingStrip::default(), FeedbackConfig::default());
    let mut session = ReaderSession::new(cache, config.sync_schedule(), config.scan_logs);

    if let Err(e) = session.start(mode).await {
        error!("Startup failed: {}", e);
        feedback.alert(Color::ALERT_RED).await;
        tokio::time::sleep(STARTUP_ALERT).await;
        feedback.shutdown().await;
        bail!("Reader {} could not start: {}", config.reader_id, e);
    }

    info!("Reader {} ready, waiting for cards", config.reader_id);
    let mut scan = ScanLoop::new(session, LineCardReader::stdin(), feedback);
    let reason = scan
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Could not listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await;

    match reason {
        ExitReason::Interrupted => {
            info!("Stopped after {} scans", scan.scans());
            Ok(())
        }
        ExitReason::HardwareError(e) => bail!("Card reader failed: {}", e),
    }
}

async fn cmd_import(
    config: &AppConfig,
    mut cache: TableCache<SheetsStore>,
    if_requested: bool,
) -> Result<()> {
    require_control(config, "import")?;

    if if_requested {
        let status = cache.import_status().await?;
        if status.state != ImportState::Pending {
            println!("No import requested ({:?}).", status.state);
            return Ok(());
        }
    }

    let settings = config.lms_settings()?;
    let domain = settings.login_domain.clone();
    let client = CanvasClient::new(settings)?;
    let report = run_bulk_import(&mut cache, &client, domain.as_deref())
        .await
        .context("LMS import failed")?;

    println!("=== LMS Import ===");
    println!("Roster:   {}", report.roster);
    println!("Inserted: {}", report.inserted);
    println!("Staff:    {} skipped", report.skipped_staff);
    println!("Updated:  {}", report.evaluated);
    if !report.failed.is_empty() {
        println!("Failed:   {}", report.failed.join(", "));
    }
    Ok(())
}

async fn cmd_status(mut cache: TableCache<SheetsStore>) -> Result<()> {
    cache.reload_readers().await?;
    let import = cache.import_status().await?;

    println!(
        "{:<4}  {:<10}  {:<20}  {:<8}  {:<10}  {:<8}  {}",
        "ID", "STATUS", "LOCATION", "ALARM", "ALARM STAT", "UPDATE", "LAST CHECK-IN"
    );
    println!("{}", "-".repeat(90));

    for reader in cache.readers() {
        let alarm = match reader.alarm {
            Some(true) => format!("on {}m", reader.alarm_delay_min),
            Some(false) => "off".to_string(),
            None => "-".to_string(),
        };
        println!(
            "{:<4}  {:<10}  {:<20}  {:<8}  {:<10}  {:<8}  {}",
            reader.id,
            reader.status,
            reader.location,
            alarm,
            reader.alarm_status,
            reader.needs_update.as_cell(),
            reader.last_checked_in
        );
    }

    println!("\nReaders: {}", cache.readers().len());
    println!(
        "Import:  {:?} (last completed: {})",
        import.state,
        import
            .last_completed
            .map(|t| t.to_string())
            .unwrap_or_else(|| "never".into())
    );
    Ok(())
}

async fn cmd_request_update(
    config: &AppConfig,
    mut cache: TableCache<SheetsStore>,
    all: bool,
    reader: Option<u32>,
    props: ReaderProperties,
) -> Result<()> {
    require_control(config, "request-update")?;

    if all {
        let count = cache.request_update_all().await?;
        println!("Requested update on {} readers", count);
        return Ok(());
    }

    let Some(id) = reader else {
        bail!("Pass --all or --reader");
    };
    if id == 0 {
        bail!("Reader 0 is the control node");
    }
    cache.request_update(id, props).await?;
    println!("Requested update on reader {}", id);
    Ok(())
}

async fn cmd_request_import(config: &AppConfig, mut cache: TableCache<SheetsStore>) -> Result<()> {
    require_control(config, "request-import")?;

    if cache.request_import().await? {
        println!("Import requested");
    } else {
        println!("An import is already running");
    }
    Ok(())
}
