use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use rollcall_core::{
    AttendanceController, ControllerSettings, Euclidean, NearestMatcher, RosterLoader, Session,
    SidecarEncoder, DATE_FORMAT, TIMESTAMP_FORMAT,
};
use rollcall_store::{MemoryGateway, PersistenceGateway, PersistenceSink, SqliteGateway};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

mod capture;
mod config;

use config::Config;

/// How long to wait for the capture loop to notice a stop request.
const STOP_GRACE: Duration = Duration::from_secs(2);

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall classroom attendance", version)]
struct Cli {
    /// TOML config file (default: $ROLLCALL_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record attendance for a class from a stream of detected faces
    Run {
        /// Class to monitor (e.g., "class A")
        #[arg(short, long)]
        class: String,
        /// JSON-lines frame stream, or "-" for stdin
        #[arg(short, long, default_value = "-")]
        frames: String,
        /// Override the match threshold
        #[arg(long)]
        threshold: Option<f32>,
        /// Override the window start (HH:MM[:SS])
        #[arg(long)]
        window_start: Option<String>,
        /// Override the window end (HH:MM[:SS])
        #[arg(long)]
        window_end: Option<String>,
        /// Keep attendance in memory only
        #[arg(long)]
        dry_run: bool,
    },
    /// Load a class roster and list its students
    Roster {
        #[arg(short, long)]
        class: String,
    },
    /// Show the stored summary for a class
    Summary {
        #[arg(short, long)]
        class: String,
        /// Date (YYYY-MM-DD), default today
        #[arg(short, long)]
        date: Option<String>,
    },
    /// List stored attendance events for a class
    Events {
        #[arg(short, long)]
        class: String,
        /// Date (YYYY-MM-DD), default today
        #[arg(short, long)]
        date: Option<String>,
    },
    /// Show effective configuration
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Commands::Run {
            class,
            frames,
            threshold,
            window_start,
            window_end,
            dry_run,
        } => {
            if let Some(t) = threshold {
                config.match_threshold = t;
            }
            if let Some(s) = window_start {
                config.window_start = rollcall_core::parse_time_of_day(&s)?;
            }
            if let Some(e) = window_end {
                config.window_end = rollcall_core::parse_time_of_day(&e)?;
            }
            config.validate().context("invalid configuration")?;

            if dry_run {
                run_attendance(&config, &class, &frames, MemoryGateway::new()).await
            } else {
                let gateway = SqliteGateway::open(&config.db_path)
                    .with_context(|| format!("opening database {}", config.db_path.display()))?;
                run_attendance(&config, &class, &frames, gateway).await
            }
        }
        Commands::Roster { class } => show_roster(&config, &class),
        Commands::Summary { class, date } => {
            let date = parse_date(date.as_deref())?;
            let gateway = SqliteGateway::open(&config.db_path)?;
            match gateway.load_summary(&class, date)? {
                Some(summary) => println!("{}", serde_json::to_string_pretty(&summary)?),
                None => println!("No summary recorded for '{class}' on {date}"),
            }
            Ok(())
        }
        Commands::Events { class, date } => {
            let date = parse_date(date.as_deref())?;
            let gateway = SqliteGateway::open(&config.db_path)?;
            let events = gateway.load_events(&class, date)?;
            if events.is_empty() {
                println!("No attendance recorded for '{class}' on {date}");
            }
            for event in events {
                println!(
                    "{}  {:<8}  {}",
                    event.timestamp.format(TIMESTAMP_FORMAT),
                    event.status,
                    event.student_id
                );
            }
            Ok(())
        }
        Commands::Status => {
            let window = config.window().map(|w| w.to_string());
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "version": env!("CARGO_PKG_VERSION"),
                    "faces_dir": config.faces_dir,
                    "db_path": config.db_path,
                    "match_threshold": config.match_threshold,
                    "window": window.unwrap_or_else(|e| format!("invalid: {e}")),
                    "write_attempts": config.write_attempts,
                    "retry_backoff_ms": config.retry_backoff_ms,
                }))?
            );
            Ok(())
        }
    }
}

fn parse_date(value: Option<&str>) -> Result<NaiveDate> {
    match value {
        Some(v) => NaiveDate::parse_from_str(v, DATE_FORMAT)
            .with_context(|| format!("invalid date '{v}' (expected YYYY-MM-DD)")),
        None => Ok(Local::now().date_naive()),
    }
}

fn show_roster(config: &Config, class: &str) -> Result<()> {
    let mut loader = RosterLoader::new(&config.faces_dir, SidecarEncoder);
    let (roster, report) = loader
        .load_with_report(class)
        .with_context(|| format!("loading roster for class '{class}'"))?;

    println!("Class: {}", roster.class_id());
    for student in roster.students() {
        println!("  {:<24} {}-dim descriptor", student.id, student.descriptor.len());
    }
    println!(
        "{} loaded, {} skipped (undecodable: {}, no face: {}, encode failed: {}, duplicate: {})",
        report.loaded,
        report.skipped(),
        report.undecodable,
        report.no_face,
        report.encode_failed,
        report.duplicate
    );
    Ok(())
}

/// Load the roster, resume today's session, and run the capture loop until the
/// stream ends or Ctrl-C.
async fn run_attendance<G>(config: &Config, class: &str, frames: &str, gateway: G) -> Result<()>
where
    G: PersistenceGateway + Send + 'static,
{
    let mut loader = RosterLoader::new(&config.faces_dir, SidecarEncoder);
    let roster = loader
        .load(class)
        .with_context(|| format!("loading roster for class '{class}'"))?;
    if roster.is_empty() {
        tracing::warn!(class, "no usable reference images; nobody can be marked present");
    }

    let mut source =
        capture::open_frames(frames).with_context(|| format!("opening frame source '{frames}'"))?;

    let today = Local::now().date_naive();
    let earlier = gateway
        .load_events(class, today)
        .context("loading today's attendance")?;
    if !earlier.is_empty() {
        tracing::info!(class, date = %today, restored = earlier.len(), "resuming today's session");
    }
    let session = Session::restore(class, today, &earlier);

    let sink = PersistenceSink::spawn(gateway, config.retry_policy())?;
    let settings = ControllerSettings {
        threshold: config.match_threshold,
        window: config.window()?,
    };
    let mut controller = AttendanceController::new(
        roster,
        NearestMatcher::<Euclidean>::default(),
        sink.handle(),
        settings,
    )
    .with_session(session);
    controller.publish_roster();

    tracing::info!(
        class,
        students = controller.roster().len(),
        window = %settings.window,
        threshold = settings.threshold,
        "attendance capture started"
    );

    let stop = CancellationToken::new();
    let loop_stop = stop.clone();
    let (done_tx, mut done_rx) = oneshot::channel();

    // The frame source may block indefinitely (stdin), so it gets its own OS
    // thread rather than a runtime blocking task that shutdown would wait on.
    std::thread::Builder::new()
        .name("rollcall-capture".into())
        .spawn(move || {
            let stats = controller.run(&mut source, &loop_stop);
            drop(source);
            let _ = done_tx.send((stats, controller.summary()));
        })
        .context("failed to spawn capture thread")?;

    let finished = tokio::select! {
        res = &mut done_rx => res.ok(),
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("stop signal received");
            stop.cancel();
            match tokio::time::timeout(STOP_GRACE, &mut done_rx).await {
                Ok(res) => res.ok(),
                Err(_) => {
                    tracing::warn!("frame source still blocked; abandoning capture thread");
                    None
                }
            }
        }
    };

    let (_, sink_stats) = tokio::task::spawn_blocking(move || sink.close())
        .await
        .context("persistence worker join")??;
    tracing::info!(
        written = sink_stats.written,
        retries = sink_stats.retries,
        failed = sink_stats.failed,
        "persistence drained"
    );

    let Some((stats, summary)) = finished else {
        bail!("capture loop did not shut down cleanly");
    };
    tracing::info!(
        frames = stats.frames,
        dropped = stats.dropped,
        outside_window = stats.outside_window,
        faces = stats.faces,
        unknown = stats.unknown_faces,
        events = stats.events,
        "capture finished"
    );

    match summary {
        Some(summary) => println!("{}", serde_json::to_string_pretty(&summary)?),
        None => println!("No frames inside the attendance window; nothing recorded"),
    }
    Ok(())
}
