//! certtrack-progress command-line entry point
//!
//! Every command prints its result as JSON on stdout; logs go to stderr.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use certtrack_common::config::ConfigResolver;
use certtrack_common::events::EventBus;
use certtrack_progress::model::LessonPointer;
use certtrack_progress::reconcile::parse_feed;
use certtrack_progress::store::ProgressFilter;
use certtrack_progress::writer::CompletionRequest;
use certtrack_progress::ProgressEngine;

/// Command-line arguments for certtrack-progress
#[derive(Parser, Debug)]
#[command(name = "certtrack-progress")]
#[command(about = "Certification progress engine")]
#[command(version)]
struct Args {
    /// Config file (overrides the default search locations)
    #[arg(short, long, env = "CERTTRACK_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database path
    #[arg(short, long, env = "CERTTRACK_DATABASE")]
    database: Option<PathBuf>,

    /// Curriculum definition (TOML)
    #[arg(long, env = "CERTTRACK_CURRICULUM")]
    curriculum: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the database and tables
    InitDb,

    /// Start a certification for a learner
    Enroll {
        #[arg(long)]
        user: String,
        #[arg(long)]
        certification: String,
        /// Starting module (requires --lesson)
        #[arg(long, requires = "lesson")]
        module: Option<String>,
        #[arg(long, requires = "module")]
        lesson: Option<String>,
    },

    /// Withdraw a learner from a certification
    Disenroll {
        #[arg(long)]
        user: String,
        #[arg(long)]
        certification: String,
    },

    /// Record a completed lesson
    CompleteLesson {
        #[arg(long)]
        progress: Uuid,
        #[arg(long)]
        module: String,
        #[arg(long)]
        lesson: String,
        #[arg(long)]
        dashed_name: String,
        /// Storage timeout for this write
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Remove the most recently completed lesson of a module
    UndoLesson {
        #[arg(long)]
        progress: Uuid,
        #[arg(long)]
        module: String,
    },

    /// Finalize a certification progress record
    CompleteCertification {
        #[arg(long)]
        progress: Uuid,
    },

    /// Print a progress record with its percentages
    Show {
        #[arg(long)]
        progress: Uuid,
    },

    /// Compare local progress with an external completion feed
    Reconcile {
        /// JSON feed file
        #[arg(long)]
        feed: PathBuf,
        /// Only reconcile this learner
        #[arg(long)]
        user: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = ConfigResolver::new()
        .with_config_file(args.config.clone())
        .with_database(args.database.clone())
        .with_curriculum(args.curriculum.clone())
        .resolve()
        .context("Failed to resolve configuration")?;

    let default_filter = format!(
        "certtrack_progress={level},certtrack_common={level}",
        level = config.log_level
    );
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!("Database: {}", config.database_path.display());

    if let Command::InitDb = args.command {
        certtrack_common::db::init_database(&config.database_path)
            .await
            .context("Failed to initialize database")?;
        info!("Database initialized");
        return Ok(());
    }

    let bus = Arc::new(EventBus::new(config.event_bus_capacity));
    let listener = spawn_event_logger(&bus);

    let engine = ProgressEngine::from_config(&config, bus.clone())
        .await
        .context("Failed to initialize progress engine")?;

    let result = run_command(&engine, args.command).await;

    // Closing the bus lets the logger drain and exit
    drop(engine);
    drop(bus);
    if let Err(e) = listener.await {
        warn!("Event logger task failed: {}", e);
    }

    result
}

async fn run_command(engine: &ProgressEngine, command: Command) -> Result<()> {
    match command {
        Command::InitDb => Ok(()),
        Command::Enroll {
            user,
            certification,
            module,
            lesson,
        } => {
            let start = match (module, lesson) {
                (Some(module), Some(lesson)) => Some(LessonPointer::new(&module, &lesson)),
                _ => None,
            };
            let view = engine
                .enrollments
                .start_certification(&user, &certification, start)
                .await
                .context("Failed to start certification")?;
            print_json(&view)
        }
        Command::Disenroll { user, certification } => {
            let enrollment = engine
                .enrollments
                .disenroll(&user, &certification)
                .await
                .context("Failed to disenroll")?;
            print_json(&enrollment)
        }
        Command::CompleteLesson {
            progress,
            module,
            lesson,
            dashed_name,
            timeout_ms,
        } => {
            let mut request = CompletionRequest::new(progress, &module, &lesson, &dashed_name);
            if let Some(ms) = timeout_ms {
                request = request.with_timeout(certtrack_common::time::millis_to_duration(ms));
            }
            let view = engine
                .writer
                .record_completion(request)
                .await
                .context("Failed to record lesson completion")?;
            print_json(&view)
        }
        Command::UndoLesson { progress, module } => {
            let view = engine
                .writer
                .undo_last_lesson(progress, &module)
                .await
                .context("Failed to undo lesson")?;
            print_json(&view)
        }
        Command::CompleteCertification { progress } => {
            let completion = engine
                .gate
                .complete_certification(progress)
                .await
                .context("Failed to complete certification")?;
            print_json(&completion)
        }
        Command::Show { progress } => {
            let progress = engine
                .store
                .get_progress(progress)
                .await
                .context("Failed to load progress")?;
            print_json(&certtrack_progress::aggregate::decorate(progress))
        }
        Command::Reconcile { feed, user } => {
            let content = std::fs::read_to_string(&feed)
                .with_context(|| format!("Failed to read feed {}", feed.display()))?;
            let records = parse_feed(&content).context("Failed to parse feed")?;

            let filter = ProgressFilter {
                user_id: user,
                certification_key: None,
            };

            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            let signal_task = tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Received Ctrl+C, stopping after the current user");
                    on_signal.cancel();
                }
            });

            let report = engine
                .reconciler
                .run(&records, &filter, &cancel)
                .await
                .context("Reconciliation failed")?;
            signal_task.abort();

            print_json(&report)
        }
    }
}

fn spawn_event_logger(bus: &EventBus) -> tokio::task::JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => info!(
                    event_id = %event.id,
                    kind = ?event.kind,
                    user_id = %event.graduate.user_id,
                    skills = event.skills.len(),
                    "Completion event"
                ),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event logger lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{}", json);
    Ok(())
}
