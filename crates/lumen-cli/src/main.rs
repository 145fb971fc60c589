//! lumen: operator command line for the photo library.
//!
//! Queues enrichment work, drives the processing scheduler, runs searches
//! and applies manual person corrections against the PostgreSQL library
//! named by `DATABASE_URL`.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lumen_core::defaults;
use lumen_core::{
    Capabilities, EmbeddingBackend, LibraryConfig, QueueStats, ResolverConfig, SchedulerConfig,
    SearchConfig, SearchCriteria, TaggerConfig, TaskType,
};
use lumen_db::{Database, PoolConfig, PoolHealth};
use lumen_inference::{AutoTagger, VisionBackend};
use lumen_jobs::{
    Enricher, FaceIdentityResolver, ProcessingEvent, ProcessingScheduler, ThumbnailGenerator,
};
use lumen_search::{HybridSearch, HybridSearchEngine, SearchRequest};

#[derive(Parser)]
#[command(name = "lumen")]
#[command(author, version, about = "Photo library processing and search")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending database migrations
    Migrate,

    /// Queue one photo for processing
    Enqueue {
        photo_id: i64,

        /// full, thumbnails, embeddings, faces or tags
        #[arg(short, long, default_value = "full")]
        task: TaskType,

        #[arg(short, long, default_value_t = defaults::QUEUE_PRIORITY)]
        priority: i32,
    },

    /// Queue a full pass for every unprocessed photo
    QueueAll,

    /// Queue face detection for every image whose faces were never processed
    QueueFaces,

    /// Drop a photo's pending work, reset it and queue a fresh full pass
    Requeue {
        photo_id: i64,

        #[arg(short, long, default_value_t = defaults::QUEUE_PRIORITY)]
        priority: i32,
    },

    /// Process one batch of pending items by task type
    RunBatch {
        /// Items to take (default: PROCESSING_BATCH_SIZE)
        #[arg(short, long)]
        size: Option<usize>,
    },

    /// Drain the queue with the full enrichment sequence. Ctrl-C stops after
    /// the current item.
    Run {
        /// Stop after this many items
        #[arg(short, long)]
        max_items: Option<usize>,

        /// Seconds between progress snapshots
        #[arg(long, default_value_t = 5)]
        progress_interval: u64,
    },

    /// Regenerate every video: clear thumbnails and queue a priority full pass
    RequeueVideos,

    /// Show queue counts per status and pool occupancy
    Stats,

    /// Show photo, video, people, pet and tag counts
    LibraryStats,

    /// Search photos by text, filters or both
    Search(SearchArgs),

    /// Autocomplete people, pets, tags and cities
    Suggest {
        partial: String,

        #[arg(short, long, default_value_t = defaults::SUGGESTION_LIMIT)]
        limit: i64,
    },

    /// Move every face of SOURCE onto TARGET and delete SOURCE
    MergePeople { target: i64, source: i64 },

    /// Delete a person, leaving its faces unassigned
    DeletePerson { person_id: i64 },

    /// Give a person a display name
    NamePerson { person_id: i64, name: String },
}

#[derive(Args)]
struct SearchArgs {
    /// Natural-language query
    #[arg(short, long)]
    text: Option<String>,

    /// Person id (repeatable, any-of)
    #[arg(long = "person")]
    person_ids: Vec<i64>,

    /// Pet id (repeatable, any-of)
    #[arg(long = "pet")]
    pet_ids: Vec<i64>,

    /// Tag name (repeatable, any-of)
    #[arg(long = "tag")]
    tag_names: Vec<String>,

    /// Substring of location name, city or country
    #[arg(long)]
    location: Option<String>,

    #[arg(long)]
    country: Option<String>,

    #[arg(long)]
    city: Option<String>,

    /// RFC 3339 lower bound on capture date
    #[arg(long)]
    from: Option<DateTime<Utc>>,

    /// RFC 3339 upper bound on capture date
    #[arg(long)]
    to: Option<DateTime<Utc>>,

    /// Only videos (true) or only images (false)
    #[arg(long)]
    video: Option<bool>,

    #[arg(short, long, default_value_t = defaults::PAGE_LIMIT)]
    limit: i64,

    #[arg(short, long, default_value_t = defaults::PAGE_OFFSET)]
    offset: i64,
}

impl SearchArgs {
    fn into_request(self) -> SearchRequest {
        let criteria = SearchCriteria {
            person_ids: self.person_ids,
            pet_ids: self.pet_ids,
            tag_names: self.tag_names,
            location: self.location,
            country: self.country,
            city: self.city,
            date_from: self.from,
            date_to: self.to,
            is_video: self.video,
        };
        SearchRequest {
            text: self.text,
            criteria,
            limit: Some(self.limit),
            offset: Some(self.offset),
        }
    }
}

/// Scheduler and search engine wired to one database.
struct App {
    db: Database,
    scheduler: ProcessingScheduler,
    search: HybridSearchEngine,
}

impl App {
    async fn connect() -> anyhow::Result<Self> {
        let config = LibraryConfig::from_env();
        let url = config
            .database_url
            .clone()
            .context("DATABASE_URL must be set")?;
        let db = Database::connect_with_config(&url, PoolConfig::from_env())
            .await
            .context("failed to connect to the library database")?;
        let library = db.library();

        let vision = Arc::new(VisionBackend::from_env());
        let embedder: Arc<dyn EmbeddingBackend> = vision.clone();
        let capabilities = Capabilities {
            embedder: embedder.clone(),
            face_detector: vision.clone(),
            tagger: Arc::new(AutoTagger::new(embedder.clone())),
        };

        let resolver = FaceIdentityResolver::new(library.clone(), ResolverConfig::from_env());
        let enricher = Enricher::new(
            library.clone(),
            capabilities,
            ThumbnailGenerator::from_config(&config),
            resolver,
            TaggerConfig::from_env(),
        );
        let scheduler = ProcessingScheduler::new(library.clone(), enricher, SchedulerConfig::from_env());
        let search = HybridSearchEngine::new(library, embedder, SearchConfig::from_env());

        info!(
            vision_url = %vision.config().base_url,
            thumbnail_path = %config.thumbnail_path.display(),
            "Library opened"
        );
        Ok(Self {
            db,
            scheduler,
            search,
        })
    }

    fn resolver(&self) -> &FaceIdentityResolver {
        self.scheduler.enricher().resolver()
    }
}

#[derive(Serialize)]
struct StatsReport {
    queue: QueueStats,
    pool: PoolHealth,
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Initialize tracing with configurable output.
///
/// Environment variables:
///   LOG_FORMAT  - "json" or "text" (default: "text")
///   LOG_FILE    - path to log file (optional, enables daily-rotated file logging)
///   LOG_ANSI    - "true"/"false" override ANSI colors (auto-detected by default)
///   RUST_LOG    - standard env filter (default: "lumen=info")
///
/// The returned guard must live until exit so buffered file output is flushed.
fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "lumen=info".into());
    let registry = tracing_subscriber::registry().with(env_filter);

    let guard = if let Some(ref path) = log_file {
        let path = Path::new(path);
        let file_dir = path.parent().unwrap_or(Path::new("."));
        let file_name = path
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("lumen.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(log_ansi.unwrap_or(false));
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        // Logs go to stderr so command output on stdout stays parseable.
        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(std::io::stderr),
                )
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    };

    debug!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stderr)"),
        "Logging initialized"
    );
    guard
}

/// Start a continuous run and report on it until it ends.
async fn run_continuous(
    scheduler: &ProcessingScheduler,
    max_items: Option<usize>,
    progress_interval: Duration,
) -> anyhow::Result<()> {
    let mut events = scheduler.events();
    let Some(mut handle) = scheduler.start_continuous(max_items) else {
        warn!("A continuous run is already active");
        return Ok(());
    };

    let mut ticker = tokio::time::interval(progress_interval);
    ticker.tick().await;
    let mut stopping = false;

    let processed = loop {
        tokio::select! {
            joined = &mut handle => break joined.context("continuous run aborted")??,
            _ = tokio::signal::ctrl_c(), if !stopping => {
                stopping = true;
                scheduler.request_stop();
                info!("Stop requested, finishing the current item");
            }
            _ = ticker.tick() => print_json(&scheduler.progress())?,
            event = events.recv() => match event {
                Ok(ProcessingEvent::ItemFailed { queue_item_id, photo_id, error }) => {
                    warn!(queue_item_id, photo_id, error = %error, "Item failed");
                }
                Ok(event) => debug!(?event, "Processing event"),
                Err(RecvError::Lagged(skipped)) => debug!(skipped, "Processing events lagged"),
                Err(RecvError::Closed) => {}
            },
        }
    };

    info!(processed, "Continuous run finished");
    print_json(&scheduler.progress())
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let app = App::connect().await?;

    match cli.command {
        Commands::Migrate => {
            app.db.migrate().await.context("migration failed")?;
            info!("Migrations applied");
        }
        Commands::Enqueue {
            photo_id,
            task,
            priority,
        } => {
            let item_id = app.scheduler.enqueue(photo_id, task, priority).await?;
            println!("{}", item_id);
        }
        Commands::QueueAll => {
            let queued = app.scheduler.queue_all_unprocessed().await?;
            println!("{}", queued);
        }
        Commands::QueueFaces => {
            let queued = app.scheduler.queue_faces_unprocessed().await?;
            println!("{}", queued);
        }
        Commands::Requeue { photo_id, priority } => {
            let item_id = app.scheduler.requeue_photo(photo_id, priority).await?;
            println!("{}", item_id);
        }
        Commands::RunBatch { size } => {
            let completed = match size {
                Some(size) => app.scheduler.run_batch(size).await?,
                None => app.scheduler.run_default_batch().await?,
            };
            app.db.pool_health().log();
            println!("{}", completed);
        }
        Commands::Run {
            max_items,
            progress_interval,
        } => {
            let interval = Duration::from_secs(progress_interval.max(1));
            run_continuous(&app.scheduler, max_items, interval).await?;
            app.db.pool_health().log();
        }
        Commands::RequeueVideos => {
            let queued = app.scheduler.requeue_videos().await?;
            println!("{}", queued);
        }
        Commands::Stats => {
            let report = StatsReport {
                queue: app.scheduler.queue_stats().await?,
                pool: app.db.pool_health(),
            };
            report.pool.log();
            print_json(&report)?;
        }
        Commands::LibraryStats => print_json(&app.scheduler.library_stats().await?)?,
        Commands::Search(args) => {
            let photos = args.into_request().execute(&app.search).await?;
            print_json(&photos)?;
        }
        Commands::Suggest { partial, limit } => {
            print_json(&app.search.suggestions(&partial, limit).await?)?;
        }
        Commands::MergePeople { target, source } => {
            print_json(&app.resolver().merge_persons(target, source).await?)?;
        }
        Commands::DeletePerson { person_id } => {
            app.resolver().delete_person(person_id).await?;
        }
        Commands::NamePerson { person_id, name } => {
            print_json(&app.resolver().rename_person(person_id, &name).await?)?;
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let _log_guard = init_tracing();

    run(Cli::parse()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_enqueue_parses_task_type() {
        let cli = Cli::parse_from(["lumen", "enqueue", "42", "--task", "faces", "-p", "3"]);
        match cli.command {
            Commands::Enqueue {
                photo_id,
                task,
                priority,
            } => {
                assert_eq!(photo_id, 42);
                assert_eq!(task, TaskType::Faces);
                assert_eq!(priority, 3);
            }
            _ => panic!("expected enqueue"),
        }
        assert!(Cli::try_parse_from(["lumen", "enqueue", "1", "--task", "bogus"]).is_err());
    }

    #[test]
    fn test_search_args_build_combined_request() {
        let cli = Cli::parse_from([
            "lumen", "search", "--text", "beach", "--person", "7", "--person", "9", "--city",
            "Lisbon", "--limit", "5",
        ]);
        let Commands::Search(args) = cli.command else {
            panic!("expected search");
        };
        let request = args.into_request();
        assert_eq!(request.text.as_deref(), Some("beach"));
        assert_eq!(request.criteria.person_ids, vec![7, 9]);
        assert_eq!(request.criteria.city.as_deref(), Some("Lisbon"));
        assert_eq!(request.limit, Some(5));
        assert_eq!(request.offset, Some(defaults::PAGE_OFFSET));
    }

    #[test]
    fn test_maintenance_commands_parse() {
        assert!(matches!(
            Cli::parse_from(["lumen", "requeue-videos"]).command,
            Commands::RequeueVideos
        ));
        assert!(matches!(
            Cli::parse_from(["lumen", "library-stats"]).command,
            Commands::LibraryStats
        ));
        assert!(Cli::try_parse_from(["lumen", "requeue-videos", "7"]).is_err());
    }

    #[test]
    fn test_search_without_text_is_filter_only() {
        let cli = Cli::parse_from(["lumen", "search", "--video", "true"]);
        let Commands::Search(args) = cli.command else {
            panic!("expected search");
        };
        let request = args.into_request();
        assert!(request.text.is_none());
        assert_eq!(request.criteria.is_video, Some(true));
    }
}
