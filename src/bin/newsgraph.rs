//! newsgraph CLI: feed articles to the tracker and inspect what it learned.
//!
//! Usage:
//!   newsgraph process <article.json> [--db path] [--config path]
//!   newsgraph entity <id>
//!   newsgraph trends [--as-of RFC3339] [--days N]
//!   newsgraph runs <article-id>

use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand};
use newsgraph::{ArticleDocument, ArticleId, EntityId, EntityTracker, RunStatus, TrackerConfig};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "newsgraph", version, about = "Entity resolution and tracking for news articles")]
struct Cli {
    /// Path to SQLite database file
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Path to a YAML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level regardless of configuration
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process one article document and print the final run
    Process {
        /// JSON file holding `{ "article": {...}, "entities": [...] }`
        file: PathBuf,
    },
    /// Show a canonical entity and its strongest relationships
    Entity {
        id: i64,
    },
    /// Detect trending entities
    Trends {
        /// End of the window (exclusive); defaults to now
        #[arg(long)]
        as_of: Option<DateTime<Utc>>,
        /// Window length in days
        #[arg(long, default_value_t = 14)]
        days: i64,
    },
    /// List the runs recorded for an article
    Runs {
        article_id: String,
    },
}

/// Get the default database path (~/.local/share/newsgraph/newsgraph.db)
fn default_db_path() -> PathBuf {
    let data_dir = dirs::data_dir().unwrap_or_else(|| dirs::home_dir().unwrap_or_default().join(".local/share"));
    let dir = data_dir.join("newsgraph");
    std::fs::create_dir_all(&dir).ok();
    dir.join("newsgraph.db")
}

fn load_config(path: Option<&PathBuf>) -> Result<TrackerConfig, String> {
    match path {
        Some(path) => TrackerConfig::from_file(path).map_err(|e| e.to_string()),
        None => Ok(TrackerConfig::default()),
    }
}

fn init_logging(config: &TrackerConfig, verbose: bool) -> Result<(), String> {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        config.logging.tracing_level().map_err(|e| e.to_string())?
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> i32 {
    match serde_json::to_string_pretty(value) {
        Ok(json) => {
            println!("{}", json);
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn cmd_process(tracker: &EntityTracker, file: &PathBuf) -> i32 {
    let doc = match ArticleDocument::from_file(file) {
        Ok(doc) => doc,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    let state = tracker.process_article(&doc.article, &doc.entities);
    let code = print_json(&state);
    if state.status == RunStatus::Completed {
        code
    } else {
        2
    }
}

fn cmd_entity(tracker: &EntityTracker, id: i64) -> i32 {
    let id = EntityId::from_raw(id);
    let entity = match tracker.get_canonical_entity(id) {
        Ok(Some(entity)) => entity,
        Ok(None) => {
            eprintln!("Error: entity {} not found", id);
            return 1;
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };

    println!("{} [{}] {}", entity.id, entity.entity_type, entity.canonical_name);
    println!("  seen:    {} .. {}", entity.first_seen, entity.last_seen);
    println!(
        "  aliases: {}",
        entity.aliases.iter().cloned().collect::<Vec<_>>().join(", ")
    );

    let relationships = match tracker.relationships_for(id) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    if relationships.is_empty() {
        println!("No relationships.");
        return 0;
    }
    println!();
    println!("{:>8}  {:<40}  {:>6}", "ID", "RELATED", "COUNT");
    println!("{}", "-".repeat(58));
    for rel in relationships {
        let Some(other) = rel.pair.other(id) else {
            continue;
        };
        let name = match tracker.get_canonical_entity(other) {
            Ok(Some(e)) => e.canonical_name,
            _ => "?".to_string(),
        };
        println!("{:>8}  {:<40}  {:>6}", other.value(), name, rel.count);
    }
    0
}

/// A window of `days` days, if that is a positive, representable duration
fn window_days(days: i64) -> Option<Duration> {
    Duration::try_days(days).filter(|d| *d > Duration::zero())
}

fn cmd_trends(tracker: &EntityTracker, as_of: Option<DateTime<Utc>>, days: i64) -> i32 {
    let as_of = as_of.unwrap_or_else(Utc::now);
    let Some(window) = window_days(days) else {
        eprintln!("Error: --days must be a positive number of days, got {}", days);
        return 2;
    };
    let results = match tracker.compute_trends(as_of, window) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    if results.is_empty() {
        println!("No trending entities.");
        return 0;
    }
    println!("{:>8}  {:<40}  {:>6}  {:>8}", "ID", "ENTITY", "LAST", "SCORE");
    println!("{}", "-".repeat(68));
    for result in results {
        let (Some(id), Some(payload)) = (result.entity_id, result.trend_payload()) else {
            continue;
        };
        let name = match tracker.get_canonical_entity(id) {
            Ok(Some(e)) => e.canonical_name,
            _ => "?".to_string(),
        };
        let last = payload.counts.last().copied().unwrap_or(0);
        println!("{:>8}  {:<40}  {:>6}  {:>8.2}", id.value(), name, last, payload.score);
    }
    0
}

fn cmd_runs(tracker: &EntityTracker, article_id: &str) -> i32 {
    match tracker.runs_for_article(&ArticleId::new(article_id)) {
        Ok(runs) if runs.is_empty() => {
            println!("No runs for article '{}'.", article_id);
            0
        }
        Ok(runs) => {
            println!("{:<36}  {:<12}  {:>8}  {}", "RUN", "STATUS", "MENTIONS", "UPDATED");
            println!("{}", "-".repeat(90));
            for run in runs {
                println!(
                    "{:<36}  {:<12}  {:>8}  {}",
                    run.run_id.to_string(),
                    run.status.as_str(),
                    run.mentions.len(),
                    run.updated_at
                );
                if let Some(err) = &run.error {
                    println!("    {:?} at {}: {}", err.kind, err.step, err.message);
                }
            }
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_ref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = init_logging(&config, cli.verbose) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    let db_path = cli.db.unwrap_or_else(default_db_path);
    let tracker = match EntityTracker::open(&db_path, config) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("Error: failed to open database {}: {}", db_path.display(), e);
            std::process::exit(1);
        }
    };

    let code = match cli.command {
        Commands::Process { file } => cmd_process(&tracker, &file),
        Commands::Entity { id } => cmd_entity(&tracker, id),
        Commands::Trends { as_of, days } => cmd_trends(&tracker, as_of, days),
        Commands::Runs { article_id } => cmd_runs(&tracker, &article_id),
    };
    std::process::exit(code);
}
