use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use trove::backup::BackupPropagator;
use trove::config::TroveConfig;
use trove::domains::DomainRegistry;
use trove::ingest::{IngestReply, Pipeline};
use trove::oracle::http::{HttpEmbeddingOracle, HttpGenerationOracle};
use trove::recall::RecallEngine;
use trove::router::IntentRouter;
use trove::store::archive::FsArchiveStore;
use trove::store::index::SqliteVectorIndex;
use trove::store::sqlite::SqliteRecordStore;
use trove::store::{ArchiveStore, RecordStore, VectorIndex};
use trove::synth::Synthesizer;
use trove::types::MediaType;

#[derive(Parser)]
#[command(name = "trove", version, about = "Personal knowledge-capture pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Classify and route a raw thought (save, answer, or reading log)
    Ingest {
        text: String,
        /// Domain to file saves under (defaults to the configured domain)
        #[arg(long)]
        domain: Option<String>,
        /// Media type of the input
        #[arg(long, default_value = "text")]
        media: MediaType,
    },
    /// Capture a thought directly into a domain
    Save {
        text: String,
        #[arg(long)]
        domain: Option<String>,
        #[arg(long, default_value = "text")]
        media: MediaType,
    },
    /// Ask a question across everything saved
    Query { question: String },
    /// Re-synthesize a dashboard from recent history without new input
    Refresh { domain: String },
    /// Record reading progress and update the reading list
    LogReading { text: String },
    /// Drain the change feed into the archive
    Backup,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = TroveConfig::load()?;

    // Log to stderr so stdout stays clean for command output.
    let filter = EnvFilter::try_new(&config.pipeline.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let store: Arc<dyn RecordStore> =
        Arc::new(SqliteRecordStore::open(&config.resolved_records_path())?);
    let owner = config.pipeline.owner_id.clone();

    match cli.command {
        Command::Ingest { text, domain, media } => {
            let pipeline = build_pipeline(&config, store)?;
            let domain = domain.unwrap_or_else(|| config.pipeline.default_domain.clone());
            let reply = pipeline.ingest(&owner, &text, &domain, media).await?;
            print_reply(&reply);
        }
        Command::Save { text, domain, media } => {
            let pipeline = build_pipeline(&config, store)?;
            let reply = pipeline.save(&owner, &text, domain.as_deref(), media).await?;
            print_reply(&reply);
        }
        Command::Query { question } => {
            let pipeline = build_pipeline(&config, store)?;
            let answer = pipeline.query(&owner, &question).await?;
            println!("{}", answer.answer);
            for id in &answer.sources {
                eprintln!("  source: {id}");
            }
        }
        Command::Refresh { domain } => {
            let pipeline = build_pipeline(&config, store)?;
            pipeline.refresh(&owner, &domain).await?;
            println!("refreshed {domain}");
        }
        Command::LogReading { text } => {
            let pipeline = build_pipeline(&config, store)?;
            let outcome = pipeline.log_reading(&owner, &text).await?;
            println!("logged {}", outcome.entry_id);
        }
        Command::Backup => {
            if !config.backup.enabled {
                eprintln!("backup is disabled in config");
                return Ok(());
            }
            let archive: Arc<dyn ArchiveStore> =
                Arc::new(FsArchiveStore::new(config.resolved_archive_dir())?);
            let propagator =
                BackupPropagator::new(store, archive, config.backup.batch_size);
            let report = propagator.run_to_end().await?;
            println!(
                "archived {} of {} (skipped {}, failed {}), cursor {}",
                report.archived, report.scanned, report.skipped, report.failed, report.cursor
            );
        }
    }

    Ok(())
}

fn build_pipeline(config: &TroveConfig, store: Arc<dyn RecordStore>) -> Result<Pipeline> {
    let generation = Arc::new(HttpGenerationOracle::new(&config.oracle)?);
    let embedder = Arc::new(HttpEmbeddingOracle::new(&config.oracle)?);
    let index: Arc<dyn VectorIndex> =
        Arc::new(SqliteVectorIndex::open(&config.resolved_index_path())?);

    let recall = RecallEngine::new(index.clone(), store.clone(), config.recall.clone());

    Ok(Pipeline::new(
        IntentRouter::new(generation.clone()),
        embedder,
        store,
        index,
        recall,
        Synthesizer::new(generation),
        DomainRegistry::default(),
        config.pipeline.clone(),
    ))
}

fn print_reply(reply: &IngestReply) {
    match reply {
        IngestReply::Saved(outcome) => {
            println!("saved {}", outcome.entry_id);
            if !outcome.indexed {
                eprintln!("warning: entry saved but not yet searchable");
            }
        }
        IngestReply::Answered(answer) => {
            println!("{}", answer.answer);
            for id in &answer.sources {
                eprintln!("  source: {id}");
            }
        }
    }
}
