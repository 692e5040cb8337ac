//! # deckwright
//!
//! CLI over the composition engine: compose a demo deck into SQLite and
//! inspect stored documents.

#![deny(unsafe_code)]

mod cli;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use deckwright_core::{CompositionEvent, Document, DocumentId, GenerationError, Section};
use deckwright_engine::{Orchestrator, ScriptedGenerator, SectionScript};
use deckwright_settings::{DeckwrightSettings, StoreSettings};
use deckwright_store::{
    DocumentBackend, InMemoryBackend, PersistenceStore, RetryPolicy, SqliteBackend, StoreConfig,
};
use deckwright_telemetry::{init_telemetry, TelemetryConfig};
use futures::StreamExt;
use serde_json::json;
use tracing::{info, warn};

use crate::cli::{Cli, Command, ComposeArgs, ListArgs, ShowArgs, StorageArgs};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = match &cli.settings {
        Some(path) => deckwright_settings::load_settings_from_path(path),
        None => deckwright_settings::load_settings(),
    }
    .context("failed to load settings")?;

    let logging = &settings.logging;
    let _telemetry = init_telemetry(&TelemetryConfig::from_levels(
        &logging.level,
        logging
            .modules
            .iter()
            .map(|(module, level)| (module.as_str(), level.as_str())),
        logging.json,
    ));

    match cli.command {
        Command::Compose(args) => compose(&settings, args).await,
        Command::Show(args) => show(&settings, args).await,
        Command::List(args) => list(&settings, &args),
    }
}

fn db_path(settings: &DeckwrightSettings, storage: &StorageArgs) -> PathBuf {
    storage
        .db
        .clone()
        .or_else(|| settings.store.db_path.as_ref().map(PathBuf::from))
        .unwrap_or_else(deckwright_settings::default_db_path)
}

fn open_backend(path: &Path) -> Result<Arc<SqliteBackend>> {
    let backend = SqliteBackend::open(path)
        .with_context(|| format!("failed to open database: {}", path.display()))?;
    Ok(Arc::new(backend))
}

fn store_config(settings: &StoreSettings) -> StoreConfig {
    StoreConfig {
        throttle_interval: Duration::from_millis(settings.throttle_interval_ms),
        retry: RetryPolicy {
            attempts: settings.fetch_attempts,
            base_delay: Duration::from_millis(settings.retry_base_delay_ms),
            max_delay: Duration::from_millis(settings.retry_max_delay_ms),
        },
        worker_pool_size: settings.worker_pool_size,
        verify_writes: settings.verify_writes,
    }
}

fn outline_deck(title: &str, sections: usize) -> Document {
    let sections = (0..sections)
        .map(|i| {
            Section::outlined(
                i,
                format!("Slide {}", i + 1),
                json!({"bullets": 3, "position": i}),
            )
        })
        .collect();
    Document::new(title, sections)
}

async fn compose(settings: &DeckwrightSettings, args: ComposeArgs) -> Result<()> {
    if args.sections == 0 {
        bail!("--sections must be at least 1");
    }

    let path = db_path(settings, &args.storage);
    let backend: Arc<dyn DocumentBackend> = if args.memory {
        Arc::new(InMemoryBackend::new())
    } else {
        open_backend(&path)?
    };
    let store = PersistenceStore::new(backend, store_config(&settings.store));

    let mut generator = ScriptedGenerator::new(SectionScript::with_progress(
        Duration::from_millis(args.section_ms),
        args.progress_steps,
    ));
    for index in &args.fail {
        generator = generator.with_script(
            *index,
            SectionScript::fail_after(
                Duration::from_millis(args.section_ms / 2),
                GenerationError::fatal(format!("section {index} scripted to fail")),
            ),
        );
    }

    let orchestrator = Orchestrator::new(store, Arc::new(generator))
        .with_progress_model(settings.progress.to_model());

    let mut options = settings.composition.to_options();
    if let Some(parallel) = args.parallel {
        options.max_parallel_sections = parallel;
    }

    let document = outline_deck(&args.title, args.sections);
    info!(
        document_id = %document.id,
        backend = orchestrator.store().backend_name(),
        sections = args.sections,
        max_parallel = options.max_parallel_sections,
        "composing"
    );

    let mut stream = orchestrator.generate(document, options)?;
    let mut interrupted = false;
    loop {
        let event = tokio::select! {
            event = stream.next() => event,
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                warn!("interrupt received, cancelling composition");
                interrupted = true;
                stream.cancel();
                continue;
            }
        };
        let Some(event) = event else { break };
        println!("{}", serde_json::to_string(&event)?);

        if let CompositionEvent::CompositionComplete {
            document_id,
            completed_count,
            failed_count,
            ..
        } = &event
        {
            info!(
                document_id = %document_id,
                completed = completed_count,
                failed = failed_count,
                "composition complete"
            );
        }
    }

    Ok(())
}

async fn show(settings: &DeckwrightSettings, args: ShowArgs) -> Result<()> {
    let id: DocumentId = args.id.parse()?;
    let path = db_path(settings, &args.storage);
    let store = PersistenceStore::new(open_backend(&path)?, store_config(&settings.store));

    match store.get(&id, true).await? {
        Some(document) => {
            println!("{}", serde_json::to_string_pretty(&document)?);
            Ok(())
        }
        None => bail!("document not found: {id}"),
    }
}

fn list(settings: &DeckwrightSettings, args: &ListArgs) -> Result<()> {
    let path = db_path(settings, &args.storage);
    let backend = open_backend(&path)?;
    for summary in backend.list(args.limit)? {
        println!("{}", serde_json::to_string(&summary)?);
    }
    Ok(())
}
