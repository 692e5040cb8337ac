//! Orchestrator: bounded-concurrency composition of one document.
//!
//! One task per section, gated by a semaphore of size K. Every task reports
//! into a single mpsc channel that backs the caller's `CompositionStream`.
//! A section's content is written through the store before its
//! `SectionCompleted` event is sent.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use deckwright_core::{
    CompositionEvent, CompositionOptions, Document, DocumentId, DocumentPhase, DocumentStatus,
    FailureKind, GenerationError, GenerationEvent, ProgressModel, Section, SectionContext,
    SectionGenerator, SectionStatus,
};
use deckwright_store::PersistenceStore;
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::classify::{RetryClassifier, TypedClassifier};
use crate::error::EngineError;
use crate::stream::CompositionStream;
use crate::tracker::SectionTracker;

/// Upper bound on the pause between task creations.
const MAX_START_DELAY: Duration = Duration::from_secs(2);
const EVENT_BUFFER: usize = 256;

/// Composes documents section by section.
///
/// Cheap to clone; every composition it starts runs on its own driver task.
#[derive(Clone)]
pub struct Orchestrator {
    store: PersistenceStore,
    generator: Arc<dyn SectionGenerator>,
    classifier: Arc<dyn RetryClassifier>,
    progress: ProgressModel,
}

impl Orchestrator {
    pub fn new(store: PersistenceStore, generator: Arc<dyn SectionGenerator>) -> Self {
        Self {
            store,
            generator,
            classifier: Arc::new(TypedClassifier),
            progress: ProgressModel::default(),
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn RetryClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_progress_model(mut self, progress: ProgressModel) -> Self {
        self.progress = progress;
        self
    }

    pub fn store(&self) -> &PersistenceStore {
        &self.store
    }

    /// Current copy of a document as seen through the store.
    pub async fn snapshot(&self, id: &DocumentId) -> Result<Option<Document>, EngineError> {
        Ok(self.store.get(id, false).await?)
    }

    /// Start composing `document`. Must be called inside a Tokio runtime.
    pub fn generate(
        &self,
        document: Document,
        options: CompositionOptions,
    ) -> Result<CompositionStream, EngineError> {
        self.generate_with_cancel(document, options, CancellationToken::new())
    }

    /// Like `generate`, but cancelling `cancel` stops every in-flight section.
    pub fn generate_with_cancel(
        &self,
        document: Document,
        options: CompositionOptions,
        cancel: CancellationToken,
    ) -> Result<CompositionStream, EngineError> {
        validate(&document, &options)?;

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let token = cancel.child_token();
        let document_id = document.id.clone();

        let run = Arc::new(Composition {
            document_id: document_id.clone(),
            total: document.sections.len(),
            store: self.store.clone(),
            generator: Arc::clone(&self.generator),
            classifier: Arc::clone(&self.classifier),
            progress: self.progress,
            tracker: SectionTracker::new(document.sections.len()),
            options,
            events: tx,
            cancel: token.clone(),
        });

        let span = info_span!("composition", document_id = %document_id);
        drop(tokio::spawn(run.drive(document).instrument(span)));

        Ok(CompositionStream::new(document_id, rx, token))
    }
}

fn validate(document: &Document, options: &CompositionOptions) -> Result<(), EngineError> {
    if document.sections.is_empty() {
        return Err(EngineError::InvalidInput("document has no sections".into()));
    }
    if options.max_parallel_sections == 0 {
        return Err(EngineError::InvalidInput(
            "max_parallel_sections must be at least 1".into(),
        ));
    }
    if !document.indices_are_dense() {
        return Err(EngineError::InvalidInput(
            "section indices must be 0..n in order".into(),
        ));
    }
    Ok(())
}

enum Outcome {
    Completed(Value),
    Failed(GenerationError),
    TimedOut,
    Cancelled,
}

/// Shared state of one running composition.
struct Composition {
    document_id: DocumentId,
    total: usize,
    store: PersistenceStore,
    generator: Arc<dyn SectionGenerator>,
    classifier: Arc<dyn RetryClassifier>,
    progress: ProgressModel,
    tracker: SectionTracker,
    options: CompositionOptions,
    events: mpsc::Sender<CompositionEvent>,
    cancel: CancellationToken,
}

impl Composition {
    async fn emit(&self, event: CompositionEvent) {
        if self.events.send(event).await.is_err() {
            debug!("event receiver dropped");
        }
    }

    async fn drive(self: Arc<Self>, mut document: Document) {
        let id = self.document_id.clone();
        info!(
            sections = self.total,
            max_parallel = self.options.max_parallel_sections,
            generator = self.generator.name(),
            "composition started"
        );

        self.emit(CompositionEvent::composition_started(id.clone(), self.total))
            .await;

        self.store.begin_composition(&id).await;
        document.status = DocumentStatus {
            phase: DocumentPhase::Composing,
            progress: self.progress.compute(0, 0, self.total),
            ..DocumentStatus::default()
        };
        if !self.store.save(&id, document.clone()).await {
            warn!("initial document write failed");
        }

        let semaphore = Arc::new(Semaphore::new(self.options.max_parallel_sections));
        let start_delay = self.options.delay_between_task_starts.min(MAX_START_DELAY);
        let mut tasks = JoinSet::new();
        let mut task_sections = HashMap::new();

        for (n, section) in document.sections.iter().enumerate() {
            if n > 0 && !start_delay.is_zero() {
                tokio::select! {
                    biased;
                    () = self.cancel.cancelled() => {}
                    () = tokio::time::sleep(start_delay) => {}
                }
            }
            if self.cancel.is_cancelled() {
                debug!(remaining = self.total - n, "cancelled while spawning sections");
                break;
            }

            let context = SectionContext::for_section(&document, section);
            let span = info_span!("section", index = section.index);
            let handle = tasks.spawn(
                Arc::clone(&self)
                    .run_section(section.clone(), context, Arc::clone(&semaphore))
                    .instrument(span),
            );
            let _ = task_sections.insert(handle.id(), section.clone());
        }

        while let Some(joined) = tasks.join_next_with_id().await {
            let Err(e) = joined else { continue };
            let Some(section) = task_sections.get(&e.id()) else {
                error!(error = %e, "unknown section task failed");
                continue;
            };
            if e.is_panic() {
                error!(index = section.index, "section task panicked");
                self.panicked(section).await;
            } else {
                warn!(index = section.index, "section task aborted");
            }
        }

        self.finish(&id).await;
    }

    async fn run_section(
        self: Arc<Self>,
        section: Section,
        context: SectionContext,
        semaphore: Arc<Semaphore>,
    ) {
        let index = section.index;
        let _permit = tokio::select! {
            biased;
            () = self.cancel.cancelled() => {
                debug!("cancelled before a permit was acquired");
                return;
            }
            permit = semaphore.acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return,
            },
        };

        if !self.tracker.start(index) {
            return;
        }
        self.emit(CompositionEvent::section_started(index)).await;

        let timeout = self.options.per_section_timeout;
        let outcome = tokio::select! {
            biased;
            () = self.cancel.cancelled() => Outcome::Cancelled,
            result = tokio::time::timeout(timeout, self.generate_section(context)) => match result {
                Ok(Ok(payload)) => Outcome::Completed(payload),
                Ok(Err(error)) => Outcome::Failed(error),
                Err(_) => Outcome::TimedOut,
            },
        };

        match outcome {
            Outcome::Completed(payload) => self.complete(&section, payload).await,
            Outcome::Failed(error) => {
                let (kind, retryable) = match error {
                    GenerationError::Timeout(_) => (FailureKind::Timeout, false),
                    _ => (FailureKind::Generation, self.classifier.is_retryable(&error)),
                };
                warn!(error = %error, kind = error.error_kind(), retryable, "section generation failed");
                self.fail(&section, kind, error.to_string(), retryable).await;
            }
            Outcome::TimedOut => {
                warn!(timeout_ms = timeout.as_millis() as u64, "section timed out");
                let message = GenerationError::Timeout(timeout).to_string();
                self.fail(&section, FailureKind::Timeout, message, false).await;
            }
            Outcome::Cancelled => {
                debug!("section cancelled");
                self.fail(&section, FailureKind::Cancelled, "composition cancelled".into(), true)
                    .await;
            }
        }
    }

    /// Drive the generator to its terminal event, forwarding progress.
    async fn generate_section(&self, context: SectionContext) -> Result<Value, GenerationError> {
        let index = context.index;
        let mut stream = self.generator.generate(context).await?;
        while let Some(event) = stream.next().await {
            match event {
                GenerationEvent::Progress { payload } => {
                    self.emit(CompositionEvent::section_progress(index, payload)).await;
                }
                GenerationEvent::Completed { payload } => return Ok(payload),
                GenerationEvent::Failed { error } => return Err(error),
            }
        }
        Err(GenerationError::fatal(
            "generator stream ended without a terminal event",
        ))
    }

    async fn complete(&self, section: &Section, payload: Value) {
        let index = section.index;
        // Past this check the write always runs to completion.
        if self.cancel.is_cancelled() {
            self.fail(section, FailureKind::Cancelled, "composition cancelled".into(), true)
                .await;
            return;
        }

        let written = self
            .store
            .update_section(&self.document_id, index, section.completed_with(payload.clone()), true)
            .await;
        if !written {
            warn!("section content could not be persisted");
            self.fail(
                section,
                FailureKind::Persistence,
                "section content could not be persisted".into(),
                true,
            )
            .await;
            return;
        }

        let _ = self.tracker.finish(index, SectionStatus::Completed);
        self.persist_progress().await;
        debug!("section completed");
        self.emit(CompositionEvent::section_completed(index, payload)).await;
    }

    async fn fail(&self, section: &Section, kind: FailureKind, message: String, retryable: bool) {
        let index = section.index;
        if !self.tracker.finish(index, SectionStatus::Failed) {
            return;
        }

        if kind != FailureKind::Cancelled {
            let marked = section.failed_with(message.clone());
            if !self.store.update_section(&self.document_id, index, marked, true).await {
                debug!("failed status not persisted");
            }
            self.persist_progress().await;
        }

        self.emit(CompositionEvent::section_failed(index, kind, message, retryable))
            .await;
    }

    async fn panicked(&self, section: &Section) {
        match self.tracker.status(section.index) {
            Some(SectionStatus::Pending) => {
                let _ = self.tracker.start(section.index);
                self.emit(CompositionEvent::section_started(section.index)).await;
            }
            Some(SectionStatus::Generating) => {}
            _ => return,
        }
        self.fail(
            section,
            FailureKind::Panicked,
            "section task panicked".into(),
            false,
        )
        .await;
    }

    async fn persist_progress(&self) {
        let counts = self.tracker.counts();
        let progress = self
            .progress
            .compute(counts.completed, counts.generating, self.total);
        let ok = self
            .store
            .update_status(&self.document_id, move |status| {
                status.progress = progress;
                status.completed_sections = counts.completed;
                status.failed_sections = counts.failed;
            })
            .await;
        if !ok {
            debug!(progress, "progress not persisted");
        }
    }

    async fn finish(&self, id: &DocumentId) {
        let counts = self.tracker.counts();
        let cancelled = self.cancel.is_cancelled();
        let all_completed = counts.completed == self.total;

        let (phase, progress) = if all_completed {
            (DocumentPhase::Composed, 100.0)
        } else {
            (
                DocumentPhase::PartiallyComposed,
                self.progress.compute(counts.completed, 0, self.total),
            )
        };
        let message = if cancelled {
            Some("composition cancelled".to_string())
        } else if counts.failed > 0 {
            Some(format!("{} of {} sections failed", counts.failed, self.total))
        } else {
            None
        };

        let status_written = self
            .store
            .update_status(id, move |status| {
                status.phase = phase;
                status.progress = progress;
                status.completed_sections = counts.completed;
                status.failed_sections = counts.failed;
                status.message = message;
            })
            .await;
        let durable = self.store.end_composition(id).await;
        if !status_written || !durable {
            warn!("final document status may not be durable");
        }

        info!(
            completed = counts.completed,
            failed = counts.failed,
            cancelled,
            "composition finished"
        );
        self.emit(CompositionEvent::composition_complete(
            id.clone(),
            self.total,
            counts.completed,
            counts.failed,
        ))
        .await;
    }
}
