//! Cache-coherent document store.
//!
//! One `DocumentSlot` per document id holds the cached snapshot, the
//! composing flag and the writer lock. Writers for the same document are
//! serialized on that lock; different documents never contend. Readers only
//! take the short snapshot lock, so they observe a new section as soon as it
//! is cached, even while its backend write is still in flight.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use deckwright_core::{Document, DocumentId, DocumentStatus, Section, VersionToken};
use metrics::counter;
use parking_lot::RwLock;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, error, info, instrument, warn};

use crate::backend::DocumentBackend;
use crate::error::StoreError;
use crate::retry::RetryPolicy;

const DEFAULT_THROTTLE_INTERVAL: Duration = Duration::from_secs(2);
const DEFAULT_WORKER_POOL_SIZE: usize = 8;

#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Minimum spacing of whole-document backend writes while composing.
    pub throttle_interval: Duration,
    pub retry: RetryPolicy,
    /// Upper bound on concurrent blocking backend calls.
    pub worker_pool_size: usize,
    /// Re-read after each write and compare version tokens.
    pub verify_writes: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            throttle_interval: DEFAULT_THROTTLE_INTERVAL,
            retry: RetryPolicy::default(),
            worker_pool_size: DEFAULT_WORKER_POOL_SIZE,
            verify_writes: true,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompositionState {
    Idle,
    /// Cache is the authoritative read source.
    Composing,
}

struct CacheEntry {
    state: CompositionState,
    snapshot: Option<Document>,
    last_backend_write: Option<Instant>,
    /// Snapshot holds changes a throttled save did not write.
    dirty: bool,
}

struct DocumentSlot {
    /// Serializes writers for one document. Held across backend calls.
    write_lock: Mutex<()>,
    entry: RwLock<CacheEntry>,
}

impl DocumentSlot {
    fn new() -> Self {
        Self {
            write_lock: Mutex::new(()),
            entry: RwLock::new(CacheEntry {
                state: CompositionState::Idle,
                snapshot: None,
                last_backend_write: None,
                dirty: false,
            }),
        }
    }

    fn is_composing(&self) -> bool {
        self.entry.read().state == CompositionState::Composing
    }

    fn cached(&self) -> Option<Document> {
        self.entry.read().snapshot.clone()
    }

    fn authoritative_snapshot(&self) -> Option<Document> {
        let entry = self.entry.read();
        match entry.state {
            CompositionState::Composing => entry.snapshot.clone(),
            CompositionState::Idle => None,
        }
    }
}

struct StoreInner {
    backend: Arc<dyn DocumentBackend>,
    config: StoreConfig,
    slots: DashMap<DocumentId, Arc<DocumentSlot>>,
    workers: Arc<Semaphore>,
}

/// Durable, cache-coherent storage of one document per id.
///
/// Cloning is cheap; clones share cache, locks and worker pool.
#[derive(Clone)]
pub struct PersistenceStore {
    inner: Arc<StoreInner>,
}

impl PersistenceStore {
    pub fn new(backend: Arc<dyn DocumentBackend>, config: StoreConfig) -> Self {
        let workers = Arc::new(Semaphore::new(config.worker_pool_size.max(1)));
        Self {
            inner: Arc::new(StoreInner {
                backend,
                config,
                slots: DashMap::new(),
                workers,
            }),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    pub fn backend_name(&self) -> &str {
        self.inner.backend.name()
    }

    pub fn is_composing(&self, id: &DocumentId) -> bool {
        self.inner
            .slots
            .get(id)
            .is_some_and(|slot| slot.is_composing())
    }

    /// Make the cache the authoritative read source for `id`. Idempotent.
    #[instrument(skip(self, id), fields(document_id = %id))]
    pub async fn begin_composition(&self, id: &DocumentId) {
        let slot = self.inner.slot(id);
        let _guard = slot.write_lock.lock().await;
        let mut entry = slot.entry.write();
        if entry.state == CompositionState::Composing {
            debug!("composition already active");
            return;
        }
        entry.state = CompositionState::Composing;
        info!("composition window opened");
    }

    /// Release cache authority for `id`, flushing a snapshot left dirty by
    /// throttled saves. Idempotent. Returns false if the flush failed.
    #[instrument(skip(self, id), fields(document_id = %id))]
    pub async fn end_composition(&self, id: &DocumentId) -> bool {
        let inner = Arc::clone(&self.inner);
        let id = id.clone();
        detached(async move { inner.end_composition_locked(id).await }).await
    }

    /// Read a document.
    ///
    /// While composing (and not forced) the cached snapshot is returned, with a
    /// single backend fetch to seed it on a miss. Otherwise the backend is read
    /// with bounded retry, degrading to the cached snapshot when every attempt
    /// fails. `Err` only when the backend is unreachable and nothing is cached.
    #[instrument(skip(self, id), fields(document_id = %id))]
    pub async fn get(
        &self,
        id: &DocumentId,
        force_backend: bool,
    ) -> Result<Option<Document>, StoreError> {
        let inner = &self.inner;
        let slot = inner.slot(id);

        if !force_backend && slot.is_composing() {
            if let Some(doc) = slot.authoritative_snapshot() {
                return Ok(Some(doc));
            }

            // Miss while composing: seed under the writer lock so concurrent
            // readers share one fetch.
            let _guard = slot.write_lock.lock().await;
            if let Some(doc) = slot.authoritative_snapshot() {
                return Ok(Some(doc));
            }
            let fetched = inner.fetch_once(id).await?;
            if let Some(doc) = &fetched {
                slot.entry.write().snapshot = Some(doc.clone());
                debug!(version = %doc.version, "cache seeded from backend");
            }
            return Ok(fetched);
        }

        match inner.fetch_with_retry(id).await {
            Ok(fetched) => {
                if let Some(doc) = &fetched {
                    let mut entry = slot.entry.write();
                    // Never let a backend read replace the authoritative copy.
                    if entry.state == CompositionState::Idle {
                        entry.snapshot = Some(doc.clone());
                    }
                }
                Ok(fetched)
            }
            Err(e) => match slot.cached() {
                Some(doc) => {
                    warn!(error = %e, version = %doc.version, "backend unavailable, serving cached snapshot");
                    Ok(Some(doc))
                }
                None => Err(e),
            },
        }
    }

    /// Durably replace the section at `index`.
    ///
    /// The cache is updated before the backend write so readers see the new
    /// section immediately; on write failure the cache is reconciled to the
    /// backend's copy and false is returned. Section writes are never
    /// throttled, so `force_immediate` only documents intent at call sites.
    #[instrument(skip(self, id, section), fields(document_id = %id))]
    pub async fn update_section(
        &self,
        id: &DocumentId,
        index: usize,
        section: Section,
        force_immediate: bool,
    ) -> bool {
        let inner = Arc::clone(&self.inner);
        let id = id.clone();
        detached(async move { inner.update_section_locked(id, index, section).await }).await
    }

    /// Whole-document write. While composing, a backend write within
    /// `throttle_interval` of the previous one is skipped (the cache is still
    /// updated and flushed later by `end_composition`).
    #[instrument(skip(self, id, document), fields(document_id = %id))]
    pub async fn save(&self, id: &DocumentId, document: Document) -> bool {
        if &document.id != id {
            warn!(other = %document.id, "document id does not match target id");
            return false;
        }
        let inner = Arc::clone(&self.inner);
        let id = id.clone();
        detached(async move { inner.save_locked(id, document).await }).await
    }

    /// Mutate the status record under the document's lock, then persist via
    /// the `save` path (throttled while composing).
    #[instrument(skip(self, id, mutate), fields(document_id = %id))]
    pub async fn update_status<F>(&self, id: &DocumentId, mutate: F) -> bool
    where
        F: FnOnce(&mut DocumentStatus) + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let id = id.clone();
        detached(async move { inner.update_status_locked(id, mutate).await }).await
    }
}

/// Run a store mutation on its own task so a dropped caller future cannot
/// abandon it between the cache update and the backend write.
async fn detached<F>(op: F) -> bool
where
    F: std::future::Future<Output = bool> + Send + 'static,
{
    match tokio::spawn(op).await {
        Ok(ok) => ok,
        Err(e) => {
            error!(error = %e, "store task failed");
            false
        }
    }
}

impl StoreInner {
    fn slot(&self, id: &DocumentId) -> Arc<DocumentSlot> {
        Arc::clone(
            self.slots
                .entry(id.clone())
                .or_insert_with(|| Arc::new(DocumentSlot::new()))
                .value(),
        )
    }

    /// Run a backend call on the blocking pool, bounded by `worker_pool_size`.
    async fn offload<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        F: FnOnce(&dyn DocumentBackend) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let permit = Arc::clone(&self.workers)
            .acquire_owned()
            .await
            .map_err(|_| StoreError::Worker("worker pool closed".into()))?;
        let backend = Arc::clone(&self.backend);
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            op(backend.as_ref())
        })
        .await
        .map_err(|e| StoreError::Worker(e.to_string()))?
    }

    async fn fetch_once(&self, id: &DocumentId) -> Result<Option<Document>, StoreError> {
        let id = id.clone();
        self.offload(move |backend| backend.fetch(&id)).await
    }

    async fn fetch_with_retry(&self, id: &DocumentId) -> Result<Option<Document>, StoreError> {
        let policy = &self.config.retry;
        let attempts = policy.attempts();
        let mut last_error = String::new();

        for attempt in 0..attempts {
            match self.fetch_once(id).await {
                Ok(doc) => return Ok(doc),
                Err(e) => {
                    last_error = e.to_string();
                    if attempt + 1 < attempts {
                        let delay = policy.delay_for(attempt);
                        warn!(
                            attempt = attempt + 1,
                            max_attempts = attempts,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "backend fetch failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        Err(StoreError::Unavailable {
            attempts,
            last_error,
        })
    }

    /// Current copy to modify: the cache while composing, else the backend.
    async fn load_authoritative(
        &self,
        id: &DocumentId,
        slot: &DocumentSlot,
    ) -> Result<Option<Document>, StoreError> {
        if let Some(doc) = slot.authoritative_snapshot() {
            return Ok(Some(doc));
        }
        self.fetch_with_retry(id).await
    }

    /// Cache first, then backend. Caller holds the slot's writer lock.
    async fn write_through(&self, id: &DocumentId, slot: &DocumentSlot, mut doc: Document) -> bool {
        doc.touch();
        let version = doc.version.clone();
        slot.entry.write().snapshot = Some(doc.clone());

        match self.offload(move |backend| backend.write(&doc)).await {
            Ok(()) => {
                {
                    let mut entry = slot.entry.write();
                    entry.last_backend_write = Some(Instant::now());
                    entry.dirty = false;
                }
                counter!("store_backend_writes_total").increment(1);
                debug!(version = %version, "backend write acknowledged");
                if self.config.verify_writes {
                    self.verify(id, &version).await;
                }
                true
            }
            Err(e) => {
                counter!("store_backend_write_failures_total").increment(1);
                warn!(error = %e, "backend write failed, reconciling cache to backend");
                self.reconcile(id, slot).await;
                false
            }
        }
    }

    /// Replace the cached snapshot with backend truth, or drop it if the
    /// backend cannot be read.
    async fn reconcile(&self, id: &DocumentId, slot: &DocumentSlot) {
        let truth = self.fetch_with_retry(id).await;
        let mut entry = slot.entry.write();
        entry.dirty = false;
        match truth {
            Ok(doc) => {
                debug!(
                    version = doc.as_ref().map(|d| d.version.to_string()),
                    "cache reconciled"
                );
                entry.snapshot = doc;
            }
            Err(e) => {
                warn!(error = %e, "backend unreadable during reconcile, invalidating cached snapshot");
                entry.snapshot = None;
            }
        }
    }

    /// Best-effort read-back. Never fails the write.
    async fn verify(&self, id: &DocumentId, expected: &VersionToken) {
        match self.fetch_once(id).await {
            Ok(Some(doc)) if &doc.version == expected => {}
            Ok(Some(doc)) => {
                warn!(expected = %expected, found = %doc.version, "post-write verification mismatch");
            }
            Ok(None) => warn!(expected = %expected, "post-write verification found no document"),
            Err(e) => debug!(error = %e, "post-write verification read failed"),
        }
    }

    async fn persist_whole(&self, id: &DocumentId, slot: &DocumentSlot, doc: Document) -> bool {
        let throttled = {
            let entry = slot.entry.read();
            entry.state == CompositionState::Composing
                && entry
                    .last_backend_write
                    .is_some_and(|at| at.elapsed() < self.config.throttle_interval)
        };

        if throttled {
            let mut entry = slot.entry.write();
            entry.snapshot = Some(doc);
            entry.dirty = true;
            counter!("store_writes_throttled_total").increment(1);
            debug!("whole-document write throttled");
            return true;
        }

        self.write_through(id, slot, doc).await
    }

    async fn update_section_locked(
        self: Arc<Self>,
        id: DocumentId,
        index: usize,
        section: Section,
    ) -> bool {
        if section.index != index {
            warn!(index, section_index = section.index, "section index does not match target index");
            return false;
        }

        let slot = self.slot(&id);
        let _guard = slot.write_lock.lock().await;

        let mut doc = match self.load_authoritative(&id, &slot).await {
            Ok(Some(doc)) => doc,
            Ok(None) => {
                warn!("document not found, section not written");
                return false;
            }
            Err(e) => {
                warn!(error = %e, "could not load document, section not written");
                return false;
            }
        };

        let len = doc.sections.len();
        if !doc.replace_section(index, section) {
            warn!(index, sections = len, "section index out of range");
            return false;
        }

        self.write_through(&id, &slot, doc).await
    }

    async fn save_locked(self: Arc<Self>, id: DocumentId, document: Document) -> bool {
        let slot = self.slot(&id);
        let _guard = slot.write_lock.lock().await;
        self.persist_whole(&id, &slot, document).await
    }

    async fn update_status_locked<F>(self: Arc<Self>, id: DocumentId, mutate: F) -> bool
    where
        F: FnOnce(&mut DocumentStatus) + Send + 'static,
    {
        let slot = self.slot(&id);
        let _guard = slot.write_lock.lock().await;

        let mut doc = match self.load_authoritative(&id, &slot).await {
            Ok(Some(doc)) => doc,
            Ok(None) => {
                warn!("document not found, status not written");
                return false;
            }
            Err(e) => {
                warn!(error = %e, "could not load document, status not written");
                return false;
            }
        };

        mutate(&mut doc.status);
        self.persist_whole(&id, &slot, doc).await
    }

    async fn end_composition_locked(self: Arc<Self>, id: DocumentId) -> bool {
        let slot = self.slot(&id);
        let _guard = slot.write_lock.lock().await;

        let (composing, pending) = {
            let entry = slot.entry.read();
            let pending = if entry.dirty { entry.snapshot.clone() } else { None };
            (entry.state == CompositionState::Composing, pending)
        };
        if !composing {
            debug!("no composition active");
            return true;
        }

        let durable = match pending {
            Some(doc) => {
                debug!("flushing throttled snapshot");
                self.write_through(&id, &slot, doc).await
            }
            None => true,
        };

        slot.entry.write().state = CompositionState::Idle;
        info!(durable, "composition window closed");
        durable
    }
}
