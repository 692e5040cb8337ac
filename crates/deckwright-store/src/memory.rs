use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use deckwright_core::{Document, DocumentId};
use parking_lot::Mutex;

use crate::backend::DocumentBackend;
use crate::error::StoreError;

/// Process-local backend with call counters and fault injection.
///
/// Used by tests and the CLI's `--memory` mode. Injected delays block the
/// calling thread, which is what a slow synchronous client would do.
pub struct InMemoryBackend {
    documents: Mutex<HashMap<DocumentId, Document>>,
    fetch_count: AtomicUsize,
    write_count: AtomicUsize,
    fail_writes: AtomicBool,
    failing_fetches: AtomicU32,
    write_delay: Mutex<Duration>,
    fetch_delay: Mutex<Duration>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            documents: Mutex::new(HashMap::new()),
            fetch_count: AtomicUsize::new(0),
            write_count: AtomicUsize::new(0),
            fail_writes: AtomicBool::new(false),
            failing_fetches: AtomicU32::new(0),
            write_delay: Mutex::new(Duration::ZERO),
            fetch_delay: Mutex::new(Duration::ZERO),
        }
    }

    /// Seed a document without counting it as a write.
    pub fn insert(&self, document: Document) {
        let _ = self.documents.lock().insert(document.id.clone(), document);
    }

    /// Read the stored copy without counting it as a fetch.
    pub fn peek(&self, id: &DocumentId) -> Option<Document> {
        self.documents.lock().get(id).cloned()
    }

    pub fn fetch_count(&self) -> usize {
        self.fetch_count.load(Ordering::SeqCst)
    }

    pub fn write_count(&self) -> usize {
        self.write_count.load(Ordering::SeqCst)
    }

    /// Make every subsequent write fail until reset.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make the next `n` fetches fail.
    pub fn fail_next_fetches(&self, n: u32) {
        self.failing_fetches.store(n, Ordering::SeqCst);
    }

    pub fn set_write_delay(&self, delay: Duration) {
        *self.write_delay.lock() = delay;
    }

    pub fn set_fetch_delay(&self, delay: Duration) {
        *self.fetch_delay.lock() = delay;
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentBackend for InMemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    fn fetch(&self, id: &DocumentId) -> Result<Option<Document>, StoreError> {
        let _ = self.fetch_count.fetch_add(1, Ordering::SeqCst);
        let delay = *self.fetch_delay.lock();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        let failing = self
            .failing_fetches
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StoreError::Backend(format!("injected fetch failure for {id}")));
        }
        Ok(self.documents.lock().get(id).cloned())
    }

    fn write(&self, document: &Document) -> Result<(), StoreError> {
        let delay = *self.write_delay.lock();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend(format!(
                "injected write failure for {}",
                document.id
            )));
        }
        let _ = self.write_count.fetch_add(1, Ordering::SeqCst);
        let _ = self
            .documents
            .lock()
            .insert(document.id.clone(), document.clone());
        Ok(())
    }
}
