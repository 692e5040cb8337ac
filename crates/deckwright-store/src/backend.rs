use deckwright_core::{Document, DocumentId};

use crate::error::StoreError;

/// Durable storage for whole documents.
///
/// Both calls are synchronous and may block for a long time; the
/// `PersistenceStore` only ever invokes them from its blocking worker pool.
pub trait DocumentBackend: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// `Ok(None)` when no document with this id has been written.
    fn fetch(&self, id: &DocumentId) -> Result<Option<Document>, StoreError>;

    /// Replace the stored copy of `document` (keyed by `document.id`).
    fn write(&self, document: &Document) -> Result<(), StoreError>;
}
