use std::path::Path;

use deckwright_core::{Document, DocumentId};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::backend::DocumentBackend;
use crate::database::Database;
use crate::error::StoreError;

/// One row of `documents` without the body.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub id: DocumentId,
    pub title: String,
    pub phase: String,
    pub version: String,
    pub updated_at: String,
}

/// SQLite-backed document storage. Each document is one JSON row.
#[derive(Clone)]
pub struct SqliteBackend {
    db: Database,
}

impl SqliteBackend {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Ok(Self::new(Database::open(path)?))
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Ok(Self::new(Database::in_memory()?))
    }

    /// Most recently updated first.
    pub fn list(&self, limit: u32) -> Result<Vec<DocumentSummary>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, title, phase, version, updated_at
                 FROM documents ORDER BY updated_at DESC LIMIT ?1",
            )?;
            let rows = stmt.query_map([limit], |row| {
                Ok(DocumentSummary {
                    id: DocumentId::from_raw(row.get::<_, String>(0)?),
                    title: row.get(1)?,
                    phase: row.get(2)?,
                    version: row.get(3)?,
                    updated_at: row.get(4)?,
                })
            })?;
            rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
        })
    }
}

impl DocumentBackend for SqliteBackend {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn fetch(&self, id: &DocumentId) -> Result<Option<Document>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT body FROM documents WHERE id = ?1")?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => {
                    let body: String = row.get(0)?;
                    Ok(Some(serde_json::from_str(&body)?))
                }
                None => Ok(None),
            }
        })
    }

    fn write(&self, document: &Document) -> Result<(), StoreError> {
        let body = serde_json::to_string(document)?;
        let phase = serde_json::to_value(document.status.phase)?
            .as_str()
            .unwrap_or("unknown")
            .to_string();

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO documents (id, title, phase, version, body, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(id) DO UPDATE SET
                    title = excluded.title,
                    phase = excluded.phase,
                    version = excluded.version,
                    body = excluded.body,
                    updated_at = excluded.updated_at",
                rusqlite::params![
                    document.id.as_str(),
                    document.title,
                    phase,
                    document.version.as_str(),
                    body,
                    document.updated_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })?;

        debug!(document_id = %document.id, version = %document.version, "document row written");
        Ok(())
    }
}
