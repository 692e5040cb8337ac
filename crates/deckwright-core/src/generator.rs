use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde_json::Value;

use crate::document::{Document, Section};
use crate::errors::GenerationError;
use crate::ids::{DocumentId, SectionId};

/// Events yielded by a section generator. Ordering contract:
///
/// Progress* → (Completed | Failed)
///
/// Exactly one terminal event; anything after it is ignored.
#[derive(Clone, Debug)]
pub enum GenerationEvent {
    Progress { payload: Value },
    Completed { payload: Value },
    Failed { error: GenerationError },
}

impl GenerationEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failed { .. })
    }
}

pub type GenerationStream = Pin<Box<dyn Stream<Item = GenerationEvent> + Send>>;

/// Input handed to the generator for one section.
#[derive(Clone, Debug)]
pub struct SectionContext {
    pub document_id: DocumentId,
    pub document_title: String,
    pub section_id: SectionId,
    pub index: usize,
    pub total_sections: usize,
    pub title: String,
    pub outline: Value,
}

impl SectionContext {
    pub fn for_section(document: &Document, section: &Section) -> Self {
        Self {
            document_id: document.id.clone(),
            document_title: document.title.clone(),
            section_id: section.id.clone(),
            index: section.index,
            total_sections: document.sections.len(),
            title: section.title.clone(),
            outline: section.outline.clone(),
        }
    }
}

/// Produces the content of a single section. Implemented outside this workspace
/// (prompting, model calls, asset selection); the orchestrator only sees the stream.
#[async_trait]
pub trait SectionGenerator: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, context: SectionContext) -> Result<GenerationStream, GenerationError>;
}
