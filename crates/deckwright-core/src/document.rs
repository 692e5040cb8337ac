use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{DocumentId, SectionId, VersionToken};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionStatus {
    Pending,
    Generating,
    Completed,
    Failed,
}

impl SectionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for SectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Generating => write!(f, "generating"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentPhase {
    Draft,
    Composing,
    Composed,
    PartiallyComposed,
}

/// Aggregate status record stored on the document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DocumentStatus {
    pub phase: DocumentPhase,
    /// Percentage in `0.0..=100.0`.
    pub progress: f64,
    pub completed_sections: usize,
    pub failed_sections: usize,
    pub message: Option<String>,
}

impl Default for DocumentStatus {
    fn default() -> Self {
        Self {
            phase: DocumentPhase::Draft,
            progress: 0.0,
            completed_sections: 0,
            failed_sections: 0,
            message: None,
        }
    }
}

/// One slide of the deck. `index` is its position and never changes during a composition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub id: SectionId,
    pub index: usize,
    pub title: String,
    /// Upstream description of what the section should contain.
    pub outline: Value,
    pub content: Option<Value>,
    pub status: SectionStatus,
    pub error: Option<String>,
}

impl Section {
    pub fn outlined(index: usize, title: impl Into<String>, outline: Value) -> Self {
        Self {
            id: SectionId::new(),
            index,
            title: title.into(),
            outline,
            content: None,
            status: SectionStatus::Pending,
            error: None,
        }
    }

    /// Copy of this section carrying generated content.
    pub fn completed_with(&self, content: Value) -> Self {
        Self {
            content: Some(content),
            status: SectionStatus::Completed,
            error: None,
            ..self.clone()
        }
    }

    /// Copy of this section marked failed. Existing content is left untouched.
    pub fn failed_with(&self, error: impl Into<String>) -> Self {
        Self {
            status: SectionStatus::Failed,
            error: Some(error.into()),
            ..self.clone()
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub title: String,
    pub sections: Vec<Section>,
    pub status: DocumentStatus,
    /// Replaced on every durable write.
    pub version: VersionToken,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    pub fn new(title: impl Into<String>, sections: Vec<Section>) -> Self {
        Self {
            id: DocumentId::new(),
            title: title.into(),
            sections,
            status: DocumentStatus::default(),
            version: VersionToken::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn section(&self, index: usize) -> Option<&Section> {
        self.sections.get(index)
    }

    /// Replace the section at `index`. Returns false when the index is out of range.
    pub fn replace_section(&mut self, index: usize, section: Section) -> bool {
        match self.sections.get_mut(index) {
            Some(slot) => {
                *slot = section;
                true
            }
            None => false,
        }
    }

    /// Sections must be laid out so that `sections[i].index == i`.
    pub fn indices_are_dense(&self) -> bool {
        self.sections.iter().enumerate().all(|(i, s)| s.index == i)
    }

    pub fn count_with_status(&self, status: SectionStatus) -> usize {
        self.sections.iter().filter(|s| s.status == status).count()
    }

    /// Stamp a fresh version token and modification time.
    pub fn touch(&mut self) {
        self.version = VersionToken::new();
        self.updated_at = Utc::now();
    }
}
