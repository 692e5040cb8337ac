use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::DocumentId;

/// Why a section ended in `failed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    Generation,
    Persistence,
    Cancelled,
    Panicked,
}

/// Events delivered to the caller of a composition. Ordering contract per section:
///
/// SectionStarted → SectionProgress* → (SectionCompleted | SectionFailed)
///
/// CompositionStarted is always first and CompositionComplete always last.
/// Events of different sections interleave freely.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CompositionEvent {
    CompositionStarted {
        document_id: DocumentId,
        total: usize,
        timestamp: DateTime<Utc>,
    },

    SectionStarted {
        index: usize,
        timestamp: DateTime<Utc>,
    },

    SectionProgress {
        index: usize,
        payload: Value,
        timestamp: DateTime<Utc>,
    },

    /// Only emitted once the content is durable.
    SectionCompleted {
        index: usize,
        payload: Value,
        timestamp: DateTime<Utc>,
    },

    SectionFailed {
        index: usize,
        kind: FailureKind,
        message: String,
        retryable: bool,
        timestamp: DateTime<Utc>,
    },

    CompositionComplete {
        document_id: DocumentId,
        total: usize,
        completed_count: usize,
        failed_count: usize,
        timestamp: DateTime<Utc>,
    },
}

impl CompositionEvent {
    pub fn composition_started(document_id: DocumentId, total: usize) -> Self {
        Self::CompositionStarted {
            document_id,
            total,
            timestamp: Utc::now(),
        }
    }

    pub fn section_started(index: usize) -> Self {
        Self::SectionStarted {
            index,
            timestamp: Utc::now(),
        }
    }

    pub fn section_progress(index: usize, payload: Value) -> Self {
        Self::SectionProgress {
            index,
            payload,
            timestamp: Utc::now(),
        }
    }

    pub fn section_completed(index: usize, payload: Value) -> Self {
        Self::SectionCompleted {
            index,
            payload,
            timestamp: Utc::now(),
        }
    }

    pub fn section_failed(
        index: usize,
        kind: FailureKind,
        message: impl Into<String>,
        retryable: bool,
    ) -> Self {
        Self::SectionFailed {
            index,
            kind,
            message: message.into(),
            retryable,
            timestamp: Utc::now(),
        }
    }

    pub fn composition_complete(
        document_id: DocumentId,
        total: usize,
        completed_count: usize,
        failed_count: usize,
    ) -> Self {
        Self::CompositionComplete {
            document_id,
            total,
            completed_count,
            failed_count,
            timestamp: Utc::now(),
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::CompositionStarted { .. } => "composition_started",
            Self::SectionStarted { .. } => "section_started",
            Self::SectionProgress { .. } => "section_progress",
            Self::SectionCompleted { .. } => "section_completed",
            Self::SectionFailed { .. } => "section_failed",
            Self::CompositionComplete { .. } => "composition_complete",
        }
    }

    /// Section index for section-scoped events.
    pub fn section_index(&self) -> Option<usize> {
        match self {
            Self::SectionStarted { index, .. }
            | Self::SectionProgress { index, .. }
            | Self::SectionCompleted { index, .. }
            | Self::SectionFailed { index, .. } => Some(*index),
            Self::CompositionStarted { .. } | Self::CompositionComplete { .. } => None,
        }
    }

    /// True for the event that settles a section.
    pub fn is_section_terminal(&self) -> bool {
        matches!(
            self,
            Self::SectionCompleted { .. } | Self::SectionFailed { .. }
        )
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::CompositionStarted { timestamp, .. }
            | Self::SectionStarted { timestamp, .. }
            | Self::SectionProgress { timestamp, .. }
            | Self::SectionCompleted { timestamp, .. }
            | Self::SectionFailed { timestamp, .. }
            | Self::CompositionComplete { timestamp, .. } => *timestamp,
        }
    }
}
