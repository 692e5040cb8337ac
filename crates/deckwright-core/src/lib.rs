pub mod document;
pub mod errors;
pub mod events;
pub mod generator;
pub mod ids;
pub mod options;

pub use document::{Document, DocumentPhase, DocumentStatus, Section, SectionStatus};
pub use errors::GenerationError;
pub use events::{CompositionEvent, FailureKind};
pub use generator::{GenerationEvent, GenerationStream, SectionContext, SectionGenerator};
pub use ids::{DocumentId, InvalidId, SectionId, VersionToken};
pub use options::{CompositionOptions, ProgressModel};
