pub mod classify;
pub mod error;
pub mod mock;
pub mod orchestrator;
pub mod stream;
pub mod tracker;

pub use classify::{RetryClassifier, TypedClassifier};
pub use error::EngineError;
pub use mock::{ScriptedGenerator, SectionScript};
pub use orchestrator::Orchestrator;
pub use stream::CompositionStream;
pub use tracker::{SectionCounts, SectionTracker};
