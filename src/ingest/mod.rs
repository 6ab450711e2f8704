pub mod orchestrator;

pub use orchestrator::{IngestReport, IngestionOrchestrator};
