//! Pipeline orchestration: consumer loop, writer task and offset commits.

mod coordinator;
mod ingestion;

pub use coordinator::{CommitReport, OffsetCommitCoordinator};
pub use ingestion::IngestionEngine;
