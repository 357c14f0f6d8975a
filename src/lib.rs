//! Music chart ETL engine
//!
//! Scrapes daily charts and artist statistics, enriches identities with
//! metadata, and upserts everything into a SQLite store.

pub mod config;
pub mod extract;
pub mod load;
pub mod metrics;
pub mod models;
pub mod orchestrator;
pub mod pipeline;
pub mod store;
pub mod transform;

// Re-export commonly used types for convenience
pub use orchestrator::{CycleReport, Mode, Orchestrator};
pub use pipeline::{Pipeline, PipelineError, RunContext, RunSummary};
pub use store::{SessionFactory, SqliteSessionFactory};
