//! SQLite chart store: schema, pooled sessions, read queries and run history.

mod reader;
mod run_history;
pub mod schema;
mod session;

pub use reader::StoreReader;
pub use run_history::{PipelineRunRecord, RunHistory, RunStatus};
pub use session::{Session, SessionFactory, SqliteSessionFactory, DEFAULT_MAX_IDLE};
