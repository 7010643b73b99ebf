/// Sample storage
///
/// Samples are append-only records read back in timestamp order and
/// pruned down to the most recent N.

pub mod memory;
pub mod migrations;
pub mod models;
pub mod repository;

pub use memory::MemorySampleStore;
pub use models::SampleFilter;
pub use repository::{LibsqlSampleStore, SampleStore};

use anyhow::Result;

/// Initialize database with schema
pub async fn initialize_database(conn: &libsql::Connection) -> Result<()> {
    migrations::run_migrations(conn).await
}
