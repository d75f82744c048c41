//! Playlog Storage
//!
//! Persistence for Playlog: the durable `SQLite` play log and an embedded
//! on-disk buffer store.
//!
//! # Architecture
//!
//! - **Vertical Slicing**: `play_logs` owns its queries
//! - **Adapters**: [`SqlitePlayLogStore`] implements the core's durable
//!   `PlayLogStore`; [`RedbStore`] implements the core's `KeyedStore` for
//!   deployments that want the buffer to survive a restart
//!
//! # Example
//!
//! ```rust,no_run
//! use playlog_storage::{create_pool, run_migrations, SqlitePlayLogStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = create_pool("sqlite://playlog.db").await?;
//! run_migrations(&pool).await?;
//!
//! let durable = SqlitePlayLogStore::new(pool);
//! # Ok(())
//! # }
//! ```

mod buffer_store;
mod context;
mod error;

// Vertical slices
pub mod play_logs;

pub use buffer_store::RedbStore;
pub use context::SqlitePlayLogStore;
pub use error::StorageError;

use sqlx::migrate::Migrator;
use sqlx::sqlite::SqlitePool;

// Embed migrations into binary
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Run database migrations
///
/// This should be called once when the application starts to ensure
/// the database schema is up to date.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::migrate::MigrateError> {
    MIGRATOR.run(pool).await
}

/// Create a new `SQLite` pool
///
/// # Arguments
///
/// * `database_url` - `SQLite` connection string (e.g., `<sqlite://playlog.db>`)
pub async fn create_pool(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
    use std::str::FromStr;

    tracing::debug!(database_url, "Creating SQLite pool");

    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(std::time::Duration::from_secs(30));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}
