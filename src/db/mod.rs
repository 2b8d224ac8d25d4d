//! Database module for SQLite persistence
//!
//! Owns every persisted annotation. Callers go through `RecordStore`; nothing
//! else in the crate writes to the database.

mod records;
mod schema;

pub use records::RecordStore;
pub use schema::initialize_schema;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

use crate::config::DatabaseConfig;
use crate::error::Result;

/// Create a new database connection pool
pub async fn create_pool(config: &DatabaseConfig) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&config.url)?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

    let pool_options = if config.is_in_memory() {
        // Every connection to :memory: is a separate database, so pin one
        SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(config.max_connections.max(1))
    };

    let pool = pool_options.connect_with(options).await?;

    // Run migrations
    initialize_schema(&pool).await?;

    Ok(pool)
}
