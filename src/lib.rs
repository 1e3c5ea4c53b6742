//! Household reconciliation, household linkage editing and land-record
//! boundaries over a single SQLite genealogy database.

pub mod census;
pub mod config;
pub mod db;
pub mod entity;
mod error;
pub mod geo;
pub mod linkage;
pub mod logging;
pub mod migrate;
pub mod model;
pub mod op_log;
pub mod people;
pub mod time;

pub use config::{AppConfig, LogConfig};
pub use error::{AppError, AppResult};
pub use logging::init_logging;
pub use model::{CensusDetails, HouseholdKey, PersonSummary};

use std::path::Path;

use sqlx::SqlitePool;

/// Opens the database at `path` and brings its schema up to date.
pub async fn open_database(path: &Path) -> anyhow::Result<SqlitePool> {
    let pool = db::open_sqlite_pool(path).await?;
    migrate::apply_migrations(&pool).await?;
    Ok(pool)
}
