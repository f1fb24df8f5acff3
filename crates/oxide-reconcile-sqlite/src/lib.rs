//! SQLite driver for `oxide-reconcile`.
//!
//! Provides the [`SqliteDialect`] (introspection, DDL with table rebuilds,
//! merge) and the [`SqliteConnector`] opening sqlx-backed sessions.
//! Descriptions are stored in the [`catalog`] side table.
//!
//! # Example
//!
//! ```rust,ignore
//! use oxide_reconcile::prelude::*;
//!
//! let registry = oxide_reconcile_sqlite::registry()?;
//! let mut db = Database::new(&registry, oxide_reconcile_sqlite::DRIVER_NAME, "sqlite://app.db")?;
//! db.open().await?;
//! let people = db.table("people").await?;
//! ```

pub mod catalog;
pub mod config;
pub mod dialect;
pub mod session;
pub mod types;

use oxide_reconcile::error::Result;
use oxide_reconcile::registry::{Driver, DriverRegistry};

pub use config::SqliteConfig;
pub use dialect::SqliteDialect;
pub use session::{SqliteConnector, SqliteCursor, SqliteSession};

/// Name under which [`registry`] registers the driver.
pub const DRIVER_NAME: &str = "sqlite";

/// Returns the SQLite driver with default connection settings.
#[must_use]
pub fn driver() -> Driver {
    driver_with(SqliteConfig::default())
}

/// Returns the SQLite driver with the given base settings. The data source
/// name passed when opening a database replaces the configured URL.
#[must_use]
pub fn driver_with(config: SqliteConfig) -> Driver {
    Driver::new(SqliteDialect::new(), SqliteConnector::new(config))
}

/// Returns a registry holding only the SQLite driver.
pub fn registry() -> Result<DriverRegistry> {
    DriverRegistry::new().with(DRIVER_NAME, driver())
}
