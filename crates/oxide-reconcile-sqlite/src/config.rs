//! SQLite connection configuration.

use std::str::FromStr;
use std::time::Duration;

use oxide_reconcile::error::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

/// How long a statement waits for a pooled connection.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection settings for a SQLite database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqliteConfig {
    /// Connection URL, e.g. `sqlite://data.db` or `sqlite::memory:`.
    #[serde(default = "default_url")]
    pub url: String,

    /// Maximum pooled connections (default: 4). In-memory databases always
    /// use a single connection so every statement sees the same data.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Rows buffered between a streaming cursor and its reader (default: 64).
    #[serde(default = "default_cursor_buffer")]
    pub cursor_buffer: usize,

    /// Whether a missing database file is created (default: true).
    #[serde(default = "default_create_if_missing")]
    pub create_if_missing: bool,
}

fn default_url() -> String {
    "sqlite::memory:".to_string()
}

fn default_max_connections() -> u32 {
    4
}

fn default_cursor_buffer() -> usize {
    64
}

fn default_create_if_missing() -> bool {
    true
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            max_connections: default_max_connections(),
            cursor_buffer: default_cursor_buffer(),
            create_if_missing: default_create_if_missing(),
        }
    }
}

impl SqliteConfig {
    /// Creates a configuration for a URL with default settings.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Sets the maximum pooled connections.
    #[must_use]
    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Sets the streaming cursor buffer size.
    #[must_use]
    pub fn cursor_buffer(mut self, rows: usize) -> Self {
        self.cursor_buffer = rows;
        self
    }

    /// Sets whether a missing database file is created.
    #[must_use]
    pub fn create_if_missing(mut self, create: bool) -> Self {
        self.create_if_missing = create;
        self
    }

    /// Returns whether the URL names an in-memory database.
    #[must_use]
    pub fn is_memory(&self) -> bool {
        self.url.contains(":memory:") || self.url.contains("mode=memory")
    }

    /// Returns the pool size actually used.
    #[must_use]
    pub fn pool_size(&self) -> u32 {
        if self.is_memory() {
            1
        } else {
            self.max_connections.max(1)
        }
    }

    /// Opens a connection pool.
    pub async fn connect(&self) -> Result<SqlitePool> {
        let options = SqliteConnectOptions::from_str(&self.url)
            .map_err(Error::driver)?
            .create_if_missing(self.create_if_missing)
            .with_regexp();
        let mut pool = SqlitePoolOptions::new()
            .max_connections(self.pool_size())
            .acquire_timeout(ACQUIRE_TIMEOUT);
        if self.is_memory() {
            // the database lives only as long as its connection
            pool = pool
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }
        pool.connect_with(options).await.map_err(Error::driver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_document() {
        let config: SqliteConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, SqliteConfig::default());
        assert_eq!(config.max_connections, 4);
        assert_eq!(config.cursor_buffer, 64);
        assert!(config.is_memory());
        assert_eq!(config.pool_size(), 1);
    }

    #[test]
    fn test_file_database_uses_pool() {
        let config: SqliteConfig =
            serde_json::from_str(r#"{"url": "sqlite://data.db", "max_connections": 8}"#).unwrap();
        assert!(!config.is_memory());
        assert_eq!(config.pool_size(), 8);
        let config = SqliteConfig::new("sqlite://x.db").max_connections(0);
        assert_eq!(config.pool_size(), 1);
    }
}
