//! Caller-constructed registry of database drivers.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::dialect::Dialect;
use crate::error::{Error, Result};
use crate::session::Session;

/// Opens sessions for a data source name.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Opens a new session.
    async fn connect(&self, dsn: &str) -> Result<Box<dyn Session>>;
}

/// A backend: its dialect plus a way to connect to it.
#[derive(Clone)]
pub struct Driver {
    /// SQL dialect of the backend.
    pub dialect: Arc<dyn Dialect>,
    /// Session factory of the backend.
    pub connector: Arc<dyn Connector>,
}

impl Driver {
    /// Creates a driver from its parts.
    pub fn new(dialect: impl Dialect + 'static, connector: impl Connector + 'static) -> Self {
        Self {
            dialect: Arc::new(dialect),
            connector: Arc::new(connector),
        }
    }
}

impl std::fmt::Debug for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver")
            .field("dialect", &self.dialect.name())
            .finish_non_exhaustive()
    }
}

/// Mapping from driver name to driver.
#[derive(Debug, Clone, Default)]
pub struct DriverRegistry {
    drivers: HashMap<String, Driver>,
}

impl DriverRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a driver; a name can only be registered once.
    pub fn register(&mut self, name: impl Into<String>, driver: Driver) -> Result<()> {
        let name = name.into();
        if self.drivers.contains_key(&name) {
            return Err(Error::DriverExists(name));
        }
        self.drivers.insert(name, driver);
        Ok(())
    }

    /// Registers a driver, builder style.
    pub fn with(mut self, name: impl Into<String>, driver: Driver) -> Result<Self> {
        self.register(name, driver)?;
        Ok(self)
    }

    /// Looks up a driver by name.
    pub fn get(&self, name: &str) -> Result<&Driver> {
        self.drivers
            .get(name)
            .ok_or_else(|| Error::UnknownDriver(name.to_string()))
    }

    /// Returns the registered names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.drivers.keys().map(String::as_str)
    }
}
