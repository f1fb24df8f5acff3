//! Error types for reconciliation and persistence.

use crate::value::{ColumnType, Value};

/// Boxed error raised by a database driver.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur while reconciling schemas or moving rows.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No driver is registered under the requested name.
    #[error("Unknown driver: {0}")]
    UnknownDriver(String),

    /// A driver with the same name is already registered.
    #[error("Driver '{0}' is already registered")]
    DriverExists(String),

    /// A table definition has no name.
    #[error("Table name is empty")]
    EmptyTableName,

    /// The database handle already holds a session.
    #[error("Database is already open")]
    AlreadyOpen,

    /// The database handle has no session.
    #[error("Database is not open")]
    NotOpen,

    /// `begin` was called while a transaction is active.
    #[error("A transaction is already active")]
    TransactionActive,

    /// `commit` or `rollback` was called without an active transaction.
    #[error("No active transaction")]
    NoTransaction,

    /// The table does not exist in the target database.
    #[error("Table not found: {0}")]
    TableNotFound(String),

    /// A column referenced by name does not exist.
    #[error("Column not found: {0}")]
    ColumnNotFound(String),

    /// A column with the same name already exists in the table.
    #[error("Column already exists: {0}")]
    DuplicateColumn(String),

    /// The number of values does not match the number of columns.
    #[error("Column count mismatch: table has {expected}, got {actual}")]
    ColumnCountMismatch {
        /// Number of columns declared by the table.
        expected: usize,
        /// Number of columns supplied.
        actual: usize,
    },

    /// A value does not match its column's type.
    #[error("Column '{column}' expects {expected}, got {found}")]
    TypeMismatch {
        /// Column name.
        column: String,
        /// Declared column type.
        expected: ColumnType,
        /// Type of the supplied value.
        found: ColumnType,
    },

    /// NULL was supplied for a NOT NULL column.
    #[error("Column '{0}' does not allow NULL")]
    NullValue(String),

    /// A row index is past the end of the row store.
    #[error("Row index {0} is out of range")]
    RowOutOfRange(usize),

    /// Key-addressed operation on a table without a primary key.
    #[error("Table '{0}' has no primary key")]
    MissingPrimaryKey(String),

    /// A last-seen tuple does not carry a value for one of the sort keys.
    #[error("Missing last-seen value for sort key '{0}'")]
    MissingKeyValue(String),

    /// A last-seen tuple was given without any sort key.
    #[error("Keyset pagination requires at least one sort key")]
    EmptyOrderBy,

    /// A script holds no statement to run.
    #[error("Script has no statements")]
    EmptyScript,

    /// A declared database type has no logical counterpart.
    #[error("Unsupported column type: {0}")]
    UnsupportedType(String),

    /// A scanned value could not be converted to its column type.
    #[error("Cannot convert value for column '{column}': {message}")]
    Conversion {
        /// Column name.
        column: String,
        /// Conversion failure detail.
        message: String,
    },

    /// A statement failed; carries the statement text and bound parameters.
    #[error("{source}\nstatement: {sql}\nparams: {params:?}")]
    Statement {
        /// Statement text sent to the database.
        sql: String,
        /// Parameters bound to the statement.
        params: Vec<Value>,
        /// Driver error.
        source: BoxError,
    },

    /// Driver failure not tied to a statement (connect, close, begin).
    #[error("Driver error: {0}")]
    Driver(#[source] BoxError),

    /// Description encoding or decoding failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Wraps a driver error together with the statement that caused it.
    pub fn statement(
        sql: impl Into<String>,
        params: &[Value],
        source: impl Into<BoxError>,
    ) -> Self {
        Self::Statement {
            sql: sql.into(),
            params: params.to_vec(),
            source: source.into(),
        }
    }

    /// Wraps a driver error not tied to any statement.
    pub fn driver(source: impl Into<BoxError>) -> Self {
        Self::Driver(source.into())
    }
}

/// Result type for reconciliation and persistence operations.
pub type Result<T> = std::result::Result<T, Error>;
