//! Schema reconciliation and change-tracked persistence.
//!
//! `oxide-reconcile` keeps a relational table in step with an in-memory
//! description of it, and writes in-memory row edits back as DML:
//! - Reconciliation diffs a live [`Table`](schema::Table) against the desired
//!   one and issues the minimal ordered DDL to converge them
//! - The row store ([`DataTable`](rows::DataTable)) tracks inserted, updated
//!   and deleted rows; the persistence engine flushes them in one transaction
//! - Reads stream through [`StepTable`](step::StepTable) batches or keyset
//!   pages
//!
//! # Architecture
//!
//! - **Schema** - `Column`, `Index`, `Table` with free-form [`Desc`](desc::Desc) metadata
//! - **Dialect** - Backend-specific introspection, DDL and merge
//! - **Session** - Statement execution, transactions and cursors
//! - **Registry** - Caller-owned mapping of driver names to drivers
//! - **Database** - Handle tying a driver, a data source and a session together
//!
//! Backends live in their own crates; `oxide-reconcile-sqlite` provides SQLite.
//!
//! # Example
//!
//! ```rust,ignore
//! use oxide_reconcile::prelude::*;
//!
//! let registry = oxide_reconcile_sqlite::registry()?;
//! let mut db = Database::new(&registry, "sqlite", "sqlite::memory:")?;
//! db.open().await?;
//!
//! let people = Table::new("people")
//!     .column(Column::new("id", ColumnType::Int64).not_null())
//!     .column(Column::new("full_name", ColumnType::String).max_size(20).renamed_from("name"))
//!     .primary_key(["id"]);
//! db.sync_table(&people).await?;
//!
//! let mut rows = DataTable::new(people);
//! rows.add_values(vec![Value::Int64(1), "Ann".into()])?;
//! db.save_changes(&rows).await?;
//! rows.accept_change();
//! ```

pub mod database;
pub mod desc;
pub mod dialect;
pub mod error;
pub mod keyset;
pub mod order;
pub mod persist;
pub mod reconcile;
pub mod registry;
pub mod rows;
pub mod schema;
pub mod script;
pub mod session;
pub mod step;
pub mod value;

#[cfg(test)]
pub(crate) mod testing;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::database::Database;
    pub use crate::desc::{Desc, ORIGIN_NAME_KEY};
    pub use crate::dialect::{Dialect, Merge, TableIndex};
    pub use crate::error::{Error, Result};
    pub use crate::keyset::{BuiltQuery, KeysetQuery, SortKey, SortOrder};
    pub use crate::order::ColumnOrder;
    pub use crate::persist::save_changes;
    pub use crate::reconcile::{plan, reconcile, SchemaChange};
    pub use crate::registry::{Connector, Driver, DriverRegistry};
    pub use crate::rows::{Changeset, DataTable, Row, RowState};
    pub use crate::schema::{Column, Index, Table};
    pub use crate::session::{Cursor, Session, Statement};
    pub use crate::step::StepTable;
    pub use crate::value::{ColumnType, Value};
}
