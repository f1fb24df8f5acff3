//! Database handle.
//!
//! [`Database`] ties a registered driver to a data source name and, once
//! opened, to a live [`Session`]. It is the single entry point most callers
//! need: raw statements, row reads, schema reconciliation and change
//! flushing all go through it.

use tracing::{debug, info};

use crate::dialect::{Dialect, Merge};
use crate::error::{Error, Result};
use crate::keyset::KeysetQuery;
use crate::persist;
use crate::reconcile::{self, SchemaChange};
use crate::registry::{Driver, DriverRegistry};
use crate::rows::DataTable;
use crate::schema::Table;
use crate::script::split_batches;
use crate::session::{Cursor, Session};
use crate::step::{self, StepTable};
use crate::value::Value;

/// A driver, a data source name and an optional open session.
pub struct Database {
    driver_name: String,
    driver: Driver,
    dsn: String,
    session: Option<Box<dyn Session>>,
}

impl Database {
    /// Creates a closed handle for a registered driver.
    pub fn new(
        registry: &DriverRegistry,
        driver_name: &str,
        dsn: impl Into<String>,
    ) -> Result<Self> {
        let driver = registry.get(driver_name)?.clone();
        Ok(Self {
            driver_name: driver_name.to_string(),
            driver,
            dsn: dsn.into(),
            session: None,
        })
    }

    /// Returns the driver name.
    #[must_use]
    pub fn driver_name(&self) -> &str {
        &self.driver_name
    }

    /// Returns the data source name.
    #[must_use]
    pub fn dsn(&self) -> &str {
        &self.dsn
    }

    /// Returns the driver's dialect.
    #[must_use]
    pub fn dialect(&self) -> &dyn Dialect {
        self.driver.dialect.as_ref()
    }

    /// Returns whether a session is held.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    /// Returns whether the session has an active transaction.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.in_transaction())
    }

    /// Connects through the driver.
    pub async fn open(&mut self) -> Result<()> {
        if self.session.is_some() {
            return Err(Error::AlreadyOpen);
        }
        let session = self.driver.connector.connect(&self.dsn).await?;
        info!(driver = %self.driver_name, "Database opened");
        self.session = Some(session);
        Ok(())
    }

    /// Uses an already connected session.
    pub fn attach(&mut self, session: Box<dyn Session>) -> Result<()> {
        if self.session.is_some() {
            return Err(Error::AlreadyOpen);
        }
        self.session = Some(session);
        Ok(())
    }

    /// Closes the session, rolling back an active transaction.
    pub async fn close(&mut self) -> Result<()> {
        let mut session = self.session.take().ok_or(Error::NotOpen)?;
        session.close().await?;
        info!(driver = %self.driver_name, "Database closed");
        Ok(())
    }

    fn session(&mut self) -> Result<&mut dyn Session> {
        match self.session.as_deref_mut() {
            Some(session) => Ok(session),
            None => Err(Error::NotOpen),
        }
    }

    fn parts(&mut self) -> Result<(&dyn Dialect, &mut dyn Session)> {
        let dialect = self.driver.dialect.as_ref();
        match self.session.as_deref_mut() {
            Some(session) => Ok((dialect, session)),
            None => Err(Error::NotOpen),
        }
    }

    /// Starts a transaction.
    pub async fn begin(&mut self) -> Result<()> {
        self.session()?.begin().await
    }

    /// Commits the active transaction.
    pub async fn commit(&mut self) -> Result<()> {
        self.session()?.commit().await
    }

    /// Rolls back the active transaction.
    pub async fn rollback(&mut self) -> Result<()> {
        self.session()?.rollback().await
    }

    /// Executes a statement, returning the affected row count.
    pub async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        self.session()?.execute(sql, params).await
    }

    /// Executes every `GO`-separated batch of a script in order.
    pub async fn execute_script(&mut self, script: &str) -> Result<u64> {
        let session = self.session()?;
        let mut affected = 0;
        for batch in split_batches(script) {
            affected += session.execute(batch, &[]).await?;
        }
        Ok(affected)
    }

    /// Executes every batch of a script but the last, then reads the last
    /// batch like [`Database::get_data`].
    pub async fn get_data_script(&mut self, script: &str) -> Result<DataTable> {
        let batches = split_batches(script);
        let Some((last, leading)) = batches.split_last() else {
            return Err(Error::EmptyScript);
        };
        let session = self.session()?;
        for batch in leading {
            session.execute(batch, &[]).await?;
        }
        self.get_data(last, &[]).await
    }

    /// Runs a query and returns its cursor.
    pub async fn query(&mut self, sql: &str, params: &[Value]) -> Result<Box<dyn Cursor>> {
        self.session()?.query(sql, params).await
    }

    /// Returns the first column of the first row.
    pub async fn query_one(&mut self, sql: &str, params: &[Value]) -> Result<Option<Value>> {
        self.session()?.query_one(sql, params).await
    }

    /// Returns whether a query yields at least one row.
    pub async fn exists(&mut self, sql: &str, params: &[Value]) -> Result<bool> {
        let mut cursor = self.session()?.query(sql, params).await?;
        let found = cursor.next_row().await?.is_some();
        cursor.close().await?;
        Ok(found)
    }

    /// Reads a query into a new store whose columns are derived from the
    /// result.
    pub async fn get_data(&mut self, sql: &str, params: &[Value]) -> Result<DataTable> {
        let mut cursor = self.session()?.query(sql, params).await?;
        let table = step::read_all(cursor.as_mut(), "result").await;
        cursor.close().await?;
        table
    }

    /// Appends the rows of a query to an existing store.
    pub async fn fill_table(
        &mut self,
        table: &mut DataTable,
        sql: &str,
        params: &[Value],
    ) -> Result<usize> {
        let mut cursor = self.session()?.query(sql, params).await?;
        let read = step::fill_table(cursor.as_mut(), table).await;
        cursor.close().await?;
        read
    }

    /// Opens a batched reader over a query.
    pub async fn step_table(
        &mut self,
        schema: Table,
        sql: &str,
        params: &[Value],
        step: usize,
    ) -> Result<StepTable> {
        let cursor = self.session()?.query(sql, params).await?;
        StepTable::new(cursor, schema, step)
    }

    /// Reads one keyset page into a store for `schema`.
    pub async fn fetch_page(&mut self, query: &KeysetQuery, schema: Table) -> Result<DataTable> {
        let (dialect, session) = self.parts()?;
        let built = query.build(dialect)?;
        debug!(table = %schema.name, sql = %built.sql, "Fetching page");
        let mut cursor = session.query(&built.sql, &built.params).await?;
        let mut table = DataTable::new(schema);
        let read = step::fill_table(cursor.as_mut(), &mut table).await;
        cursor.close().await?;
        read?;
        Ok(table)
    }

    /// Returns whether a table exists.
    pub async fn table_exists(&mut self, name: &str) -> Result<bool> {
        let (dialect, session) = self.parts()?;
        dialect.table_exists(session, name).await
    }

    /// Drops a table.
    pub async fn drop_table(&mut self, name: &str) -> Result<()> {
        let (dialect, session) = self.parts()?;
        dialect.drop_table(session, name).await?;
        info!(table = %name, "Dropped table");
        Ok(())
    }

    /// Loads the live definition of an existing table.
    pub async fn table(&mut self, name: &str) -> Result<Table> {
        let (dialect, session) = self.parts()?;
        dialect
            .load_table(session, name)
            .await?
            .ok_or_else(|| Error::TableNotFound(name.to_string()))
    }

    /// Converges `old` into `new`; `old` is `None` for a missing table.
    pub async fn reconcile(
        &mut self,
        old: Option<&Table>,
        new: &Table,
    ) -> Result<Vec<SchemaChange>> {
        let (dialect, session) = self.parts()?;
        reconcile::reconcile(dialect, session, old, new).await
    }

    /// Converges the live table, or its absence, into `new`.
    pub async fn sync_table(&mut self, new: &Table) -> Result<Vec<SchemaChange>> {
        let (dialect, session) = self.parts()?;
        let live = dialect.load_table(session, &new.name).await?;
        reconcile::reconcile(dialect, session, live.as_ref(), new).await
    }

    /// Flushes the pending changes of a store.
    pub async fn save_changes(&mut self, table: &DataTable) -> Result<u64> {
        let (dialect, session) = self.parts()?;
        persist::save_changes(dialect, session, table).await
    }

    /// Merges a relation into a table.
    pub async fn merge(&mut self, merge: &Merge) -> Result<u64> {
        let (dialect, session) = self.parts()?;
        let affected = dialect.merge(session, merge).await?;
        info!(dest = %merge.dest, source = %merge.source, affected, "Merged table");
        Ok(affected)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("driver", &self.driver_name)
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::keyset::SortKey;
    use crate::schema::Column;
    use crate::testing::{
        DialectCall, MemoryConnector, MemorySession, RecordingDialect, SessionCall, VecCursor,
    };
    use crate::value::ColumnType;

    fn registry(dialect: RecordingDialect) -> DriverRegistry {
        DriverRegistry::new()
            .with("memory", Driver::new(dialect, MemoryConnector))
            .unwrap()
    }

    fn database(dialect: RecordingDialect, dsn: &str) -> Database {
        Database::new(&registry(dialect), "memory", dsn).unwrap()
    }

    fn people() -> Table {
        Table::new("people")
            .column(Column::new("id", ColumnType::Int64).not_null())
            .column(Column::new("name", ColumnType::String))
            .primary_key(["id"])
    }

    #[test]
    fn test_unknown_driver() {
        let result = Database::new(&DriverRegistry::new(), "memory", "");
        assert!(matches!(result, Err(Error::UnknownDriver(_))));
    }

    #[tokio::test]
    async fn test_open_close_lifecycle() {
        let mut db = database(RecordingDialect::new(), "mem://");
        assert!(matches!(db.execute("select 1", &[]).await, Err(Error::NotOpen)));
        assert!(matches!(db.close().await, Err(Error::NotOpen)));

        db.open().await.unwrap();
        assert!(db.is_open());
        assert!(matches!(db.open().await, Err(Error::AlreadyOpen)));

        db.begin().await.unwrap();
        assert!(db.in_transaction());
        assert!(matches!(db.begin().await, Err(Error::TransactionActive)));
        db.rollback().await.unwrap();
        assert!(matches!(db.commit().await, Err(Error::NoTransaction)));

        db.close().await.unwrap();
        assert!(!db.is_open());
        assert!(matches!(db.table("people").await, Err(Error::NotOpen)));
    }

    #[tokio::test]
    async fn test_execute_script_runs_batches() {
        let mut db = database(RecordingDialect::new(), "");
        let session = MemorySession::new();
        let log = session.log();
        db.attach(Box::new(session)).unwrap();

        let affected = db
            .execute_script("insert into a values (1)\nGO\ninsert into a values (2)\n")
            .await
            .unwrap();
        assert_eq!(affected, 2);
        let executed: Vec<String> = log
            .lock()
            .unwrap()
            .iter()
            .filter_map(|call| match call {
                SessionCall::Execute(sql, _) => Some(sql.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(
            executed,
            ["insert into a values (1)", "insert into a values (2)"]
        );
    }

    #[tokio::test]
    async fn test_get_data_script_reads_last_batch() {
        let mut db = database(RecordingDialect::new(), "");
        let rows = vec![vec![Value::Int64(1)], vec![Value::Int64(2)]];
        let session = MemorySession::new().with_result(VecCursor::new(["id"], rows));
        let log = session.log();
        db.attach(Box::new(session)).unwrap();

        let script = "create table a (id int)\nGO\ninsert into a values (1)\nGO\nselect id from a";
        let data = db.get_data_script(script).await.unwrap();
        assert_eq!(data.row_count(), 2);
        assert_eq!(
            *log.lock().unwrap(),
            [
                SessionCall::Execute("create table a (id int)".into(), Vec::new()),
                SessionCall::Execute("insert into a values (1)".into(), Vec::new()),
                SessionCall::Query("select id from a".into()),
            ]
        );

        let empty = db.get_data_script("\nGO\n").await;
        assert!(matches!(empty, Err(Error::EmptyScript)));
    }

    #[tokio::test]
    async fn test_reads() {
        let mut db = database(RecordingDialect::new(), "");
        let cursor = VecCursor::new(["n"], vec![vec![Value::Int64(42)]]);
        let closes = cursor.close_counter();
        let rows = vec![
            vec![Value::Int64(1), "ann".into()],
            vec![Value::Int64(2), Value::Null],
        ];
        let session = MemorySession::new()
            .with_result(cursor)
            .with_result(VecCursor::new(["n"], Vec::new()))
            .with_result(VecCursor::new(["id", "name"], rows));
        db.attach(Box::new(session)).unwrap();

        assert_eq!(
            db.query_one("select 42", &[]).await.unwrap(),
            Some(Value::Int64(42))
        );
        assert_eq!(closes.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert!(!db.exists("select 1 where 0", &[]).await.unwrap());

        let data = db
            .get_data("select id, name from people", &[])
            .await
            .unwrap();
        assert_eq!(data.row_count(), 2);
        assert_eq!(
            data.schema().get_column("id").unwrap().data_type,
            ColumnType::Int64
        );
    }

    #[tokio::test]
    async fn test_fetch_page_and_last_seen() {
        let mut db = database(RecordingDialect::new(), "");
        let rows = vec![
            vec![Value::Int64(6), "fay".into()],
            vec![Value::Int64(7), "gus".into()],
        ];
        let session = MemorySession::new().with_result(VecCursor::new(["id", "name"], rows));
        let log = session.log();
        db.attach(Box::new(session)).unwrap();

        let mut after = HashMap::new();
        after.insert("id".to_string(), Value::Int64(5));
        let query = KeysetQuery::table("people")
            .order_by(SortKey::asc("id"))
            .after(after)
            .limit(2);
        let page = db.fetch_page(&query, people()).await.unwrap();
        assert_eq!(page.row_count(), 2);
        let expected = concat!(
            r#"SELECT * FROM (SELECT * FROM "people") AS page "#,
            r#"WHERE ("id" > ?1) ORDER BY "id" ASC LIMIT 2"#
        );
        let query_call = SessionCall::Query(expected.to_string());
        assert!(log.lock().unwrap().contains(&query_call));

        let next = query.last_seen(&page).unwrap();
        assert_eq!(next["id"], Value::Int64(7));
    }

    #[tokio::test]
    async fn test_sync_table_uses_live_definition() {
        let live = people();
        let dialect = RecordingDialect::new().with_live(live);
        let calls = dialect.clone();
        let mut db = database(dialect, "");
        db.open().await.unwrap();

        let loaded = db.table("people").await.unwrap();
        assert_eq!(loaded.column_names(), ["id", "name"]);
        assert!(matches!(db.table("other").await, Err(Error::TableNotFound(_))));

        let desired = people().column(Column::new("email", ColumnType::String));
        let applied = db.sync_table(&desired).await.unwrap();
        assert_eq!(applied.len(), 1);
        assert_eq!(calls.calls(), vec![DialectCall::AddColumn("email".into())]);

        let fresh = Table::new("audit").column(Column::new("at", ColumnType::Timestamp));
        db.sync_table(&fresh).await.unwrap();
        assert_eq!(
            calls.calls().last(),
            Some(&DialectCall::CreateTable("audit".into()))
        );

        db.merge(&Merge::new("people", "people_stage").key_columns(["id"]))
            .await
            .unwrap();
        assert_eq!(
            calls.calls().last(),
            Some(&DialectCall::Merge("people".into()))
        );
    }
}
