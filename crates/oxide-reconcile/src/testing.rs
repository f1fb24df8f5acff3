//! In-memory dialect and session doubles that record every call.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::desc::Desc;
use crate::dialect::{Dialect, Merge, TableIndex};
use crate::error::{Error, Result};
use crate::registry::Connector;
use crate::schema::{Column, Index, Table};
use crate::session::{Cursor, Session, Statement};
use crate::value::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialectCall {
    CreateTable(String),
    DropTable(String),
    AddColumn(String),
    DropColumn(String),
    AlterColumn { old: String, new: String },
    AddPrimaryKey(Vec<String>),
    DropPrimaryKey,
    CreateIndex(String),
    DropIndex(String),
    AlterIndex(String),
    AlterTableDesc,
    Merge(String),
}

/// Clones share the call log.
#[derive(Debug, Clone, Default)]
pub struct RecordingDialect {
    calls: Arc<Mutex<Vec<DialectCall>>>,
    fail_on: Option<DialectCall>,
    live: Option<Table>,
}

impl RecordingDialect {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(mut self, call: DialectCall) -> Self {
        self.fail_on = Some(call);
        self
    }

    pub fn with_live(mut self, table: Table) -> Self {
        self.live = Some(table);
        self
    }

    pub fn calls(&self) -> Vec<DialectCall> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: DialectCall) -> Result<()> {
        let failed = self.fail_on.as_ref() == Some(&call);
        self.calls.lock().unwrap().push(call);
        if failed {
            return Err(Error::driver("injected failure"));
        }
        Ok(())
    }

    fn live(&self, table: &str) -> Result<&Table> {
        self.live
            .as_ref()
            .filter(|t| t.name == table)
            .ok_or_else(|| Error::TableNotFound(table.to_string()))
    }
}

#[async_trait]
impl Dialect for RecordingDialect {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn placeholder(&self, ordinal: usize) -> String {
        format!("?{ordinal}")
    }

    fn regex_like(&self, value: &str, pattern: &str) -> String {
        format!("{value} REGEXP {pattern}")
    }

    async fn table_exists(&self, _session: &mut dyn Session, table: &str) -> Result<bool> {
        Ok(self.live.as_ref().is_some_and(|t| t.name == table))
    }

    async fn get_table_desc(&self, _session: &mut dyn Session, table: &str) -> Result<Desc> {
        Ok(self.live(table)?.desc.clone())
    }

    async fn get_columns(&self, _session: &mut dyn Session, table: &str) -> Result<Vec<Column>> {
        Ok(self.live(table)?.columns().cloned().collect())
    }

    async fn get_primary_keys(
        &self,
        _session: &mut dyn Session,
        table: &str,
    ) -> Result<Vec<String>> {
        Ok(self.live(table)?.primary_keys().to_vec())
    }

    async fn get_indexes(
        &self,
        _session: &mut dyn Session,
        table: &str,
    ) -> Result<Vec<TableIndex>> {
        Ok(self
            .live(table)?
            .indexes
            .iter()
            .map(|(name, index)| TableIndex {
                name: name.clone(),
                index: index.clone(),
            })
            .collect())
    }

    async fn create_table(&self, _session: &mut dyn Session, table: &Table) -> Result<()> {
        self.record(DialectCall::CreateTable(table.name.clone()))
    }

    async fn drop_table(&self, _session: &mut dyn Session, table: &str) -> Result<()> {
        self.record(DialectCall::DropTable(table.to_string()))
    }

    async fn add_column(
        &self,
        _session: &mut dyn Session,
        _table: &str,
        column: &Column,
    ) -> Result<()> {
        self.record(DialectCall::AddColumn(column.name.clone()))
    }

    async fn drop_column(
        &self,
        _session: &mut dyn Session,
        _table: &str,
        column: &str,
    ) -> Result<()> {
        self.record(DialectCall::DropColumn(column.to_string()))
    }

    async fn alter_column(
        &self,
        _session: &mut dyn Session,
        _table: &str,
        old: &Column,
        new: &Column,
    ) -> Result<()> {
        self.record(DialectCall::AlterColumn {
            old: old.name.clone(),
            new: new.name.clone(),
        })
    }

    async fn add_primary_key(
        &self,
        _session: &mut dyn Session,
        _table: &str,
        columns: &[String],
    ) -> Result<()> {
        self.record(DialectCall::AddPrimaryKey(columns.to_vec()))
    }

    async fn drop_primary_key(&self, _session: &mut dyn Session, _table: &str) -> Result<()> {
        self.record(DialectCall::DropPrimaryKey)
    }

    async fn create_index(
        &self,
        _session: &mut dyn Session,
        _table: &str,
        name: &str,
        _index: &Index,
    ) -> Result<()> {
        self.record(DialectCall::CreateIndex(name.to_string()))
    }

    async fn drop_index(&self, _session: &mut dyn Session, _table: &str, name: &str) -> Result<()> {
        self.record(DialectCall::DropIndex(name.to_string()))
    }

    async fn alter_index(
        &self,
        _session: &mut dyn Session,
        _table: &str,
        name: &str,
        _old: &Index,
        _new: &Index,
    ) -> Result<()> {
        self.record(DialectCall::AlterIndex(name.to_string()))
    }

    async fn alter_table_desc(
        &self,
        _session: &mut dyn Session,
        _table: &str,
        _desc: &Desc,
    ) -> Result<()> {
        self.record(DialectCall::AlterTableDesc)
    }

    async fn merge(&self, _session: &mut dyn Session, merge: &Merge) -> Result<u64> {
        self.record(DialectCall::Merge(merge.dest.clone()))?;
        Ok(0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionCall {
    Begin,
    Commit,
    Rollback,
    Prepare(String),
    Execute(String, Vec<Value>),
    Query(String),
    Close,
}

#[derive(Debug)]
pub struct MemorySession {
    log: Arc<Mutex<Vec<SessionCall>>>,
    in_tx: bool,
    fail_on: Option<String>,
    affected: u64,
    results: VecDeque<VecCursor>,
}

impl Default for MemorySession {
    fn default() -> Self {
        Self {
            log: Arc::default(),
            in_tx: false,
            fail_on: None,
            affected: 1,
            results: VecDeque::new(),
        }
    }
}

impl MemorySession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails every execution whose statement contains `fragment`.
    pub fn failing_on(mut self, fragment: &str) -> Self {
        self.fail_on = Some(fragment.to_string());
        self
    }


    pub fn with_result(mut self, cursor: VecCursor) -> Self {
        self.results.push_back(cursor);
        self
    }

    pub fn log(&self) -> Arc<Mutex<Vec<SessionCall>>> {
        Arc::clone(&self.log)
    }

    fn push(&self, call: SessionCall) {
        self.log.lock().unwrap().push(call);
    }
}

#[async_trait]
impl Session for MemorySession {
    fn in_transaction(&self) -> bool {
        self.in_tx
    }

    async fn begin(&mut self) -> Result<()> {
        if self.in_tx {
            return Err(Error::TransactionActive);
        }
        self.push(SessionCall::Begin);
        self.in_tx = true;
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        if !self.in_tx {
            return Err(Error::NoTransaction);
        }
        self.push(SessionCall::Commit);
        self.in_tx = false;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        if !self.in_tx {
            return Err(Error::NoTransaction);
        }
        self.push(SessionCall::Rollback);
        self.in_tx = false;
        Ok(())
    }

    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        self.push(SessionCall::Execute(sql.to_string(), params.to_vec()));
        if self.fail_on.as_deref().is_some_and(|f| sql.contains(f)) {
            return Err(Error::statement(sql, params, "injected failure"));
        }
        Ok(self.affected)
    }

    async fn prepare(&mut self, sql: &str) -> Result<Statement> {
        self.push(SessionCall::Prepare(sql.to_string()));
        Ok(Statement::new(sql))
    }

    async fn query(&mut self, sql: &str, _params: &[Value]) -> Result<Box<dyn Cursor>> {
        self.push(SessionCall::Query(sql.to_string()));
        let cursor = self
            .results
            .pop_front()
            .unwrap_or_else(|| VecCursor::new(Vec::<String>::new(), Vec::new()));
        Ok(Box::new(cursor))
    }

    async fn close(&mut self) -> Result<()> {
        self.push(SessionCall::Close);
        self.in_tx = false;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MemoryConnector;

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, _dsn: &str) -> Result<Box<dyn Session>> {
        Ok(Box::new(MemorySession::new()))
    }
}

#[derive(Debug)]
pub struct VecCursor {
    columns: Vec<String>,
    rows: VecDeque<Vec<Value>>,
    closed: bool,
    closes: Arc<AtomicUsize>,
}

impl VecCursor {
    pub fn new<S: Into<String>>(
        columns: impl IntoIterator<Item = S>,
        rows: Vec<Vec<Value>>,
    ) -> Self {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: rows.into(),
            closed: false,
            closes: Arc::default(),
        }
    }

    /// Counter incremented each time the cursor is actually released.
    pub fn close_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.closes)
    }
}

#[async_trait]
impl Cursor for VecCursor {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    async fn next_row(&mut self) -> Result<Option<Vec<Value>>> {
        Ok(self.rows.pop_front())
    }

    async fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}
