#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use oxide_reconcile::prelude::*;

pub async fn open(dsn: &str) -> Database {
    let registry = oxide_reconcile_sqlite::registry().unwrap();
    let mut db = Database::new(&registry, oxide_reconcile_sqlite::DRIVER_NAME, dsn).unwrap();
    db.open()
        .await
        .unwrap_or_else(|e| panic!("Failed to open {dsn}: {e}"));
    db
}

pub async fn open_memory() -> Database {
    open("sqlite::memory:").await
}

pub fn people() -> Table {
    Table::new("people")
        .column(Column::new("id", ColumnType::Int64).not_null())
        .column(Column::new("name", ColumnType::String).max_size(20))
        .column(Column::new("active", ColumnType::Bool))
        .column(Column::new("joined", ColumnType::Timestamp))
        .primary_key(["id"])
        .index("idx_people_name", Index::new(["name"]))
}

pub fn joined(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, day, 9, 30, 0).unwrap()
}

pub fn person(id: i64, name: &str) -> Vec<Value> {
    vec![
        Value::Int64(id),
        name.into(),
        Value::Bool(id % 2 == 1),
        joined(u32::try_from(id).unwrap()).into(),
    ]
}

/// Creates `people` and stores the given rows.
pub async fn seed(db: &mut Database, rows: &[(i64, &str)]) -> DataTable {
    db.sync_table(&people()).await.unwrap();
    let mut table = DataTable::new(people());
    for (id, name) in rows {
        table.add_values(person(*id, name)).unwrap();
    }
    db.save_changes(&table).await.unwrap();
    table.accept_change();
    table
}

pub async fn count(db: &mut Database, table: &str) -> i64 {
    match db
        .query_one(&format!("SELECT COUNT(*) FROM \"{table}\""), &[])
        .await
        .unwrap()
    {
        Some(Value::Int64(n)) => n,
        other => panic!("Expected a count, got {other:?}"),
    }
}

pub async fn column(db: &mut Database, sql: &str) -> Vec<Value> {
    let data = db.get_data(sql, &[]).await.unwrap();
    data.rows().iter().map(|r| r.values()[0].clone()).collect()
}
