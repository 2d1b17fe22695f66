pub mod snapshot;

use super::*;
use crate::config::{SqlSource, DEFAULT_SQL_TABLE, DEFAULT_TIME_COLUMN};
use arrow::array::{Array, AsArray};
use arrow::datatypes::Float64Type;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const SECOND: i64 = 1_000_000_000;

pub fn at(seconds: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(seconds, 0).unwrap()
}

pub fn seconds_of(dataset: &Dataset) -> Vec<i64> {
    dataset.timestamps().values().iter().map(|ns| ns / SECOND).collect()
}

pub fn f64_column(dataset: &Dataset, name: &str) -> Vec<Option<f64>> {
    dataset
        .column(name)
        .unwrap()
        .as_primitive::<Float64Type>()
        .iter()
        .collect()
}

/// SQLite file holding `underway_summary` rows of (epoch seconds, ph_total).
pub fn sqlite_fixture(rows: &[(i64, Option<f64>)]) -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("locness.db");
    let conn = Connection::open(&path).unwrap();
    conn.execute(
        "CREATE TABLE underway_summary (datetime_utc INTEGER, ph_total REAL, temp REAL)",
        [],
    )
    .unwrap();
    for (secs, ph) in rows {
        conn.execute(
            "INSERT INTO underway_summary (datetime_utc, ph_total, temp) VALUES (?1, ?2, ?3)",
            rusqlite::params![secs, ph, 12.5],
        )
        .unwrap();
    }
    (dir, path)
}

pub fn append_sqlite_row(path: &Path, secs: i64, ph: f64) {
    let conn = Connection::open(path).unwrap();
    conn.execute(
        "INSERT INTO underway_summary (datetime_utc, ph_total, temp) VALUES (?1, ?2, ?3)",
        rusqlite::params![secs, ph, 12.5],
    )
    .unwrap();
}

pub fn sql_backend(path: &Path) -> SqlBackend {
    SqlBackend::new(SqlSource {
        path: path.to_path_buf(),
        table: DEFAULT_SQL_TABLE.to_string(),
        time_column: DEFAULT_TIME_COLUMN.to_string(),
    })
}

pub fn null_count(dataset: &Dataset, name: &str) -> usize {
    dataset.column(name).unwrap().null_count()
}
