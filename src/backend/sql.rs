use chrono::{DateTime, Utc};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use sqlparser::ast::Ident;

use super::{Backend, BackendKind};
use crate::config::SqlSource;
use crate::normalize::{RawTable, RawValue};
use crate::storage::{Dataset, Error};

/// Reads a SQLite table whose time column holds epoch seconds.
///
/// A fresh read-only connection is opened per call so a file that was
/// replaced or briefly locked recovers on the next tick.
pub struct SqlBackend {
    source: SqlSource,
}

impl SqlBackend {
    pub fn new(source: SqlSource) -> Self {
        Self { source }
    }

    fn connect(&self) -> Result<Connection, Error> {
        Connection::open_with_flags(
            &self.source.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| {
            Error::BackendUnavailable(format!("{}: {e}", self.source.path.display()))
        })
    }

    fn select_sql(&self, incremental: bool) -> String {
        let table = Ident::with_quote('"', self.source.table.as_str());
        let time = Ident::with_quote('"', self.source.time_column.as_str());
        if incremental {
            format!("SELECT * FROM {table} WHERE {time} > ?1 ORDER BY {time}")
        } else {
            format!("SELECT * FROM {table} ORDER BY {time}")
        }
    }

    fn read(&self, after: Option<DateTime<Utc>>) -> Result<Dataset, Error> {
        let conn = self.connect()?;
        let sql = self.select_sql(after.is_some());
        let mut stmt = conn.prepare(&sql).map_err(|e| self.map_err(e))?;

        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        if !columns.iter().any(|c| c == &self.source.time_column) {
            return Err(Error::SchemaMismatch(format!(
                "table {} has no {} column",
                self.source.table, self.source.time_column
            )));
        }

        let mut table = RawTable::new(columns);
        let width = table.columns.len();
        let mut rows = match after {
            Some(watermark) => stmt.query([watermark.timestamp()]),
            None => stmt.query([]),
        }
        .map_err(|e| self.map_err(e))?;

        while let Some(row) = rows.next().map_err(|e| self.map_err(e))? {
            let mut values = Vec::with_capacity(width);
            for idx in 0..width {
                let value = row.get_ref(idx).map_err(|e| self.map_err(e))?;
                values.push(raw_value(value));
            }
            table.push_row(values);
        }

        let fetched = table.len();
        let dataset = table.into_dataset(&self.source.time_column)?;
        log::debug!("SQL read of {}: {} rows", self.source.table, fetched);

        // The query compares whole seconds; re-filter against the exact watermark.
        match after {
            Some(watermark) => dataset.filter_after(watermark),
            None => Ok(dataset),
        }
    }

    fn map_err(&self, err: rusqlite::Error) -> Error {
        match &err {
            rusqlite::Error::SqliteFailure(_, Some(msg))
                if msg.starts_with("no such table") || msg.starts_with("no such column") =>
            {
                Error::SchemaMismatch(format!("{}: {msg}", self.source.table))
            }
            _ => Error::BackendUnavailable(format!("{}: {err}", self.source.path.display())),
        }
    }
}

fn raw_value(value: ValueRef<'_>) -> RawValue {
    match value {
        ValueRef::Null => RawValue::Null,
        ValueRef::Integer(i) => RawValue::Integer(i),
        ValueRef::Real(f) => RawValue::Real(f),
        ValueRef::Text(bytes) => RawValue::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(_) => RawValue::Null,
    }
}

impl Backend for SqlBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Sql
    }

    fn load_all(&self) -> Result<Dataset, Error> {
        self.read(None)
    }

    fn fetch_since(&self, watermark: DateTime<Utc>) -> Result<Dataset, Error> {
        self.read(Some(watermark))
    }
}
