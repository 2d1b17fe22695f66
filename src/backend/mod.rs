//! Backend adapters: one load/fetch contract over three stores.
//!
//! - `sql`: a SQLite table with an integer epoch time column
//! - `snapshot`: a Parquet or Arrow IPC file, re-read in full on every call
//! - `nosql`: a managed key/range table behind [`TableClient`]
//!
//! Every adapter hands back normalized, sorted, deduplicated datasets that
//! contain only rows newer than the requested watermark.

use std::fmt;

use chrono::{DateTime, Utc};

use crate::config::BackendDescriptor;
use crate::storage::{Dataset, Error};

mod nosql;
mod snapshot;
mod sql;

#[cfg(test)]
mod tests;

pub use nosql::{
    AttributeValue, ClientError, Item, KeyCondition, MemoryTableClient, NoSqlBackend, Page,
    TableClient,
};
#[cfg(feature = "dynamodb")]
pub use nosql::DynamoTableClient;
pub use snapshot::SnapshotBackend;
pub use sql::SqlBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Sql,
    SnapshotFile,
    NoSql,
}

impl BackendKind {
    /// False when a fetch re-reads the whole source and filters client-side.
    pub fn supports_incremental_fetch(self) -> bool {
        !matches!(self, BackendKind::SnapshotFile)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackendKind::Sql => "sql",
            BackendKind::SnapshotFile => "snapshot-file",
            BackendKind::NoSql => "nosql",
        };
        f.write_str(name)
    }
}

pub trait Backend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Every record the store holds.
    fn load_all(&self) -> Result<Dataset, Error>;

    /// Records strictly newer than `watermark`; empty when nothing is new.
    fn fetch_since(&self, watermark: DateTime<Utc>) -> Result<Dataset, Error>;
}

/// The backend selected by a [`BackendDescriptor`].
pub enum BackendAdapter {
    Sql(SqlBackend),
    SnapshotFile(SnapshotBackend),
    NoSql(NoSqlBackend),
}

impl BackendAdapter {
    pub fn open(descriptor: &BackendDescriptor) -> Result<Self, Error> {
        let adapter = match descriptor {
            BackendDescriptor::Sql(source) => BackendAdapter::Sql(SqlBackend::new(source.clone())),
            BackendDescriptor::SnapshotFile(source) => {
                BackendAdapter::SnapshotFile(SnapshotBackend::new(source.clone()))
            }
            BackendDescriptor::NoSql(source) => BackendAdapter::NoSql(open_managed_table(source)?),
        };
        log::info!("Opened {} backend", adapter.kind());
        Ok(adapter)
    }
}

#[cfg(feature = "dynamodb")]
fn open_managed_table(source: &crate::config::NoSqlSource) -> Result<NoSqlBackend, Error> {
    let client = DynamoTableClient::connect(&source.table_name, &source.region)?;
    Ok(NoSqlBackend::new(Box::new(client), source.clone()))
}

#[cfg(not(feature = "dynamodb"))]
fn open_managed_table(source: &crate::config::NoSqlSource) -> Result<NoSqlBackend, Error> {
    Err(Error::BackendUnavailable(format!(
        "table {} in {}: built without the dynamodb feature",
        source.table_name, source.region
    )))
}

impl Backend for BackendAdapter {
    fn kind(&self) -> BackendKind {
        match self {
            BackendAdapter::Sql(b) => b.kind(),
            BackendAdapter::SnapshotFile(b) => b.kind(),
            BackendAdapter::NoSql(b) => b.kind(),
        }
    }

    fn load_all(&self) -> Result<Dataset, Error> {
        match self {
            BackendAdapter::Sql(b) => b.load_all(),
            BackendAdapter::SnapshotFile(b) => b.load_all(),
            BackendAdapter::NoSql(b) => b.load_all(),
        }
    }

    fn fetch_since(&self, watermark: DateTime<Utc>) -> Result<Dataset, Error> {
        match self {
            BackendAdapter::Sql(b) => b.fetch_since(watermark),
            BackendAdapter::SnapshotFile(b) => b.fetch_since(watermark),
            BackendAdapter::NoSql(b) => b.fetch_since(watermark),
        }
    }
}
