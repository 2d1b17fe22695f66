use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::{Backend, BackendKind};
use crate::config::{NoSqlSource, SortKeyEncoding};
use crate::normalize::{RawTable, RawValue};
use crate::storage::{Dataset, Error};

#[cfg(feature = "dynamodb")]
mod dynamo;
mod memory;

#[cfg(feature = "dynamodb")]
pub use dynamo::DynamoTableClient;
pub use memory::MemoryTableClient;

/// Attribute value as stored in a key/range table.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    /// Number, carried as its arbitrary-precision decimal string.
    N(String),
    S(String),
    Bool(bool),
    Null,
}

impl AttributeValue {
    /// Ordering used by sort-key conditions: numbers numerically, strings
    /// lexically, mixed types never compare.
    pub fn partial_cmp_key(&self, other: &AttributeValue) -> Option<std::cmp::Ordering> {
        match (self, other) {
            (AttributeValue::N(a), AttributeValue::N(b)) => {
                let a: f64 = a.trim().parse().ok()?;
                let b: f64 = b.trim().parse().ok()?;
                a.partial_cmp(&b)
            }
            (AttributeValue::S(a), AttributeValue::S(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl From<&AttributeValue> for RawValue {
    fn from(value: &AttributeValue) -> Self {
        match value {
            AttributeValue::N(n) => RawValue::Number(n.clone()),
            AttributeValue::S(s) => RawValue::Text(s.clone()),
            AttributeValue::Bool(b) => RawValue::Bool(*b),
            AttributeValue::Null => RawValue::Null,
        }
    }
}

pub type Item = BTreeMap<String, AttributeValue>;

/// One page of a query or scan.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub items: Vec<Item>,
    /// Continuation key; `None` once the last page was returned.
    pub last_evaluated_key: Option<Item>,
}

/// `partition_key = partition_value [AND sort_key > after]`
#[derive(Debug, Clone, PartialEq)]
pub struct KeyCondition {
    pub partition_key: String,
    pub partition_value: String,
    pub sort_key: String,
    pub after: Option<AttributeValue>,
}

impl KeyCondition {
    /// Evaluates the condition against an item, as a scan filter would.
    pub fn matches(&self, item: &Item) -> bool {
        let partition_ok = matches!(
            item.get(&self.partition_key),
            Some(AttributeValue::S(v)) if *v == self.partition_value
        );
        let sort_ok = match &self.after {
            None => true,
            Some(after) => item
                .get(&self.sort_key)
                .and_then(|v| v.partial_cmp_key(after))
                .is_some_and(|o| o.is_gt()),
        };
        partition_ok && sort_ok
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClientError {
    /// The table's key schema does not support the requested key condition.
    KeySchemaMismatch(String),
    Unavailable(String),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::KeySchemaMismatch(msg) => write!(f, "key schema mismatch: {msg}"),
            ClientError::Unavailable(msg) => write!(f, "table unavailable: {msg}"),
        }
    }
}

impl From<ClientError> for Error {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::KeySchemaMismatch(msg) => Error::SchemaMismatch(msg),
            ClientError::Unavailable(msg) => Error::BackendUnavailable(msg),
        }
    }
}

/// Page-at-a-time access to a managed key/range table.
pub trait TableClient: Send + Sync {
    /// Indexed range query; results are ordered by sort key.
    fn query_page(&self, condition: &KeyCondition, start_key: Option<&Item>) -> Result<Page, ClientError>;

    /// Unindexed full-table scan filtered by `condition`; unordered.
    fn scan_page(&self, condition: &KeyCondition, start_key: Option<&Item>) -> Result<Page, ClientError>;
}

impl<T: TableClient + ?Sized> TableClient for Arc<T> {
    fn query_page(&self, condition: &KeyCondition, start_key: Option<&Item>) -> Result<Page, ClientError> {
        (**self).query_page(condition, start_key)
    }

    fn scan_page(&self, condition: &KeyCondition, start_key: Option<&Item>) -> Result<Page, ClientError> {
        (**self).scan_page(condition, start_key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadPath {
    Query,
    Scan,
}

/// Reads the fixed partition of a managed table, preferring the indexed
/// range query and degrading to a filtered scan when the key schema does
/// not fit. Both paths share normalization, sorting and re-filtering.
pub struct NoSqlBackend {
    client: Box<dyn TableClient>,
    source: NoSqlSource,
}

impl NoSqlBackend {
    pub fn new(client: Box<dyn TableClient>, source: NoSqlSource) -> Self {
        Self { client, source }
    }

    fn condition(&self, after: Option<DateTime<Utc>>) -> KeyCondition {
        KeyCondition {
            partition_key: self.source.partition_key.clone(),
            partition_value: self.source.partition_value.clone(),
            sort_key: self.source.sort_key.clone(),
            after: after.map(|w| self.encode_sort_key(w)),
        }
    }

    /// Lower bound for the key condition. Both encodings round down to the
    /// whole second so no stored key newer than `watermark` compares below
    /// it; `filter_after` trims the rest of that second afterwards.
    fn encode_sort_key(&self, watermark: DateTime<Utc>) -> AttributeValue {
        match self.source.sort_key_encoding {
            SortKeyEncoding::EpochSeconds => AttributeValue::N(watermark.timestamp().to_string()),
            // No zone suffix: "12:00:00" sorts before "12:00:00Z" and "12:00:00.5Z".
            SortKeyEncoding::Iso8601 => {
                AttributeValue::S(watermark.format("%Y-%m-%dT%H:%M:%S").to_string())
            }
        }
    }

    fn collect(&self, path: ReadPath, condition: &KeyCondition) -> Result<Vec<Item>, ClientError> {
        let mut items = Vec::new();
        let mut start_key: Option<Item> = None;
        let mut pages = 0usize;

        loop {
            let page = match path {
                ReadPath::Query => self.client.query_page(condition, start_key.as_ref())?,
                ReadPath::Scan => self.client.scan_page(condition, start_key.as_ref())?,
            };
            pages += 1;
            items.extend(page.items);

            match page.last_evaluated_key {
                None => break,
                // Query pages arrive in sort-key order, so stopping early only
                // defers the remainder to the next tick.
                Some(_) if path == ReadPath::Query && pages >= self.source.max_pages => {
                    log::warn!(
                        "Page budget of {} exhausted on {}; remaining items deferred",
                        self.source.max_pages,
                        self.source.table_name
                    );
                    break;
                }
                Some(key) => start_key = Some(key),
            }
        }

        log::debug!("{:?} on {}: {} items in {} pages", path, self.source.table_name, items.len(), pages);
        Ok(items)
    }

    fn read(&self, after: Option<DateTime<Utc>>) -> Result<Dataset, Error> {
        let condition = self.condition(after);
        let items = match self.collect(ReadPath::Query, &condition) {
            Ok(items) => items,
            Err(ClientError::KeySchemaMismatch(reason)) => {
                log::warn!(
                    "Range query on {} rejected ({}); falling back to a full table scan",
                    self.source.table_name,
                    reason
                );
                self.collect(ReadPath::Scan, &condition)?
            }
            Err(err) => return Err(err.into()),
        };

        let rows = items
            .iter()
            .map(|item| item.iter().map(|(k, v)| (k.clone(), RawValue::from(v))).collect())
            .collect();
        let dataset = RawTable::from_items(rows).into_dataset(&self.source.sort_key)?;

        match after {
            Some(watermark) => dataset.filter_after(watermark),
            None => Ok(dataset),
        }
    }
}

impl Backend for NoSqlBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::NoSql
    }

    fn load_all(&self) -> Result<Dataset, Error> {
        self.read(None)
    }

    fn fetch_since(&self, watermark: DateTime<Utc>) -> Result<Dataset, Error> {
        self.read(Some(watermark))
    }
}
