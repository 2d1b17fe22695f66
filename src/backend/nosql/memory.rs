use std::cmp::Ordering;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering as AtomicOrdering};

use parking_lot::RwLock;

use super::{ClientError, Item, KeyCondition, Page, TableClient};

/// In-process key/range table.
///
/// Behaves like the managed service where the adapter can observe it:
/// queries are only accepted when the condition names the table's own key
/// attributes, query pages come back in sort-key order, and scans page over
/// the raw table before the filter is applied. Used by tests, benchmarks and
/// local demos.
pub struct MemoryTableClient {
    partition_key: String,
    sort_key: Option<String>,
    page_size: usize,
    items: RwLock<Vec<Item>>,
    available: AtomicBool,
    query_calls: AtomicUsize,
    scan_calls: AtomicUsize,
}

impl MemoryTableClient {
    pub fn new(partition_key: impl Into<String>, sort_key: Option<&str>) -> Self {
        Self {
            partition_key: partition_key.into(),
            sort_key: sort_key.map(String::from),
            page_size: 1000,
            items: RwLock::new(Vec::new()),
            available: AtomicBool::new(true),
            query_calls: AtomicUsize::new(0),
            scan_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn insert(&self, item: Item) {
        self.items.write().push(item);
    }

    pub fn extend(&self, items: impl IntoIterator<Item = Item>) {
        self.items.write().extend(items);
    }

    /// While unavailable every call fails as a network error would.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, AtomicOrdering::SeqCst);
    }

    /// Number of query pages requested so far.
    pub fn query_calls(&self) -> usize {
        self.query_calls.load(AtomicOrdering::SeqCst)
    }

    /// Number of scan pages requested so far.
    pub fn scan_calls(&self) -> usize {
        self.scan_calls.load(AtomicOrdering::SeqCst)
    }

    fn check_available(&self) -> Result<(), ClientError> {
        if self.available.load(AtomicOrdering::SeqCst) {
            Ok(())
        } else {
            Err(ClientError::Unavailable("connection refused".to_string()))
        }
    }

    fn key_of(&self, item: &Item) -> Item {
        item.iter()
            .filter(|(name, _)| {
                **name == self.partition_key || self.sort_key.as_deref() == Some(name.as_str())
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Splits `candidates` into the page that follows `start_key`.
    fn page_after(&self, candidates: Vec<Item>, start_key: Option<&Item>) -> (Vec<Item>, Option<Item>) {
        let offset = match start_key {
            None => 0,
            Some(key) => match candidates.iter().position(|item| self.key_of(item) == *key) {
                Some(idx) => idx + 1,
                None => return (Vec::new(), None),
            },
        };
        let remaining = candidates.len().saturating_sub(offset);
        let page: Vec<Item> = candidates.into_iter().skip(offset).take(self.page_size).collect();
        let last_key = if remaining > page.len() {
            page.last().map(|item| self.key_of(item))
        } else {
            None
        };
        (page, last_key)
    }
}

impl TableClient for MemoryTableClient {
    fn query_page(&self, condition: &KeyCondition, start_key: Option<&Item>) -> Result<Page, ClientError> {
        self.query_calls.fetch_add(1, AtomicOrdering::SeqCst);
        self.check_available()?;

        if condition.partition_key != self.partition_key
            || self.sort_key.as_deref() != Some(condition.sort_key.as_str())
        {
            return Err(ClientError::KeySchemaMismatch(format!(
                "key condition on ({}, {}) does not match table key ({}, {})",
                condition.partition_key,
                condition.sort_key,
                self.partition_key,
                self.sort_key.as_deref().unwrap_or("-"),
            )));
        }

        let mut matching: Vec<Item> = self
            .items
            .read()
            .iter()
            .filter(|item| condition.matches(item))
            .cloned()
            .collect();
        matching.sort_by(|a, b| {
            match (a.get(&condition.sort_key), b.get(&condition.sort_key)) {
                (Some(x), Some(y)) => x.partial_cmp_key(y).unwrap_or(Ordering::Equal),
                _ => Ordering::Equal,
            }
        });

        let (items, last_evaluated_key) = self.page_after(matching, start_key);
        Ok(Page { items, last_evaluated_key })
    }

    fn scan_page(&self, condition: &KeyCondition, start_key: Option<&Item>) -> Result<Page, ClientError> {
        self.scan_calls.fetch_add(1, AtomicOrdering::SeqCst);
        self.check_available()?;

        // The page limit applies to items read, not items returned.
        let all = self.items.read().clone();
        let (scanned, last_evaluated_key) = self.page_after(all, start_key);
        let items = scanned.into_iter().filter(|item| condition.matches(item)).collect();
        Ok(Page { items, last_evaluated_key })
    }
}
