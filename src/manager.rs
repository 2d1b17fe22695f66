//! The public surface: one backend, one store, and queries over snapshots.

use std::fmt;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::backend::{Backend, BackendAdapter, BackendKind};
use crate::config::{BackendDescriptor, DEFAULT_TIME_COLUMN};
use crate::query::{QueryEngine, QueryRequest, RollingMean, View};
use crate::storage::{DatasetStore, Error, TIMESTAMP_COLUMN};

/// Columns that are never offered as plottable fields.
const HIDDEN_FIELDS: [&str; 3] = [TIMESTAMP_COLUMN, DEFAULT_TIME_COLUMN, "id"];

#[derive(Debug, Clone, PartialEq)]
pub struct ManagerOptions {
    pub rolling: Vec<RollingMean>,
    /// Partition/tag columns removed from every view.
    pub tag_columns: Vec<String>,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            rolling: RollingMean::defaults(),
            tag_columns: vec!["partition".to_string()],
        }
    }
}

/// Point-in-time health of the managed dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetDiagnostics {
    pub row_count: usize,
    pub column_count: usize,
    pub backend_kind: BackendKind,
    pub incremental_fetch: bool,
    pub time_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    pub watermark: Option<DateTime<Utc>>,
    /// Rows discarded by last-write-wins deduplication since startup.
    pub duplicate_count: usize,
    /// Rows delivered by incremental fetches since startup.
    pub rows_received: usize,
    pub merge_count: usize,
    pub last_merge: Option<DateTime<Utc>>,
}

impl fmt::Display for DatasetDiagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "backend:      {}", self.backend_kind)?;
        if !self.incremental_fetch {
            writeln!(f, "              (full re-read on every refresh)")?;
        }
        writeln!(f, "rows:         {}", self.row_count)?;
        writeln!(f, "columns:      {}", self.column_count)?;
        match self.time_range {
            Some((first, last)) => writeln!(f, "time range:   {first} .. {last}")?,
            None => writeln!(f, "time range:   -")?,
        }
        match self.watermark {
            Some(w) => writeln!(f, "watermark:    {w}")?,
            None => writeln!(f, "watermark:    unset")?,
        }
        write!(
            f,
            "merges:       {} ({} rows received, {} duplicates resolved)",
            self.merge_count, self.rows_received, self.duplicate_count
        )
    }
}

pub struct DatasetManager {
    backend: BackendAdapter,
    store: DatasetStore,
    engine: QueryEngine,
    options: ManagerOptions,
    // Serializes refreshes so a manual refresh and the driver do not fetch
    // the same range twice. Independent of the store lock.
    refresh_gate: Mutex<()>,
}

impl DatasetManager {
    /// Opens the described backend and performs the initial bulk load.
    pub fn initialize(descriptor: &BackendDescriptor) -> Result<Self, Error> {
        let backend = BackendAdapter::open(descriptor)?;
        Self::with_backend(backend, ManagerOptions::default())
    }

    /// Fails if the initial load fails. An empty store is a valid start.
    pub fn with_backend(backend: BackendAdapter, options: ManagerOptions) -> Result<Self, Error> {
        let initial = backend.load_all().inspect_err(|e| {
            log::error!("Initial load from {} backend failed: {}", backend.kind(), e);
        })?;
        log::info!(
            "Initial load from {} backend: {} rows",
            backend.kind(),
            initial.num_rows()
        );

        let store = DatasetStore::new();
        store.replace(initial);
        let engine = QueryEngine::new(options.rolling.clone(), options.tag_columns.clone());
        Ok(Self {
            backend,
            store,
            engine,
            options,
            refresh_gate: Mutex::new(()),
        })
    }

    /// One refresh tick: a full load while the watermark is unset, an
    /// incremental fetch afterwards. Returns the number of records received.
    /// On error the store is left exactly as it was.
    pub fn refresh_once(&self) -> Result<usize, Error> {
        let _gate = self.refresh_gate.lock();

        let Some(watermark) = self.store.watermark() else {
            let initial = self.backend.load_all()?;
            let received = initial.num_rows();
            self.store.replace(initial);
            return Ok(received);
        };

        let newer = self.backend.fetch_since(watermark)?;
        if newer.is_empty() {
            log::debug!("No records newer than {}", watermark);
            return Ok(0);
        }
        let outcome = self.store.merge(newer)?;
        log::info!(
            "Refresh merged {} records ({} new rows)",
            outcome.received,
            outcome.added
        );
        Ok(outcome.received)
    }

    /// Range-filtered, optionally resampled view. Work happens on a private
    /// snapshot; an unusable frequency returns the unresampled rows.
    pub fn query(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        resample: Option<&str>,
    ) -> Result<View, Error> {
        let snapshot = self.store.snapshot();
        self.engine
            .execute(&snapshot, &QueryRequest::new(start, end, resample))
    }

    pub fn diagnostics(&self) -> DatasetDiagnostics {
        let snapshot = self.store.snapshot();
        let stats = self.store.stats();
        let kind = self.backend.kind();
        DatasetDiagnostics {
            row_count: snapshot.num_rows(),
            column_count: snapshot.schema().fields().len(),
            backend_kind: kind,
            incremental_fetch: kind.supports_incremental_fetch(),
            time_range: snapshot.time_range(),
            watermark: self.store.watermark(),
            duplicate_count: stats.duplicates_resolved,
            rows_received: stats.rows_received,
            merge_count: stats.merges,
            last_merge: stats.last_merge,
        }
    }

    /// Numeric columns a chart can plot, derived columns included.
    pub fn available_fields(&self) -> Vec<String> {
        let schema = self.store.snapshot().schema();
        let mut fields: Vec<String> = schema
            .fields()
            .iter()
            .filter(|f| f.data_type().is_numeric() && !is_hidden(f.name(), &self.options.tag_columns))
            .map(|f| f.name().clone())
            .collect();

        for spec in &self.options.rolling {
            let source_numeric = schema
                .field_with_name(&spec.source)
                .is_ok_and(|f| f.data_type().is_numeric());
            if source_numeric && !fields.contains(&spec.output) {
                fields.push(spec.output.clone());
            }
        }
        fields
    }

    /// Fields for the map colour scale; empty without a position fix.
    pub fn map_fields(&self) -> Vec<String> {
        let fields = self.available_fields();
        let has_position = ["latitude", "longitude"]
            .iter()
            .all(|c| fields.iter().any(|f| f == c));
        if !has_position {
            return Vec::new();
        }
        fields
            .into_iter()
            .filter(|f| f != "latitude" && f != "longitude")
            .collect()
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn options(&self) -> &ManagerOptions {
        &self.options
    }

    pub fn store(&self) -> &DatasetStore {
        &self.store
    }
}

fn is_hidden(name: &str, tags: &[String]) -> bool {
    HIDDEN_FIELDS.contains(&name) || tags.iter().any(|t| t == name)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::backend::{AttributeValue, Item, MemoryTableClient, NoSqlBackend};
    use crate::config::NoSqlSource;

    fn reading(secs: i64, fields: &[(&str, f64)]) -> Item {
        let mut item = Item::from([
            ("partition".to_string(), AttributeValue::S("data".to_string())),
            ("datetime_utc".to_string(), AttributeValue::N(secs.to_string())),
        ]);
        for (name, value) in fields {
            item.insert(name.to_string(), AttributeValue::N(value.to_string()));
        }
        item
    }

    fn table(readings: Vec<Item>) -> Arc<MemoryTableClient> {
        let client = MemoryTableClient::new("partition", Some("datetime_utc"));
        client.extend(readings);
        Arc::new(client)
    }

    fn manager(client: &Arc<MemoryTableClient>) -> Result<DatasetManager, Error> {
        let backend = NoSqlBackend::new(
            Box::new(Arc::clone(client)),
            NoSqlSource::new("underway", "us-east-1"),
        );
        DatasetManager::with_backend(BackendAdapter::NoSql(backend), ManagerOptions::default())
    }

    fn seconds(view: &View) -> Vec<i64> {
        view.timestamps().iter().map(|t| t.timestamp()).collect()
    }

    #[test]
    fn test_initial_load_and_query() {
        let client = table(vec![
            reading(20, &[("x", 3.0)]),
            reading(0, &[("x", 1.0)]),
            reading(10, &[("x", 2.0)]),
        ]);
        let manager = manager(&client).unwrap();

        let view = manager.query(None, None, None).unwrap();

        assert_eq!(seconds(&view), vec![0, 10, 20]);
        assert_eq!(view.column_f64("x").unwrap(), vec![Some(1.0), Some(2.0), Some(3.0)]);
        assert!(!view.column_names().contains(&"partition".to_string()));
    }

    #[test]
    fn test_empty_initial_load_is_not_an_error() {
        let client = table(Vec::new());
        let manager = manager(&client).unwrap();

        assert_eq!(manager.diagnostics().watermark, None);
        assert!(manager.query(None, None, Some("1min")).unwrap().is_empty());

        // Watermark unset: the next tick performs a full load.
        client.insert(reading(5, &[("x", 1.0)]));
        assert_eq!(manager.refresh_once().unwrap(), 1);
        assert_eq!(manager.diagnostics().watermark, DateTime::from_timestamp(5, 0));
    }

    #[test]
    fn test_failed_initial_load_is_fatal() {
        let client = table(vec![reading(0, &[("x", 1.0)])]);
        client.set_available(false);

        assert!(matches!(manager(&client), Err(Error::BackendUnavailable(_))));
    }

    #[test]
    fn test_refresh_fetches_only_newer_records() {
        let client = table(vec![reading(0, &[("x", 1.0)]), reading(10, &[("x", 2.0)])]);
        let manager = manager(&client).unwrap();

        assert_eq!(manager.refresh_once().unwrap(), 0);

        client.extend([reading(20, &[("x", 3.0)]), reading(30, &[("x", 4.0)])]);
        assert_eq!(manager.refresh_once().unwrap(), 2);

        let diagnostics = manager.diagnostics();
        assert_eq!(diagnostics.row_count, 4);
        assert_eq!(diagnostics.watermark, DateTime::from_timestamp(30, 0));
        assert_eq!(diagnostics.merge_count, 1);
        assert_eq!(diagnostics.rows_received, 2);
        assert!(diagnostics.to_string().contains("2 rows received"));
        assert_eq!(diagnostics.backend_kind, BackendKind::NoSql);
    }

    #[test]
    fn test_refresh_error_leaves_state_unchanged() {
        let client = table(vec![reading(0, &[("x", 1.0)])]);
        let manager = manager(&client).unwrap();
        let before = manager.diagnostics();

        client.insert(reading(10, &[("x", 2.0)]));
        client.set_available(false);
        let err = manager.refresh_once().unwrap_err();
        assert!(err.is_transient());
        assert_eq!(manager.diagnostics(), before);

        client.set_available(true);
        assert_eq!(manager.refresh_once().unwrap(), 1);
        assert_eq!(manager.store().len(), 2);
    }

    #[test]
    fn test_duplicate_count_tracks_last_write_wins() {
        let client = table(vec![
            reading(0, &[("x", 1.0)]),
            reading(10, &[("x", 2.0)]),
            reading(20, &[("x", 3.0)]),
        ]);
        let manager = manager(&client).unwrap();

        let late = crate::normalize::RawTable::from_items(vec![
            [
                ("datetime_utc".to_string(), crate::normalize::RawValue::Integer(10)),
                ("x".to_string(), crate::normalize::RawValue::Real(99.0)),
            ]
            .into(),
        ])
        .into_dataset("datetime_utc")
        .unwrap();
        manager.store().merge(late).unwrap();

        let view = manager.query(None, None, None).unwrap();
        assert_eq!(seconds(&view), vec![0, 10, 20]);
        assert_eq!(view.column_f64("x").unwrap()[1], Some(99.0));
        assert_eq!(manager.diagnostics().duplicate_count, 1);
    }

    #[test]
    fn test_available_and_map_fields() {
        let client = table(vec![reading(
            0,
            &[("latitude", 41.5), ("longitude", -70.6), ("ph_total", 8.0), ("id", 1.0)],
        )]);
        let manager = manager(&client).unwrap();

        assert_eq!(
            manager.available_fields(),
            vec!["latitude", "longitude", "ph_total", "ph_total_ma"]
        );
        assert_eq!(manager.map_fields(), vec!["ph_total", "ph_total_ma"]);
    }

    #[test]
    fn test_map_fields_need_position() {
        let client = table(vec![reading(0, &[("ph_total", 8.0)])]);
        let manager = manager(&client).unwrap();

        assert!(manager.map_fields().is_empty());
    }
}
