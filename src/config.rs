//! Backend selection and dashboard configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::TimeDelta;
use serde::Deserialize;

use crate::backend::BackendKind;
use crate::manager::ManagerOptions;
use crate::query::RollingMean;
use crate::storage::Error;

pub const DEFAULT_SQL_TABLE: &str = "underway_summary";
pub const DEFAULT_TIME_COLUMN: &str = "datetime_utc";
pub const DEFAULT_PARTITION_KEY: &str = "partition";
pub const DEFAULT_PARTITION_VALUE: &str = "data";
pub const DEFAULT_MAX_PAGES: usize = 100;

/// Which store backs the dataset. Chosen once, never switched.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendDescriptor {
    Sql(SqlSource),
    SnapshotFile(SnapshotSource),
    NoSql(NoSqlSource),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SqlSource {
    pub path: PathBuf,
    pub table: String,
    pub time_column: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotFormat {
    Parquet,
    ArrowIpc,
}

impl SnapshotFormat {
    /// Snapshot format implied by a file extension, `None` for anything else.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "parquet" | "pq" => Some(SnapshotFormat::Parquet),
            "arrow" | "ipc" | "feather" => Some(SnapshotFormat::ArrowIpc),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotSource {
    pub path: PathBuf,
    pub format: SnapshotFormat,
    pub time_column: String,
}

/// How sort-key values are stored in the managed table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKeyEncoding {
    #[default]
    EpochSeconds,
    Iso8601,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NoSqlSource {
    pub table_name: String,
    pub region: String,
    pub partition_key: String,
    pub partition_value: String,
    /// Sort key attribute; also the record's time attribute.
    pub sort_key: String,
    pub sort_key_encoding: SortKeyEncoding,
    pub max_pages: usize,
}

impl NoSqlSource {
    pub fn new(table_name: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            region: region.into(),
            partition_key: DEFAULT_PARTITION_KEY.to_string(),
            partition_value: DEFAULT_PARTITION_VALUE.to_string(),
            sort_key: DEFAULT_TIME_COLUMN.to_string(),
            sort_key_encoding: SortKeyEncoding::default(),
            max_pages: DEFAULT_MAX_PAGES,
        }
    }
}

impl BackendDescriptor {
    /// A file path, or a table name plus region; exactly one must be given.
    /// The file extension picks a snapshot format, otherwise SQLite.
    pub fn from_parts(
        file_path: Option<PathBuf>,
        table_name: Option<String>,
        region: Option<String>,
    ) -> Result<Self, Error> {
        match (file_path, table_name, region) {
            (Some(path), None, None) => Ok(Self::for_file(path)),
            (None, Some(table), Some(region)) => Ok(BackendDescriptor::NoSql(NoSqlSource::new(table, region))),
            (None, Some(_), None) => Err(Error::Config(
                "a managed table name requires a region".to_string(),
            )),
            (None, None, _) => Err(Error::Config(
                "either a file path or a managed table name must be set".to_string(),
            )),
            (Some(_), _, _) => Err(Error::Config(
                "file path and managed table are mutually exclusive".to_string(),
            )),
        }
    }

    pub fn for_file(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match SnapshotFormat::from_path(&path) {
            Some(format) => BackendDescriptor::SnapshotFile(SnapshotSource {
                path,
                format,
                time_column: DEFAULT_TIME_COLUMN.to_string(),
            }),
            None => BackendDescriptor::Sql(SqlSource {
                path,
                table: DEFAULT_SQL_TABLE.to_string(),
                time_column: DEFAULT_TIME_COLUMN.to_string(),
            }),
        }
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            BackendDescriptor::Sql(_) => BackendKind::Sql,
            BackendDescriptor::SnapshotFile(_) => BackendKind::SnapshotFile,
            BackendDescriptor::NoSql(_) => BackendKind::NoSql,
        }
    }

    fn set_time_column(&mut self, column: &str) {
        match self {
            BackendDescriptor::Sql(s) => s.time_column = column.to_string(),
            BackendDescriptor::SnapshotFile(s) => s.time_column = column.to_string(),
            BackendDescriptor::NoSql(s) => s.sort_key = column.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    locness_dash: DashConfig,
}

/// The `[locness_dash]` table of `config.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct DashConfig {
    pub db_file_path: Option<PathBuf>,
    pub dynamodb_table: Option<String>,
    pub aws_region: Option<String>,
    /// Seconds between refresh ticks.
    #[serde(default = "default_update_interval")]
    pub update_interval: u64,
    pub default_resampling: Option<String>,
    pub sql_table: Option<String>,
    pub time_column: Option<String>,
    pub partition_value: Option<String>,
    #[serde(default)]
    pub sort_key_encoding: SortKeyEncoding,
    pub max_pages: Option<usize>,
    pub tag_columns: Option<Vec<String>>,
    pub rolling_window_secs: Option<i64>,
}

fn default_update_interval() -> u64 {
    5
}

impl DashConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }

    pub fn from_toml_str(text: &str) -> Result<Self, Error> {
        let file: ConfigFile = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        Ok(file.locness_dash)
    }

    pub fn backend_descriptor(&self) -> Result<BackendDescriptor, Error> {
        let mut descriptor = BackendDescriptor::from_parts(
            self.db_file_path.clone(),
            self.dynamodb_table.clone(),
            self.aws_region.clone(),
        )?;

        if let Some(column) = &self.time_column {
            descriptor.set_time_column(column);
        }
        match &mut descriptor {
            BackendDescriptor::Sql(source) => {
                if let Some(table) = &self.sql_table {
                    source.table = table.clone();
                }
            }
            BackendDescriptor::NoSql(source) => {
                if let Some(value) = &self.partition_value {
                    source.partition_value = value.clone();
                }
                if let Some(pages) = self.max_pages {
                    source.max_pages = pages.max(1);
                }
                source.sort_key_encoding = self.sort_key_encoding;
            }
            BackendDescriptor::SnapshotFile(_) => {}
        }
        Ok(descriptor)
    }

    pub fn manager_options(&self) -> ManagerOptions {
        let mut options = ManagerOptions::default();
        if let Some(tags) = &self.tag_columns {
            options.tag_columns = tags.clone();
        }
        if let Some(secs) = self.rolling_window_secs {
            let window = TimeDelta::seconds(secs.max(1));
            options.rolling = options
                .rolling
                .into_iter()
                .map(|r| RollingMean { window, ..r })
                .collect();
        }
        options
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval.max(1))
    }
}
