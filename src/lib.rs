//! Incrementally refreshed, deduplicated cache of underway sensor data.
//!
//! A [`DatasetManager`] loads every record from one backend (SQLite table,
//! Parquet/Arrow snapshot file, or a managed key/range table), keeps it in a
//! lock-guarded [`DatasetStore`], and answers range-filtered, optionally
//! downsampled queries from private snapshots. A [`RefreshDriver`] pulls
//! records newer than the watermark on a fixed interval.

pub mod backend;
pub mod config;
pub mod manager;
pub mod normalize;
pub mod query;
pub mod refresh;
pub mod storage;

pub use backend::{Backend, BackendAdapter, BackendKind};
pub use config::{BackendDescriptor, DashConfig};
pub use manager::{DatasetDiagnostics, DatasetManager, ManagerOptions};
pub use query::{parse_bound, Frequency, QueryError, RollingMean, View};
pub use refresh::{RefreshDriver, RefreshHandle, RefreshReport};
pub use storage::{Dataset, DatasetStore, Error};
