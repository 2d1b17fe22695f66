use std::fs::File;

use arrow::ipc::reader::FileReader;
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Utc};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

use super::{Backend, BackendKind};
use crate::config::{SnapshotFormat, SnapshotSource};
use crate::normalize::normalize_batch;
use crate::storage::{Dataset, Error};

/// Reads a columnar snapshot file.
///
/// The formats offer no incremental read, so `fetch_since` re-reads the
/// whole file and filters client-side. Refresh cost grows with file size.
pub struct SnapshotBackend {
    source: SnapshotSource,
}

impl SnapshotBackend {
    pub fn new(source: SnapshotSource) -> Self {
        log::info!(
            "Snapshot backend {} is re-read in full on every refresh",
            source.path.display()
        );
        Self { source }
    }

    fn open(&self) -> Result<File, Error> {
        File::open(&self.source.path).map_err(|e| {
            Error::BackendUnavailable(format!("{}: {e}", self.source.path.display()))
        })
    }

    fn read_batch(&self) -> Result<RecordBatch, Error> {
        let file = self.open()?;
        let (schema, batches) = match self.source.format {
            SnapshotFormat::Parquet => {
                let builder = ParquetRecordBatchReaderBuilder::try_new(file)
                    .map_err(|e| self.unreadable(e))?;
                let schema = builder.schema().clone();
                let reader = builder.build().map_err(|e| self.unreadable(e))?;
                let batches = reader.collect::<Result<Vec<_>, _>>()?;
                (schema, batches)
            }
            SnapshotFormat::ArrowIpc => {
                let reader = FileReader::try_new(file, None)?;
                let schema = reader.schema();
                let batches = reader.collect::<Result<Vec<_>, _>>()?;
                (schema, batches)
            }
        };
        Ok(arrow::compute::concat_batches(&schema, &batches)?)
    }

    fn unreadable(&self, err: parquet::errors::ParquetError) -> Error {
        Error::BackendUnavailable(format!("{}: {err}", self.source.path.display()))
    }

    fn read(&self) -> Result<Dataset, Error> {
        let batch = self.read_batch()?;
        normalize_batch(&batch, &self.source.time_column)
    }
}

impl Backend for SnapshotBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::SnapshotFile
    }

    fn load_all(&self) -> Result<Dataset, Error> {
        self.read()
    }

    fn fetch_since(&self, watermark: DateTime<Utc>) -> Result<Dataset, Error> {
        let all = self.read()?;
        let newer = all.filter_after(watermark)?;
        log::debug!(
            "Snapshot rescan of {}: read {} rows, {} newer than {}",
            self.source.path.display(),
            all.num_rows(),
            newer.num_rows(),
            watermark
        );
        Ok(newer)
    }
}
