use arrow::array::AsArray;
use arrow::compute::cast;
use arrow::datatypes::{DataType, Float64Type};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, TimeDelta, Utc};

use crate::storage::Dataset;

/// The result of one query: a private, time-ordered copy of the matching
/// rows. Recomputed on every call and never shared with the store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct View {
    dataset: Dataset,
    resample_interval: Option<TimeDelta>,
}

impl View {
    pub(crate) fn new(dataset: Dataset, resample_interval: Option<TimeDelta>) -> Self {
        Self {
            dataset,
            resample_interval,
        }
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    pub fn batch(&self) -> &RecordBatch {
        self.dataset.batch()
    }

    pub fn into_batch(self) -> RecordBatch {
        self.dataset.into_batch()
    }

    pub fn num_rows(&self) -> usize {
        self.dataset.num_rows()
    }

    pub fn is_empty(&self) -> bool {
        self.dataset.is_empty()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.dataset.column_names()
    }

    pub fn timestamps(&self) -> Vec<DateTime<Utc>> {
        self.dataset
            .timestamps()
            .values()
            .iter()
            .map(|&ns| DateTime::from_timestamp_nanos(ns))
            .collect()
    }

    /// A numeric column as floats, `None` when absent or not numeric.
    pub fn column_f64(&self, name: &str) -> Option<Vec<Option<f64>>> {
        let column = self.dataset.column(name)?;
        if !column.data_type().is_numeric() {
            return None;
        }
        let values = cast(column.as_ref(), &DataType::Float64).ok()?;
        Some(values.as_primitive::<Float64Type>().iter().collect())
    }

    /// Most recent sample in the view.
    pub fn latest_timestamp(&self) -> Option<DateTime<Utc>> {
        self.dataset.max_time()
    }

    /// Bin width when the view was resampled.
    pub fn resample_interval(&self) -> Option<TimeDelta> {
        self.resample_interval
    }
}
