use std::collections::HashMap;
use std::sync::Arc;

use arrow::array::{new_null_array, Array, ArrayRef, TimestampNanosecondArray, UInt32Array};
use arrow::compute::{cast, SortOptions};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use arrow::record_batch::RecordBatch;
use arrow_ord::sort::{lexsort_to_indices, SortColumn};
use chrono::{DateTime, TimeDelta, Utc};

use super::Error;

/// Name of the key column every dataset carries at index 0.
pub const TIMESTAMP_COLUMN: &str = "timestamp";

pub fn timestamp_type() -> DataType {
    DataType::Timestamp(TimeUnit::Nanosecond, None)
}

pub fn timestamp_field() -> Field {
    Field::new(TIMESTAMP_COLUMN, timestamp_type(), false)
}

/// Time-ordered set of sensor records with unique timestamps.
///
/// Column 0 is always [`TIMESTAMP_COLUMN`] holding UTC nanoseconds. All other
/// columns are nullable. Arrow arrays are immutable, so a cloned `Dataset`
/// never observes later merges into the original.
#[derive(Clone, Debug, PartialEq)]
pub struct Dataset {
    batch: RecordBatch,
}

impl Default for Dataset {
    fn default() -> Self {
        Self::empty()
    }
}

impl Dataset {
    pub fn empty() -> Self {
        Self {
            batch: RecordBatch::new_empty(Arc::new(Schema::new(vec![timestamp_field()]))),
        }
    }

    /// Validates the key column, then sorts by timestamp and drops duplicate
    /// timestamps keeping the row that appears last in `batch`.
    pub fn try_new(batch: RecordBatch) -> Result<Self, Error> {
        validate_key_column(batch.schema_ref())?;
        let (batch, _) = sort_dedup(&batch)?;
        Ok(Self { batch })
    }

    /// Wraps a batch that is already sorted with unique timestamps.
    pub(crate) fn from_sorted(batch: RecordBatch) -> Self {
        debug_assert!(validate_key_column(batch.schema_ref()).is_ok());
        Self { batch }
    }

    pub fn batch(&self) -> &RecordBatch {
        &self.batch
    }

    pub fn into_batch(self) -> RecordBatch {
        self.batch
    }

    pub fn schema(&self) -> SchemaRef {
        self.batch.schema()
    }

    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.num_rows() == 0
    }

    pub fn column_names(&self) -> Vec<String> {
        self.batch
            .schema_ref()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect()
    }

    pub fn column(&self, name: &str) -> Option<&ArrayRef> {
        self.batch.column_by_name(name)
    }

    pub fn timestamps(&self) -> &TimestampNanosecondArray {
        self.batch
            .column(0)
            .as_any()
            .downcast_ref::<TimestampNanosecondArray>()
            .unwrap_or_else(|| unreachable!("key column validated on construction"))
    }

    pub fn min_time(&self) -> Option<DateTime<Utc>> {
        (!self.is_empty()).then(|| DateTime::from_timestamp_nanos(self.timestamps().value(0)))
    }

    pub fn max_time(&self) -> Option<DateTime<Utc>> {
        let n = self.num_rows();
        (n > 0).then(|| DateTime::from_timestamp_nanos(self.timestamps().value(n - 1)))
    }

    pub fn time_range(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        Some((self.min_time()?, self.max_time()?))
    }

    /// Median spacing between consecutive samples, `None` below two rows.
    pub fn median_interval(&self) -> Option<TimeDelta> {
        let ts = self.timestamps().values();
        if ts.len() < 2 {
            return None;
        }
        let mut gaps: Vec<i64> = ts.windows(2).map(|w| w[1] - w[0]).collect();
        gaps.sort_unstable();
        let mid = gaps.len() / 2;
        let median = if gaps.len() % 2 == 0 {
            // integer midpoint without overflow
            gaps[mid - 1] + (gaps[mid] - gaps[mid - 1]) / 2
        } else {
            gaps[mid]
        };
        Some(TimeDelta::nanoseconds(median))
    }

    /// Replaces the column called `name`, or appends it when absent.
    pub fn with_column(&self, name: &str, array: ArrayRef) -> Result<Self, Error> {
        if name == TIMESTAMP_COLUMN {
            return Err(Error::SchemaMismatch(format!(
                "cannot overwrite key column {TIMESTAMP_COLUMN}"
            )));
        }
        let schema = self.batch.schema();
        let mut fields: Vec<Field> = schema.fields().iter().map(|f| f.as_ref().clone()).collect();
        let mut columns = self.batch.columns().to_vec();
        let field = Field::new(name, array.data_type().clone(), true);

        match schema.index_of(name) {
            Ok(idx) => {
                fields[idx] = field;
                columns[idx] = array;
            }
            Err(_) => {
                fields.push(field);
                columns.push(array);
            }
        }

        let batch = RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?;
        Ok(Self { batch })
    }

    /// Appends `newer` after `self`, then sorts and deduplicates so rows from
    /// `newer` win on equal timestamps. Returns the merged dataset and the
    /// number of rows discarded as duplicates.
    pub fn merge(&self, newer: &Dataset) -> Result<(Dataset, usize), Error> {
        let combined = concat_datasets(&[self, newer])?;
        let (batch, duplicates) = sort_dedup(&combined)?;
        Ok((Dataset { batch }, duplicates))
    }
}

fn validate_key_column(schema: &SchemaRef) -> Result<(), Error> {
    match schema.fields().first() {
        Some(field) if field.name() == TIMESTAMP_COLUMN && field.data_type() == &timestamp_type() => {
            Ok(())
        }
        Some(field) => Err(Error::SchemaMismatch(format!(
            "first column must be {TIMESTAMP_COLUMN} ({}), found {} ({})",
            timestamp_type(),
            field.name(),
            field.data_type()
        ))),
        None => Err(Error::SchemaMismatch("batch has no columns".to_string())),
    }
}

/// Sorts rows by timestamp and keeps the last occurrence of each timestamp.
fn sort_dedup(batch: &RecordBatch) -> Result<(RecordBatch, usize), Error> {
    let n = batch.num_rows();
    if n == 0 {
        return Ok((batch.clone(), 0));
    }

    // Row position breaks ties so equal timestamps stay in arrival order.
    let positions: ArrayRef = Arc::new(UInt32Array::from_iter_values(0..n as u32));
    let order = lexsort_to_indices(
        &[
            SortColumn {
                values: Arc::clone(batch.column(0)),
                options: Some(SortOptions::default()),
            },
            SortColumn {
                values: positions,
                options: Some(SortOptions::default()),
            },
        ],
        None,
    )?;

    let ts = batch
        .column(0)
        .as_any()
        .downcast_ref::<TimestampNanosecondArray>()
        .ok_or_else(|| Error::SchemaMismatch("key column is not a timestamp".to_string()))?;

    let order = order.values();
    let mut keep: Vec<u32> = Vec::with_capacity(n);
    for (i, &row) in order.iter().enumerate() {
        let is_last_of_run = order
            .get(i + 1)
            .is_none_or(|&next| ts.value(next as usize) != ts.value(row as usize));
        if is_last_of_run {
            keep.push(row);
        }
    }

    let duplicates = n - keep.len();
    let indices = UInt32Array::from(keep);
    let sorted = arrow::compute::take_record_batch(batch, &indices)?;
    Ok((sorted, duplicates))
}

/// Concatenates datasets whose schemas may differ by aligning every batch to
/// a unified schema first.
pub(crate) fn concat_datasets(datasets: &[&Dataset]) -> Result<RecordBatch, Error> {
    let schema = unify_schemas(datasets.iter().map(|d| d.batch.schema_ref()))?;
    let aligned: Vec<RecordBatch> = datasets
        .iter()
        .map(|d| align_batch(&d.batch, &schema))
        .collect::<Result<_, _>>()?;
    Ok(arrow::compute::concat_batches(&schema, &aligned)?)
}

fn unify_schemas<'a>(schemas: impl Iterator<Item = &'a SchemaRef>) -> Result<SchemaRef, Error> {
    let mut order: Vec<String> = Vec::new();
    let mut types: HashMap<String, DataType> = HashMap::new();

    for schema in schemas {
        validate_key_column(schema)?;
        for field in schema.fields().iter().skip(1) {
            match types.get(field.name()) {
                None => {
                    order.push(field.name().clone());
                    types.insert(field.name().clone(), field.data_type().clone());
                }
                Some(existing) => {
                    let widened = widen(existing, field.data_type());
                    types.insert(field.name().clone(), widened);
                }
            }
        }
    }

    let mut fields = vec![timestamp_field()];
    for name in order {
        let data_type = types.remove(&name).unwrap_or(DataType::Null);
        fields.push(Field::new(name, data_type, true));
    }
    Ok(Arc::new(Schema::new(fields)))
}

fn widen(a: &DataType, b: &DataType) -> DataType {
    if a == b {
        return a.clone();
    }
    match (a, b) {
        (DataType::Null, other) | (other, DataType::Null) => other.clone(),
        (x, y) if x.is_numeric() && y.is_numeric() => DataType::Float64,
        _ => DataType::Utf8,
    }
}

fn align_batch(batch: &RecordBatch, schema: &SchemaRef) -> Result<RecordBatch, Error> {
    let rows = batch.num_rows();
    let columns: Vec<ArrayRef> = schema
        .fields()
        .iter()
        .map(|field| match batch.column_by_name(field.name()) {
            Some(col) if col.data_type() == field.data_type() => Ok(Arc::clone(col)),
            Some(col) => cast(col.as_ref(), field.data_type()),
            None => Ok(new_null_array(field.data_type(), rows)),
        })
        .collect::<Result<_, _>>()?;
    Ok(RecordBatch::try_new(Arc::clone(schema), columns)?)
}
