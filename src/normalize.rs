//! Converts backend-native values into the dataset's column types.
//!
//! Row-shaped sources (SQL rows, NoSQL items) go through [`RawTable`]; Arrow
//! sources (snapshot files) go through [`normalize_batch`]. Both produce a
//! sorted, deduplicated [`Dataset`] whose key column is derived from the
//! configured time column:
//!
//! - integers and numeric strings are epoch seconds (UTC),
//! - text is parsed with [`ISO_FORMAT`] only,
//! - Arrow timestamps of any unit are rescaled to nanoseconds.
//!
//! Rows whose time cannot be parsed are dropped with a warning.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, AsArray, BooleanArray, Float64Array, Int64Array, StringArray,
    TimestampNanosecondArray,
};
use arrow::compute::{cast, filter};
use arrow::datatypes::{
    DataType, Field, Float64Type, Int64Type, Schema, TimeUnit, TimestampNanosecondType,
};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, NaiveDateTime, Utc};

use crate::storage::{timestamp_field, Dataset, Error, TIMESTAMP_COLUMN};

/// The one accepted textual timestamp layout, e.g. `2024-05-01T12:00:00Z`
/// or `2024-05-01T12:00:00.250Z`.
pub const ISO_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.fZ";

const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// A single value as a backend hands it over.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Null,
    Integer(i64),
    Real(f64),
    /// Arbitrary-precision decimal carried as its wire string.
    Number(String),
    Text(String),
    Bool(bool),
}

/// Column-named rows collected from a row-oriented backend.
#[derive(Debug, Clone, Default)]
pub struct RawTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<RawValue>>,
}

impl RawTable {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, row: Vec<RawValue>) {
        debug_assert_eq!(row.len(), self.columns.len());
        self.rows.push(row);
    }

    /// Builds a table from sparse items; attributes missing from an item
    /// become nulls. Columns come out in name order.
    pub fn from_items(items: Vec<BTreeMap<String, RawValue>>) -> Self {
        let names: BTreeSet<&String> = items.iter().flat_map(|item| item.keys()).collect();
        let columns: Vec<String> = names.into_iter().cloned().collect();
        let rows = items
            .iter()
            .map(|item| {
                columns
                    .iter()
                    .map(|c| item.get(c).cloned().unwrap_or(RawValue::Null))
                    .collect()
            })
            .collect();
        Self { columns, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Normalizes into a dataset keyed by `time_column`.
    /// An empty table yields an empty dataset whatever its columns.
    pub fn into_dataset(self, time_column: &str) -> Result<Dataset, Error> {
        if self.rows.is_empty() {
            return Ok(Dataset::empty());
        }
        let time_idx = self
            .columns
            .iter()
            .position(|c| c == time_column)
            .ok_or_else(|| {
                Error::SchemaMismatch(format!("time column {time_column} not present"))
            })?;

        let mut timestamps = Vec::with_capacity(self.rows.len());
        let mut kept_rows = Vec::with_capacity(self.rows.len());
        for (row_idx, row) in self.rows.iter().enumerate() {
            match parse_raw_time(&row[time_idx]) {
                Some(ns) => {
                    timestamps.push(ns);
                    kept_rows.push(row_idx);
                }
                None => log::warn!(
                    "Dropping row {}: cannot parse {} value {:?}",
                    row_idx,
                    time_column,
                    row[time_idx]
                ),
            }
        }

        let mut fields = vec![timestamp_field()];
        let mut arrays: Vec<ArrayRef> = vec![Arc::new(TimestampNanosecondArray::from(timestamps))];

        for (col_idx, name) in self.columns.iter().enumerate() {
            if col_idx == time_idx || name == TIMESTAMP_COLUMN {
                continue;
            }
            let values: Vec<&RawValue> = kept_rows.iter().map(|&r| &self.rows[r][col_idx]).collect();
            let array = build_column(&values);
            fields.push(Field::new(name, array.data_type().clone(), true));
            arrays.push(array);
        }

        let batch = RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)?;
        Dataset::try_new(batch)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum ColumnKind {
    Int,
    Float,
    Text,
}

fn classify(value: &RawValue) -> Option<ColumnKind> {
    match value {
        RawValue::Null => None,
        RawValue::Integer(_) => Some(ColumnKind::Int),
        RawValue::Real(_) => Some(ColumnKind::Float),
        RawValue::Number(s) | RawValue::Text(s) => Some(classify_str(s)),
        RawValue::Bool(_) => Some(ColumnKind::Text),
    }
}

fn classify_str(s: &str) -> ColumnKind {
    let s = s.trim();
    if s.parse::<i64>().is_ok() {
        ColumnKind::Int
    } else if s.parse::<f64>().is_ok() {
        ColumnKind::Float
    } else {
        ColumnKind::Text
    }
}

/// Integer only when every value is integral, otherwise float when every
/// value parses as a number, otherwise opaque text. All-null is float.
fn build_column(values: &[&RawValue]) -> ArrayRef {
    let kind = values
        .iter()
        .filter_map(|v| classify(v))
        .max()
        .unwrap_or(ColumnKind::Float);

    match kind {
        ColumnKind::Int => Arc::new(Int64Array::from(
            values.iter().map(|v| raw_as_i64(v)).collect::<Vec<_>>(),
        )),
        ColumnKind::Float => Arc::new(Float64Array::from(
            values.iter().map(|v| raw_as_f64(v)).collect::<Vec<_>>(),
        )),
        ColumnKind::Text => Arc::new(StringArray::from(
            values.iter().map(|v| raw_as_text(v)).collect::<Vec<_>>(),
        )),
    }
}

fn raw_as_i64(value: &RawValue) -> Option<i64> {
    match value {
        RawValue::Integer(i) => Some(*i),
        RawValue::Number(s) | RawValue::Text(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn raw_as_f64(value: &RawValue) -> Option<f64> {
    match value {
        RawValue::Integer(i) => Some(*i as f64),
        RawValue::Real(f) => Some(*f),
        RawValue::Number(s) | RawValue::Text(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn raw_as_text(value: &RawValue) -> Option<String> {
    match value {
        RawValue::Null => None,
        RawValue::Integer(i) => Some(i.to_string()),
        RawValue::Real(f) => Some(f.to_string()),
        RawValue::Number(s) | RawValue::Text(s) => Some(s.clone()),
        RawValue::Bool(b) => Some(b.to_string()),
    }
}

fn parse_raw_time(value: &RawValue) -> Option<i64> {
    match value {
        RawValue::Integer(secs) => secs.checked_mul(NANOS_PER_SECOND),
        RawValue::Real(secs) => seconds_f64_to_nanos(*secs),
        RawValue::Number(s) => match s.trim().parse::<i64>() {
            Ok(secs) => secs.checked_mul(NANOS_PER_SECOND),
            Err(_) => s.trim().parse::<f64>().ok().and_then(seconds_f64_to_nanos),
        },
        RawValue::Text(s) => parse_iso(s).and_then(|dt| dt.timestamp_nanos_opt()),
        RawValue::Null | RawValue::Bool(_) => None,
    }
}

fn seconds_f64_to_nanos(secs: f64) -> Option<i64> {
    let nanos = (secs * NANOS_PER_SECOND as f64).round();
    (nanos.is_finite() && nanos.abs() < i64::MAX as f64).then_some(nanos as i64)
}

/// Parses [`ISO_FORMAT`] text as a UTC instant.
pub fn parse_iso(s: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s.trim(), ISO_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Renders an instant in [`ISO_FORMAT`], omitting a zero fraction.
pub fn format_iso(instant: DateTime<Utc>) -> String {
    if instant.timestamp_subsec_nanos() == 0 {
        instant.format("%Y-%m-%dT%H:%M:%SZ").to_string()
    } else {
        instant.format(ISO_FORMAT).to_string()
    }
}

/// Normalizes an Arrow batch read from a snapshot file.
///
/// The time column is replaced by the key column; decimals and narrow
/// numerics widen to `Float64`/`Int64`; text columns that parse as numbers
/// in full are converted, the rest stay text.
pub fn normalize_batch(batch: &RecordBatch, time_column: &str) -> Result<Dataset, Error> {
    let schema = batch.schema();
    let time_idx = schema.index_of(time_column).map_err(|_| {
        Error::SchemaMismatch(format!("time column {time_column} not present"))
    })?;

    let timestamps = arrow_time_to_nanos(batch.column(time_idx))?;
    let valid = BooleanArray::from(
        (0..timestamps.len()).map(|i| timestamps.is_valid(i)).collect::<Vec<_>>(),
    );
    let dropped = timestamps.null_count();
    if dropped > 0 {
        log::warn!("Dropping {dropped} rows with unparseable {time_column}");
    }

    let mut fields = vec![timestamp_field()];
    let mut arrays: Vec<ArrayRef> = vec![Arc::new(timestamps)];
    for (idx, field) in schema.fields().iter().enumerate() {
        if idx == time_idx || field.name() == TIMESTAMP_COLUMN {
            continue;
        }
        let array = normalize_value_column(batch.column(idx))?;
        fields.push(Field::new(field.name(), array.data_type().clone(), true));
        arrays.push(array);
    }

    // Filter before assembling: the key field does not admit nulls.
    let arrays = if dropped > 0 {
        arrays
            .iter()
            .map(|a| filter(a.as_ref(), &valid))
            .collect::<Result<Vec<_>, _>>()?
    } else {
        arrays
    };
    let normalized = RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)?;
    Dataset::try_new(normalized)
}

fn arrow_time_to_nanos(column: &ArrayRef) -> Result<TimestampNanosecondArray, Error> {
    let nanos: TimestampNanosecondArray = match column.data_type() {
        DataType::Timestamp(_, tz) => {
            // Reinterpret the UTC epoch values; casting to a naive type would shift
            // non-UTC zones to wall-clock time.
            let rescaled = cast(column.as_ref(), &DataType::Timestamp(TimeUnit::Nanosecond, tz.clone()))?;
            let values = rescaled.as_primitive::<TimestampNanosecondType>();
            TimestampNanosecondArray::new(values.values().clone(), values.nulls().cloned())
        }
        DataType::Date32 | DataType::Date64 => {
            let rescaled = cast(column.as_ref(), &DataType::Timestamp(TimeUnit::Nanosecond, None))?;
            rescaled.as_primitive::<TimestampNanosecondType>().clone()
        }
        t if t.is_integer() => {
            let secs = cast(column.as_ref(), &DataType::Int64)?;
            secs.as_primitive::<Int64Type>()
                .iter()
                .map(|s| s.and_then(|s| s.checked_mul(NANOS_PER_SECOND)))
                .collect()
        }
        t if t.is_floating() || matches!(t, DataType::Decimal128(..) | DataType::Decimal256(..)) => {
            let secs = cast(column.as_ref(), &DataType::Float64)?;
            secs.as_primitive::<Float64Type>()
                .iter()
                .map(|s| s.and_then(seconds_f64_to_nanos))
                .collect()
        }
        DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View => {
            let text = cast(column.as_ref(), &DataType::Utf8)?;
            text.as_string::<i32>()
                .iter()
                .map(|s| s.and_then(parse_iso).and_then(|dt| dt.timestamp_nanos_opt()))
                .collect()
        }
        other => {
            return Err(Error::SchemaMismatch(format!(
                "unsupported time column type {other}"
            )));
        }
    };
    Ok(nanos)
}

fn normalize_value_column(column: &ArrayRef) -> Result<ArrayRef, Error> {
    let data_type = column.data_type();
    let normalized = match data_type {
        DataType::Float64 | DataType::Int64 => Arc::clone(column),
        DataType::Float16 | DataType::Float32 | DataType::Decimal128(..) | DataType::Decimal256(..) => {
            cast(column.as_ref(), &DataType::Float64)?
        }
        t if t.is_integer() => cast(column.as_ref(), &DataType::Int64)?,
        DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View => {
            let text = cast(column.as_ref(), &DataType::Utf8)?;
            parse_text_column(text.as_string::<i32>()).unwrap_or(text)
        }
        _ => Arc::clone(column),
    };
    Ok(normalized)
}

/// Numeric version of a text column when every non-null entry parses.
fn parse_text_column(text: &StringArray) -> Option<ArrayRef> {
    let kind = text
        .iter()
        .flatten()
        .map(classify_str)
        .max()?;
    match kind {
        ColumnKind::Int => Some(Arc::new(
            text.iter()
                .map(|s| s.and_then(|s| s.trim().parse::<i64>().ok()))
                .collect::<Int64Array>(),
        )),
        ColumnKind::Float => Some(Arc::new(
            text.iter()
                .map(|s| s.and_then(|s| s.trim().parse::<f64>().ok()))
                .collect::<Float64Array>(),
        )),
        ColumnKind::Text => None,
    }
}
