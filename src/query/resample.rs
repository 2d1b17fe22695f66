use std::ops::Range;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, AsArray, Float64Array, TimestampNanosecondArray, UInt32Array};
use arrow::compute::{cast, take};
use arrow::datatypes::{DataType, Field, Float64Type, Schema};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Utc};

use super::Frequency;
use crate::storage::{timestamp_field, Dataset, Error};

/// One bin: its start and the rows that fall in it.
struct Bin {
    start: i64,
    rows: Range<usize>,
}

/// Bins rows into `[o + k*f, o + (k+1)*f)`, where `o` is midnight UTC of the
/// first row's day, and emits one row per non-empty bin, stamped with the
/// bin start. Numeric columns become the mean of their
/// non-null values; other columns keep the first non-null value.
///
/// A bin starting before `floor` is stamped with `floor` instead, so a
/// range-filtered input never yields a row before its range start.
pub fn resample(dataset: &Dataset, freq: Frequency, floor: Option<DateTime<Utc>>) -> Result<Dataset, Error> {
    let mut bins = bins(dataset.timestamps().values(), freq.as_nanos());
    if let (Some(floor), Some(first)) = (floor.and_then(|f| f.timestamp_nanos_opt()), bins.first_mut()) {
        first.start = first.start.max(floor);
    }

    let schema = dataset.schema();
    let mut fields = vec![timestamp_field()];
    let mut columns: Vec<ArrayRef> = vec![Arc::new(TimestampNanosecondArray::from(
        bins.iter().map(|b| b.start).collect::<Vec<_>>(),
    ))];

    for (field, column) in schema.fields().iter().zip(dataset.batch().columns()).skip(1) {
        let array = if field.data_type().is_numeric() {
            bin_means(column, &bins)?
        } else {
            bin_firsts(column, &bins)?
        };
        fields.push(Field::new(field.name(), array.data_type().clone(), true));
        columns.push(array);
    }

    let batch = RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?;
    Ok(Dataset::from_sorted(batch))
}

const NANOS_PER_DAY: i64 = 86_400 * 1_000_000_000;

/// Rows are sorted, so each bin is a contiguous run.
fn bins(ts: &[i64], width: i64) -> Vec<Bin> {
    let Some(&first) = ts.first() else {
        return Vec::new();
    };
    let origin = first.div_euclid(NANOS_PER_DAY) * NANOS_PER_DAY;

    let mut bins: Vec<Bin> = Vec::new();
    for (i, &t) in ts.iter().enumerate() {
        let start = origin + (t - origin).div_euclid(width) * width;
        match bins.last_mut() {
            Some(bin) if bin.start == start => bin.rows.end = i + 1,
            _ => bins.push(Bin { start, rows: i..i + 1 }),
        }
    }
    bins
}

fn bin_means(column: &ArrayRef, bins: &[Bin]) -> Result<ArrayRef, Error> {
    let values = cast(column.as_ref(), &DataType::Float64)?;
    let values = values.as_primitive::<Float64Type>();

    let means: Float64Array = bins
        .iter()
        .map(|bin| {
            let (sum, count) = bin
                .rows
                .clone()
                .filter(|&i| values.is_valid(i))
                .fold((0.0, 0usize), |(sum, count), i| (sum + values.value(i), count + 1));
            (count > 0).then(|| sum / count as f64)
        })
        .collect();
    Ok(Arc::new(means))
}

fn bin_firsts(column: &ArrayRef, bins: &[Bin]) -> Result<ArrayRef, Error> {
    let indices: UInt32Array = bins
        .iter()
        .map(|bin| bin.rows.clone().find(|&i| column.is_valid(i)).map(|i| i as u32))
        .collect();
    Ok(take(column.as_ref(), &indices, None)?)
}
