pub mod scenarios;

use super::*;
use crate::storage::timestamp_field;
use arrow::array::{Array, Float64Array, StringArray, TimestampNanosecondArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use std::sync::Arc;

pub const SECOND: i64 = 1_000_000_000;

pub fn at(seconds: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(seconds, 0).unwrap()
}

/// `x` and `ph_total` readings plus a constant `partition` tag.
pub fn sensor_dataset(seconds: &[i64], x: &[Option<f64>], ph: &[Option<f64>]) -> Dataset {
    let schema = Arc::new(Schema::new(vec![
        timestamp_field(),
        Field::new("x", DataType::Float64, true),
        Field::new("ph_total", DataType::Float64, true),
        Field::new("partition", DataType::Utf8, true),
    ]));
    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(TimestampNanosecondArray::from(
                seconds.iter().map(|s| s * SECOND).collect::<Vec<_>>(),
            )),
            Arc::new(Float64Array::from(x.to_vec())),
            Arc::new(Float64Array::from(ph.to_vec())),
            Arc::new(StringArray::from(vec!["data"; seconds.len()])),
        ],
    )
    .unwrap();
    Dataset::try_new(batch).unwrap()
}

pub fn x_dataset(seconds: &[i64], x: &[f64]) -> Dataset {
    let x: Vec<Option<f64>> = x.iter().copied().map(Some).collect();
    sensor_dataset(seconds, &x, &vec![None; seconds.len()])
}

/// Ten minutes of samples every ten seconds, `x` counting up from zero.
pub fn ten_minutes() -> Dataset {
    let seconds: Vec<i64> = (0..60).map(|i| i * 10).collect();
    let x: Vec<f64> = (0..60).map(|i| i as f64).collect();
    x_dataset(&seconds, &x)
}

pub fn engine() -> QueryEngine {
    QueryEngine::new(RollingMean::defaults(), vec!["partition".to_string()])
}

pub fn seconds_of(view: &View) -> Vec<i64> {
    view.dataset().timestamps().values().iter().map(|ns| ns / SECOND).collect()
}

pub fn column(view: &View, name: &str) -> Vec<Option<f64>> {
    view.column_f64(name).unwrap()
}
