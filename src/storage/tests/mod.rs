pub mod errors;

use super::*;
use arrow::{
    array::{Float64Array, StringArray, TimestampNanosecondArray},
    datatypes::{DataType, Field, Schema},
    record_batch::RecordBatch,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;

pub const SECOND: i64 = 1_000_000_000;

pub fn test_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        timestamp_field(),
        Field::new("x", DataType::Float64, true),
    ]))
}

/// Batch of `x` readings at the given offsets in seconds.
pub fn create_test_batch(seconds: Vec<i64>, values: Vec<f64>) -> RecordBatch {
    let time_array = TimestampNanosecondArray::from(
        seconds.into_iter().map(|s| s * SECOND).collect::<Vec<_>>(),
    );
    let value_array = Float64Array::from(values);
    RecordBatch::try_new(test_schema(), vec![Arc::new(time_array), Arc::new(value_array)]).unwrap()
}

pub fn create_test_dataset(seconds: Vec<i64>, values: Vec<f64>) -> Dataset {
    Dataset::try_new(create_test_batch(seconds, values)).unwrap()
}

pub fn tagged_dataset(seconds: Vec<i64>, tags: Vec<&str>) -> Dataset {
    let schema = Arc::new(Schema::new(vec![
        timestamp_field(),
        Field::new("partition", DataType::Utf8, true),
    ]));
    let time_array = TimestampNanosecondArray::from(
        seconds.into_iter().map(|s| s * SECOND).collect::<Vec<_>>(),
    );
    let batch = RecordBatch::try_new(
        schema,
        vec![Arc::new(time_array), Arc::new(StringArray::from(tags))],
    )
    .unwrap();
    Dataset::try_new(batch).unwrap()
}

pub fn at(seconds: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(seconds, 0).unwrap()
}

pub fn seconds_of(dataset: &Dataset) -> Vec<i64> {
    dataset.timestamps().values().iter().map(|ns| ns / SECOND).collect()
}

pub fn x_values(dataset: &Dataset) -> Vec<f64> {
    dataset
        .column("x")
        .unwrap()
        .as_any()
        .downcast_ref::<Float64Array>()
        .unwrap()
        .values()
        .to_vec()
}
