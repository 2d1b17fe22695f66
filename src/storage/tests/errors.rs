use super::*;
use arrow::array::StringArray;

#[test]
fn test_schema_mismatch() {
    // Create batch whose first column is not the timestamp key
    let bad_schema = Schema::new(vec![
        Field::new("time", DataType::Utf8, false),
        Field::new("value", DataType::Float64, false),
    ]);
    let batch = RecordBatch::try_new(
        Arc::new(bad_schema),
        vec![
            Arc::new(StringArray::from(vec!["not a timestamp"])),
            Arc::new(Float64Array::from(vec![1.0])),
        ]
    ).unwrap();

    let result = Dataset::try_new(batch);
    assert!(matches!(result, Err(Error::SchemaMismatch(_))));
}

#[test]
fn test_key_column_cannot_be_replaced() {
    let dataset = create_test_dataset(vec![0], vec![1.0]);
    let result = dataset.with_column(TIMESTAMP_COLUMN, Arc::new(Float64Array::from(vec![1.0])));
    assert!(matches!(result, Err(Error::SchemaMismatch(_))));
}

#[test]
fn test_transient_errors() {
    assert!(Error::BackendUnavailable("connection refused".into()).is_transient());
    assert!(!Error::SchemaMismatch("missing datetime_utc".into()).is_transient());
}
