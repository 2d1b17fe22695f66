use super::*;
use crate::config::{BackendDescriptor, SnapshotFormat, SnapshotSource};
use arrow::array::{Float64Array, Int64Array, StringArray, TimestampMillisecondArray};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::ipc::writer::FileWriter;
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use std::fs::File;
use std::sync::Arc;

fn epoch_batch(seconds: Vec<i64>, ph: Vec<f64>) -> RecordBatch {
    let schema = Arc::new(Schema::new(vec![
        Field::new("datetime_utc", DataType::Int64, false),
        Field::new("ph_total", DataType::Float64, true),
        Field::new("partition", DataType::Utf8, true),
    ]));
    let tags = vec!["data"; seconds.len()];
    RecordBatch::try_new(
        schema,
        vec![
            Arc::new(Int64Array::from(seconds)),
            Arc::new(Float64Array::from(ph)),
            Arc::new(StringArray::from(tags)),
        ],
    )
    .unwrap()
}

fn write_parquet(path: &Path, batch: &RecordBatch) {
    let file = File::create(path).unwrap();
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None).unwrap();
    writer.write(batch).unwrap();
    writer.close().unwrap();
}

fn write_ipc(path: &Path, batch: &RecordBatch) {
    let file = File::create(path).unwrap();
    let mut writer = FileWriter::try_new(file, &batch.schema()).unwrap();
    writer.write(batch).unwrap();
    writer.finish().unwrap();
}

fn snapshot_backend(path: &Path) -> SnapshotBackend {
    match BackendDescriptor::for_file(path) {
        BackendDescriptor::SnapshotFile(source) => SnapshotBackend::new(source),
        other => panic!("expected a snapshot descriptor, got {other:?}"),
    }
}

#[test]
fn test_parquet_load_and_rescan() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("underway.parquet");
    write_parquet(&path, &epoch_batch(vec![10, 0, 20], vec![8.1, 8.0, 8.2]));

    let backend = snapshot_backend(&path);
    assert_eq!(backend.kind(), BackendKind::SnapshotFile);
    assert!(!backend.kind().supports_incremental_fetch());

    let all = backend.load_all().unwrap();
    assert_eq!(seconds_of(&all), vec![0, 10, 20]);
    assert_eq!(f64_column(&all, "ph_total"), vec![Some(8.0), Some(8.1), Some(8.2)]);

    // The file is rewritten by its producer; the next fetch sees the whole new file.
    write_parquet(&path, &epoch_batch(vec![0, 10, 20, 30, 40], vec![8.0, 8.1, 8.2, 8.3, 8.4]));
    let newer = backend.fetch_since(at(20)).unwrap();
    assert_eq!(seconds_of(&newer), vec![30, 40]);
}

#[test]
fn test_ipc_with_millisecond_timestamps() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("underway.arrow");
    let schema = Arc::new(Schema::new(vec![
        Field::new(
            "datetime_utc",
            DataType::Timestamp(TimeUnit::Millisecond, Some("UTC".into())),
            true,
        ),
        Field::new("temp", DataType::Float64, true),
    ]));
    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(TimestampMillisecondArray::from(vec![Some(2_000), None, Some(1_500)]).with_timezone("UTC")),
            Arc::new(Float64Array::from(vec![2.0, 9.9, 1.5])),
        ],
    )
    .unwrap();
    write_ipc(&path, &batch);

    let dataset = snapshot_backend(&path).load_all().unwrap();

    assert_eq!(
        dataset.timestamps().values().to_vec(),
        vec![1_500_000_000, 2_000_000_000]
    );
    assert_eq!(f64_column(&dataset, "temp"), vec![Some(1.5), Some(2.0)]);
}

#[test]
fn test_missing_snapshot_is_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let backend = SnapshotBackend::new(SnapshotSource {
        path: dir.path().join("gone.parquet"),
        format: SnapshotFormat::Parquet,
        time_column: DEFAULT_TIME_COLUMN.to_string(),
    });

    assert!(matches!(backend.load_all(), Err(Error::BackendUnavailable(_))));
}

#[test]
fn test_snapshot_without_time_column_is_schema_mismatch() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("other.parquet");
    let schema = Arc::new(Schema::new(vec![Field::new("ph_total", DataType::Float64, true)]));
    let batch = RecordBatch::try_new(schema, vec![Arc::new(Float64Array::from(vec![8.0]))]).unwrap();
    write_parquet(&path, &batch);

    assert!(matches!(
        snapshot_backend(&path).load_all(),
        Err(Error::SchemaMismatch(_))
    ));
}
