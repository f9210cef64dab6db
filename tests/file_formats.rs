use std::fs::{self, File};
use std::path::Path;
use std::sync::Arc;

use arrow::array::{AsArray, BooleanArray, Float64Array, Int32Array, RecordBatch, StringArray};
use arrow::datatypes::{DataType, Field, Float64Type, Int32Type, Int64Type, Schema};
use goose_sql::{load_table, EngineConfig, Error, LoadOptions, Session};
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;

fn players() -> RecordBatch {
    let schema = Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int32, false),
        Field::new("name", DataType::Utf8, true),
        Field::new("score", DataType::Float64, true),
        Field::new("active", DataType::Boolean, false),
    ]));
    RecordBatch::try_new(
        schema,
        vec![
            Arc::new(Int32Array::from(vec![1, 2, 3, 4, 5, 6, 7])),
            Arc::new(StringArray::from(vec![
                Some("mia"),
                Some("leo"),
                None,
                Some("ada"),
                Some("kim"),
                Some("zoe"),
                Some("bo"),
            ])),
            Arc::new(Float64Array::from(vec![
                Some(8.5),
                Some(6.0),
                Some(9.25),
                None,
                Some(7.5),
                Some(3.0),
                Some(9.0),
            ])),
            Arc::new(BooleanArray::from(vec![
                true, false, true, true, false, true, false,
            ])),
        ],
    )
    .unwrap()
}

/// Write `batch` as parquet with small row groups
fn write_parquet(path: &Path, batch: &RecordBatch) {
    let props = WriterProperties::builder().set_max_row_group_size(3).build();
    let file = File::create(path).unwrap();
    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props)).unwrap();
    writer.write(batch).unwrap();
    writer.close().unwrap();
}

#[test]
fn test_parquet_row_groups_become_batches() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("players.parquet");
    write_parquet(&path, &players());

    let options = LoadOptions {
        batch_size: 3,
        ..LoadOptions::default()
    };
    let table = load_table(&path, "data", &options).unwrap();
    assert_eq!(table.num_rows(), 7);
    assert_eq!(table.batches().len(), 3);
    assert_eq!(table.column_names(), vec!["id", "name", "score", "active"]);
}

#[test]
fn test_parquet_column_projection() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("players.parquet");
    write_parquet(&path, &players());

    let options = LoadOptions {
        columns: Some(vec!["SCORE".to_string(), "id".to_string()]),
        ..LoadOptions::default()
    };
    let table = load_table(&path, "data", &options).unwrap();
    // Parquet projection keeps file order
    assert_eq!(table.column_names(), vec!["id", "score"]);
}

#[test]
fn test_parquet_aggregate_by_boolean() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("players.parquet");
    write_parquet(&path, &players());

    let mut session = Session::open(&path, EngineConfig::default()).unwrap();
    let batch = session
        .execute(
            "SELECT active, MAX(score) AS best, MIN(name) AS first, COUNT(score) AS scored \
             FROM data GROUP BY active ORDER BY active",
        )
        .unwrap()
        .to_batch()
        .unwrap();

    let active = batch.column(0).as_boolean();
    assert!(!active.value(0));
    assert!(active.value(1));
    let best = batch.column(1).as_primitive::<Float64Type>();
    assert_eq!(best.values().to_vec(), vec![9.0, 9.25]);
    let first = batch.column(2).as_string::<i32>();
    assert_eq!(first.value(0), "bo");
    assert_eq!(first.value(1), "ada");
    assert_eq!(
        batch.column(3).as_primitive::<Int64Type>().values().to_vec(),
        vec![3, 3]
    );
}

#[test]
fn test_parquet_search_and_describe() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("players.parquet");
    write_parquet(&path, &players());

    let mut session = Session::open(&path, EngineConfig::default()).unwrap();
    session.search("score", ".5", true).unwrap();
    let ids = session.view().to_batch().unwrap();
    assert_eq!(
        ids.column(0).as_primitive::<Int32Type>().values().to_vec(),
        vec![1, 5]
    );

    session.reset();
    let stats = session.describe("score").unwrap();
    assert_eq!(stats.count, 6);
    assert_eq!(stats.null_count, 1);
    assert_eq!(stats.min.as_deref(), Some("3.0"));
    assert_eq!(stats.max.as_deref(), Some("9.25"));
    assert_eq!(stats.mean, Some(43.25 / 6.0));
}

#[test]
fn test_json_lines_and_arrays() {
    let dir = tempfile::tempdir().unwrap();
    let lines = dir.path().join("events.jsonl");
    fs::write(
        &lines,
        "{\"kind\": \"click\", \"ms\": 12}\n{\"kind\": \"view\", \"ms\": 40}\n{\"kind\": \"click\", \"ms\": 8}\n",
    )
    .unwrap();
    let array = dir.path().join("events.json");
    fs::write(
        &array,
        "[{\"kind\": \"click\", \"ms\": 12}, {\"kind\": \"view\", \"ms\": 40}, {\"kind\": \"click\", \"ms\": 8}]",
    )
    .unwrap();

    for path in [&lines, &array] {
        let mut session = Session::open(path, EngineConfig::default()).unwrap();
        let batch = session
            .execute("SELECT kind, SUM(ms) AS total FROM data GROUP BY kind ORDER BY kind")
            .unwrap()
            .to_batch()
            .unwrap();
        let kinds = batch.column(0).as_string::<i32>();
        assert_eq!(kinds.value(0), "click");
        assert_eq!(kinds.value(1), "view");
        assert_eq!(
            batch.column(1).as_primitive::<Int64Type>().values().to_vec(),
            vec![20, 40]
        );
    }
}

#[test]
fn test_unsupported_and_missing_files() {
    let dir = tempfile::tempdir().unwrap();
    let xlsx = dir.path().join("sheet.xlsx");
    fs::write(&xlsx, b"not really a spreadsheet").unwrap();
    assert!(matches!(
        Session::open(&xlsx, EngineConfig::default()),
        Err(Error::UnsupportedFormat(_))
    ));

    let missing = dir.path().join("missing.csv");
    assert!(matches!(
        Session::open(&missing, EngineConfig::default()),
        Err(Error::InvalidPath(_))
    ));
}

#[test]
fn test_custom_table_name() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("players.parquet");
    write_parquet(&path, &players());

    let config = EngineConfig {
        table_name: "players".to_string(),
        ..EngineConfig::default()
    };
    let mut session = Session::open(&path, config).unwrap();
    assert_eq!(
        session.execute("SELECT id FROM players").unwrap().total_rows(),
        7
    );
    assert!(matches!(
        session.execute("SELECT id FROM data"),
        Err(Error::UnknownTable(_))
    ));
}
