//! File readers: Parquet, CSV and JSON into an in-memory [`Table`]

use std::fs::{self, File};
use std::io::{Cursor, Read};
use std::path::Path;
use std::sync::Arc;

use arrow::array::RecordBatch;
use arrow::compute::cast;
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatchReader;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ProjectionMask;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::memory::Table;
use crate::utils::resolve_column;

/// Supported input formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileFormat {
    Parquet,
    Csv,
    Json,
}

impl std::fmt::Display for FileFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileFormat::Parquet => write!(f, "Parquet"),
            FileFormat::Csv => write!(f, "CSV"),
            FileFormat::Json => write!(f, "JSON"),
        }
    }
}

impl FileFormat {
    /// Pick the format from the file extension (case-insensitive)
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "parquet" | "pq" => Ok(FileFormat::Parquet),
            "csv" | "tsv" | "txt" => Ok(FileFormat::Csv),
            "json" | "jsonl" | "ndjson" => Ok(FileFormat::Json),
            _ => Err(Error::UnsupportedFormat(path.display().to_string())),
        }
    }
}

/// Options controlling how a file is read
#[derive(Debug, Clone, PartialEq)]
pub struct LoadOptions {
    /// Rows per record batch
    pub batch_size: usize,
    /// Only load these columns (all when `None`)
    pub columns: Option<Vec<String>>,
    /// Records sampled for CSV/JSON schema inference
    pub infer_rows: usize,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            batch_size: 8192,
            columns: None,
            infer_rows: 1000,
        }
    }
}

/// Load a file into memory under `table_name`
pub fn load_table(path: &Path, table_name: &str, options: &LoadOptions) -> Result<Table> {
    if !path.is_file() {
        return Err(Error::InvalidPath(path.display().to_string()));
    }
    let format = FileFormat::from_path(path)?;
    info!(path = %path.display(), %format, table = table_name, "Loading file");

    let (schema, batches) = match format {
        FileFormat::Parquet => read_parquet(path, options)?,
        FileFormat::Csv => read_csv(path, options)?,
        FileFormat::Json => read_json(path, options)?,
    };
    let (schema, batches) = decode_dictionaries(schema, batches)?;

    let table = Table::new(table_name, schema, batches)?;
    info!(
        rows = table.num_rows(),
        columns = table.num_columns(),
        batches = table.batches().len(),
        "File loaded"
    );
    Ok(table)
}

/// Read a parquet file with optional column projection
fn read_parquet(path: &Path, options: &LoadOptions) -> Result<(SchemaRef, Vec<RecordBatch>)> {
    let file = File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let arrow_schema = builder.schema().clone();

    let mut builder = builder.with_batch_size(options.batch_size);
    if let Some(columns) = &options.columns {
        let indices = columns
            .iter()
            .map(|name| resolve_column(&arrow_schema, name))
            .collect::<Result<Vec<usize>>>()?;
        let projection = ProjectionMask::roots(builder.parquet_schema(), indices);
        builder = builder.with_projection(projection);
    }

    let reader = builder.build()?;
    let schema = reader.schema();
    let batches = reader.collect::<std::result::Result<Vec<_>, _>>()?;
    debug!(batches = batches.len(), "Parquet row groups decoded");
    Ok((schema, batches))
}

/// Read a CSV file, inferring the schema from the leading records
fn read_csv(path: &Path, options: &LoadOptions) -> Result<(SchemaRef, Vec<RecordBatch>)> {
    let bytes = decode_text(fs::read(path)?);
    let is_tsv = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("tsv"));
    let delimiter = if is_tsv { b'\t' } else { b',' };

    let format = arrow::csv::reader::Format::default()
        .with_header(true)
        .with_delimiter(delimiter);
    let mut cursor = Cursor::new(bytes);
    let (schema, _) = format.infer_schema(&mut cursor, Some(options.infer_rows))?;
    let schema = Arc::new(schema);
    cursor.set_position(0);

    let reader = arrow::csv::ReaderBuilder::new(schema.clone())
        .with_header(true)
        .with_delimiter(delimiter)
        .with_batch_size(options.batch_size)
        .build(cursor)?;
    let batches = reader.collect::<std::result::Result<Vec<_>, _>>()?;
    project(schema, batches, options)
}

/// Read newline-delimited JSON (or a top-level JSON array of objects)
fn read_json(path: &Path, options: &LoadOptions) -> Result<(SchemaRef, Vec<RecordBatch>)> {
    let mut bytes = Vec::new();
    File::open(path)?.read_to_end(&mut bytes)?;

    let first = bytes.iter().find(|b| !b.is_ascii_whitespace()).copied();
    if first == Some(b'[') {
        bytes = array_to_ndjson(&bytes)?;
    }

    let mut cursor = Cursor::new(bytes);
    let (schema, _) =
        arrow::json::reader::infer_json_schema_from_seekable(&mut cursor, Some(options.infer_rows))?;
    let schema = Arc::new(schema);
    cursor.set_position(0);

    let reader = arrow::json::ReaderBuilder::new(schema.clone())
        .with_batch_size(options.batch_size)
        .build(cursor)?;
    let batches = reader.collect::<std::result::Result<Vec<_>, _>>()?;
    project(schema, batches, options)
}

/// Rewrite `[{...}, {...}]` as one object per line
fn array_to_ndjson(bytes: &[u8]) -> Result<Vec<u8>> {
    let rows: Vec<serde_json::Value> = serde_json::from_slice(bytes)?;
    let mut out = Vec::with_capacity(bytes.len());
    for row in rows {
        serde_json::to_writer(&mut out, &row)?;
        out.push(b'\n');
    }
    Ok(out)
}

/// Apply a column subset after reading (formats without pushdown)
fn project(
    schema: SchemaRef,
    batches: Vec<RecordBatch>,
    options: &LoadOptions,
) -> Result<(SchemaRef, Vec<RecordBatch>)> {
    let Some(columns) = &options.columns else {
        return Ok((schema, batches));
    };
    let indices = columns
        .iter()
        .map(|name| resolve_column(&schema, name))
        .collect::<Result<Vec<usize>>>()?;
    let projected = Arc::new(schema.project(&indices)?);
    let batches = batches
        .iter()
        .map(|b| b.project(&indices))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok((projected, batches))
}

/// Replace dictionary-encoded columns with their plain value type
fn decode_dictionaries(
    schema: SchemaRef,
    batches: Vec<RecordBatch>,
) -> Result<(SchemaRef, Vec<RecordBatch>)> {
    let has_dictionary = schema
        .fields()
        .iter()
        .any(|f| matches!(f.data_type(), DataType::Dictionary(_, _)));
    if !has_dictionary {
        return Ok((schema, batches));
    }

    let fields: Vec<Field> = schema
        .fields()
        .iter()
        .map(|f| match f.data_type() {
            DataType::Dictionary(_, value) => f.as_ref().clone().with_data_type(value.as_ref().clone()),
            _ => f.as_ref().clone(),
        })
        .collect();
    let decoded = Arc::new(Schema::new_with_metadata(fields, schema.metadata().clone()));

    let batches = batches
        .iter()
        .map(|batch| {
            let columns = batch
                .columns()
                .iter()
                .zip(decoded.fields())
                .map(|(col, field)| {
                    if col.data_type() == field.data_type() {
                        Ok(col.clone())
                    } else {
                        cast(col, field.data_type())
                    }
                })
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(RecordBatch::try_new(decoded.clone(), columns)?)
        })
        .collect::<Result<Vec<_>>>()?;
    Ok((decoded, batches))
}

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Make CSV bytes valid UTF-8
///
/// Strips a UTF-8 byte order mark. Bytes that are not valid UTF-8 are treated
/// as Windows-1252, the usual encoding of spreadsheet exports.
fn decode_text(bytes: Vec<u8>) -> Vec<u8> {
    let bytes = if bytes.starts_with(UTF8_BOM) {
        bytes[UTF8_BOM.len()..].to_vec()
    } else {
        bytes
    };
    match String::from_utf8(bytes) {
        Ok(text) => text.into_bytes(),
        Err(e) => {
            warn!(
                valid_up_to = e.utf8_error().valid_up_to(),
                "CSV is not valid UTF-8, decoding as Windows-1252"
            );
            let bytes = e.into_bytes();
            let text: String = bytes.iter().map(|&b| windows_1252_char(b)).collect();
            text.into_bytes()
        }
    }
}

/// Windows-1252 code points for 0x80..=0x9F; everything else maps like Latin-1
const WINDOWS_1252_HIGH: [char; 32] = [
    '\u{20AC}', '\u{FFFD}', '\u{201A}', '\u{0192}', '\u{201E}', '\u{2026}', '\u{2020}', '\u{2021}',
    '\u{02C6}', '\u{2030}', '\u{0160}', '\u{2039}', '\u{0152}', '\u{FFFD}', '\u{017D}', '\u{FFFD}',
    '\u{FFFD}', '\u{2018}', '\u{2019}', '\u{201C}', '\u{201D}', '\u{2022}', '\u{2013}', '\u{2014}',
    '\u{02DC}', '\u{2122}', '\u{0161}', '\u{203A}', '\u{0153}', '\u{FFFD}', '\u{017E}', '\u{0178}',
];

fn windows_1252_char(b: u8) -> char {
    match b {
        0x80..=0x9F => WINDOWS_1252_HIGH[(b - 0x80) as usize],
        _ => b as char,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Array, AsArray, Int64Array, StringArray};
    use arrow::datatypes::Int64Type;
    use std::path::PathBuf;

    #[test]
    fn test_format_from_path() {
        assert_eq!(
            FileFormat::from_path(&PathBuf::from("a/lineitem.PARQUET")).unwrap(),
            FileFormat::Parquet
        );
        assert_eq!(FileFormat::from_path(&PathBuf::from("x.tsv")).unwrap(), FileFormat::Csv);
        assert_eq!(FileFormat::from_path(&PathBuf::from("x.ndjson")).unwrap(), FileFormat::Json);
        assert!(matches!(
            FileFormat::from_path(&PathBuf::from("x.xlsx")),
            Err(Error::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_decode_text_windows_1252() {
        // "café €5" in Windows-1252
        let bytes = vec![b'c', b'a', b'f', 0xE9, b' ', 0x80, b'5'];
        let decoded = String::from_utf8(decode_text(bytes)).unwrap();
        assert_eq!(decoded, "café €5");
    }

    #[test]
    fn test_decode_text_strips_bom() {
        let bytes = vec![0xEF, 0xBB, 0xBF, b'a', b',', b'b'];
        assert_eq!(decode_text(bytes), b"a,b".to_vec());
    }

    #[test]
    fn test_read_csv_with_projection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("people.csv");
        std::fs::write(&path, "id,name,age\n1,ann,30\n2,bob,41\n").unwrap();

        let options = LoadOptions {
            columns: Some(vec!["AGE".into(), "id".into()]),
            ..Default::default()
        };
        let table = load_table(&path, "people", &options).unwrap();
        assert_eq!(table.column_names(), vec!["age", "id"]);
        let batch = table.to_batch().unwrap();
        assert_eq!(batch.column(0).as_primitive::<Int64Type>().values().to_vec(), vec![30, 41]);
    }

    #[test]
    fn test_read_json_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.json");
        std::fs::write(&path, r#"[{"k": "a", "v": 1}, {"k": "b", "v": 2}]"#).unwrap();

        let table = load_table(&path, "rows", &LoadOptions::default()).unwrap();
        assert_eq!(table.num_rows(), 2);
        let batch = table.to_batch().unwrap();
        let k = batch.column(0).as_string::<i32>();
        assert_eq!(k.value(1), "b");
    }

    #[test]
    fn test_decode_dictionaries() {
        use arrow::array::DictionaryArray;
        use arrow::datatypes::Int32Type;

        let dict: DictionaryArray<Int32Type> = vec!["x", "y", "x"].into_iter().collect();
        let schema = Arc::new(Schema::new(vec![
            Field::new("tag", dict.data_type().clone(), true),
            Field::new("n", DataType::Int64, false),
        ]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![Arc::new(dict), Arc::new(Int64Array::from(vec![1, 2, 3]))],
        )
        .unwrap();

        let (schema, batches) = decode_dictionaries(schema, vec![batch]).unwrap();
        assert_eq!(schema.field(0).data_type(), &DataType::Utf8);
        let tags = batches[0]
            .column(0)
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        assert_eq!(tags.value(2), "x");
    }

    #[test]
    fn test_missing_file() {
        let err = load_table(Path::new("/nonexistent/file.csv"), "t", &LoadOptions::default());
        assert!(matches!(err, Err(Error::InvalidPath(_))));
    }
}
