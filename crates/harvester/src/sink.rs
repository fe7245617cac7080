//! Append-only tabular output.
//!
//! Jobs hand finished batches of [`OutputRecord`]s to a [`RecordSink`]. The
//! CSV implementation keeps one file per [`Table`] and fixes each file's
//! column order when it is first created.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use serde_json::Value;
use thiserror::Error;

/// Logical output tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Table {
    Commits,
    FileChanges,
    PullRequests,
    Developers,
    FollowRelationships,
    ReviewRelationships,
}

impl Table {
    pub const ALL: [Table; 6] = [
        Table::Commits,
        Table::FileChanges,
        Table::PullRequests,
        Table::Developers,
        Table::FollowRelationships,
        Table::ReviewRelationships,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Table::Commits => "commits",
            Table::FileChanges => "file_changes",
            Table::PullRequests => "pull_requests",
            Table::Developers => "developers",
            Table::FollowRelationships => "follow_relationships",
            Table::ReviewRelationships => "review_relationships",
        }
    }

    /// File name used by [`CsvSink`].
    #[must_use]
    pub fn file_name(self) -> String {
        format!("{}.csv", self.as_str())
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A scalar cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl FieldValue {
    /// Convert a JSON scalar. Arrays and objects are kept as compact JSON text.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => FieldValue::Null,
            Value::Bool(b) => FieldValue::Bool(*b),
            Value::Number(n) => n
                .as_i64()
                .map(FieldValue::Int)
                .or_else(|| n.as_f64().map(FieldValue::Float))
                .unwrap_or_else(|| FieldValue::Text(n.to_string())),
            Value::String(s) => FieldValue::Text(s.clone()),
            other => FieldValue::Text(other.to_string()),
        }
    }

    /// Cell text. `Null` renders as an empty cell.
    #[must_use]
    pub fn render(&self) -> String {
        match self {
            FieldValue::Null => String::new(),
            FieldValue::Bool(b) => b.to_string(),
            FieldValue::Int(i) => i.to_string(),
            FieldValue::Float(f) => f.to_string(),
            FieldValue::Text(s) => s.clone(),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Int(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(FieldValue::Null, Into::into)
    }
}

/// One flat output row: ordered field names and values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutputRecord {
    fields: Vec<(&'static str, FieldValue)>,
}

impl OutputRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style field setter.
    #[must_use]
    pub fn with(mut self, name: &'static str, value: impl Into<FieldValue>) -> Self {
        self.set(name, value);
        self
    }

    /// Set a field, replacing an existing value in place.
    pub fn set(&mut self, name: &'static str, value: impl Into<FieldValue>) {
        let value = value.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => *existing = value,
            None => self.fields.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|(n, _)| *n == name).map(|(_, v)| v)
    }

    /// Field names in insertion order.
    pub fn columns(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields.iter().map(|(n, _)| *n)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("CSV error on {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// Destination for finished record batches.
pub trait RecordSink: Send {
    /// Append `records` to `table`, creating it if needed.
    ///
    /// An empty slice is a no-op. Returns the number of rows written.
    fn append(&mut self, table: Table, records: &[OutputRecord]) -> Result<usize, SinkError>;
}

/// CSV files in a single directory, one per table.
#[derive(Debug, Clone)]
pub struct CsvSink {
    dir: PathBuf,
}

impl CsvSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file backing `table`.
    #[must_use]
    pub fn path(&self, table: Table) -> PathBuf {
        self.dir.join(table.file_name())
    }
}

/// Header of an existing, non-empty CSV file.
fn read_header(path: &Path) -> Result<Option<Vec<String>>, SinkError> {
    let metadata = match fs::metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(SinkError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    if metadata.len() == 0 {
        return Ok(None);
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_path(path)
        .map_err(|source| SinkError::Csv {
            path: path.to_path_buf(),
            source,
        })?;
    match reader.records().next() {
        Some(Ok(record)) => Ok(Some(record.iter().map(str::to_string).collect())),
        Some(Err(source)) => Err(SinkError::Csv {
            path: path.to_path_buf(),
            source,
        }),
        None => Ok(None),
    }
}

impl RecordSink for CsvSink {
    fn append(&mut self, table: Table, records: &[OutputRecord]) -> Result<usize, SinkError> {
        let Some(first) = records.first() else {
            return Ok(0);
        };
        let path = self.path(table);
        let io_err = |source| SinkError::Io {
            path: path.clone(),
            source,
        };
        let csv_err = |source| SinkError::Csv {
            path: path.clone(),
            source,
        };

        fs::create_dir_all(&self.dir).map_err(io_err)?;

        let existing = read_header(&path)?;
        let write_header = existing.is_none();
        let header: Vec<String> =
            existing.unwrap_or_else(|| first.columns().map(str::to_string).collect());

        let file: File = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(io_err)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);

        if write_header {
            writer.write_record(&header).map_err(csv_err)?;
        }

        for record in records {
            for column in record.columns() {
                if !header.iter().any(|h| h == column) {
                    tracing::warn!(
                        table = %table,
                        column,
                        "Dropping field not present in existing header"
                    );
                }
            }
            let row: Vec<String> = header
                .iter()
                .map(|column| record.get(column).map(FieldValue::render).unwrap_or_default())
                .collect();
            writer.write_record(&row).map_err(csv_err)?;
        }
        writer.flush().map_err(io_err)?;

        tracing::debug!(
            table = %table,
            path = %path.display(),
            rows = records.len(),
            created = write_header,
            "Appended records"
        );
        Ok(records.len())
    }
}

/// In-memory sink for unit tests.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MemorySink {
    pub tables: std::collections::BTreeMap<Table, Vec<OutputRecord>>,
    /// Number of non-empty `append` calls per table.
    pub writes: std::collections::BTreeMap<Table, usize>,
}

#[cfg(test)]
impl MemorySink {
    pub fn rows(&self, table: Table) -> &[OutputRecord] {
        self.tables.get(&table).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn write_count(&self, table: Table) -> usize {
        self.writes.get(&table).copied().unwrap_or_default()
    }
}

#[cfg(test)]
impl RecordSink for MemorySink {
    fn append(&mut self, table: Table, records: &[OutputRecord]) -> Result<usize, SinkError> {
        if records.is_empty() {
            return Ok(0);
        }
        *self.writes.entry(table).or_default() += 1;
        self.tables
            .entry(table)
            .or_default()
            .extend(records.iter().cloned());
        Ok(records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ab(a: i64, b: i64) -> OutputRecord {
        OutputRecord::new().with("a", a).with("b", b)
    }

    #[test]
    fn fresh_table_gets_header_then_bare_rows() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = CsvSink::new(dir.path());

        assert_eq!(sink.append(Table::Commits, &[ab(1, 2)]).unwrap(), 1);
        assert_eq!(
            fs::read_to_string(sink.path(Table::Commits)).unwrap(),
            "a,b\n1,2\n"
        );

        sink.append(Table::Commits, &[ab(3, 4)]).unwrap();
        assert_eq!(
            fs::read_to_string(sink.path(Table::Commits)).unwrap(),
            "a,b\n1,2\n3,4\n"
        );
    }

    #[test]
    fn empty_batch_does_not_create_file() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let mut sink = CsvSink::new(&out);

        assert_eq!(sink.append(Table::Developers, &[]).unwrap(), 0);
        assert!(!out.exists());
    }

    #[test]
    fn appends_follow_existing_column_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = CsvSink::new(dir.path());
        sink.append(Table::PullRequests, &[ab(1, 2)]).unwrap();

        let reordered = OutputRecord::new()
            .with("b", 20)
            .with("c", "ignored")
            .with("a", 10);
        let partial = OutputRecord::new().with("b", 30);
        sink.append(Table::PullRequests, &[reordered, partial])
            .expect("append");

        assert_eq!(
            fs::read_to_string(sink.path(Table::PullRequests)).unwrap(),
            "a,b\n1,2\n10,20\n,30\n"
        );
    }

    #[test]
    fn text_with_delimiters_is_quoted() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = CsvSink::new(dir.path());
        let record = OutputRecord::new()
            .with("message", "fix: a, b\nand \"c\"")
            .with("author", FieldValue::Null);

        sink.append(Table::Commits, &[record]).unwrap();

        let mut reader = csv::Reader::from_path(sink.path(Table::Commits)).unwrap();
        let row = reader.records().next().unwrap().unwrap();
        assert_eq!(&row[0], "fix: a, b\nand \"c\"");
        assert_eq!(&row[1], "");
    }

    #[test]
    fn field_value_from_json() {
        assert_eq!(FieldValue::from_json(&Value::Null), FieldValue::Null);
        assert_eq!(
            FieldValue::from_json(&serde_json::json!(42)),
            FieldValue::Int(42)
        );
        assert_eq!(
            FieldValue::from_json(&serde_json::json!(1.5)),
            FieldValue::Float(1.5)
        );
        assert_eq!(
            FieldValue::from_json(&serde_json::json!("x")),
            FieldValue::Text("x".to_string())
        );
        assert_eq!(
            FieldValue::from_json(&serde_json::json!(["a"])).render(),
            "[\"a\"]"
        );
    }

    #[test]
    fn record_set_replaces_existing_value() {
        let mut record = ab(1, 2);
        record.set("a", 5);
        assert_eq!(record.get("a"), Some(&FieldValue::Int(5)));
        assert_eq!(record.columns().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(FieldValue::from(None::<String>), FieldValue::Null);
    }
}
