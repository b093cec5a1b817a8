//! Result sinks: CSV files on disk and an in-memory recorder for tests.
use super::rows::ResultRow;
use crate::error::{AppResult, BenchError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Text encoding of result files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
    /// Plain UTF-8.
    #[default]
    Utf8,
    /// UTF-8 with a byte-order mark, for spreadsheet tools that need one.
    Utf8Bom,
}

/// Overwrite-or-append line writer for result tables.
pub trait ResultSink: Send + Sync {
    /// Write `rows` to `path`, appending or overwriting.
    fn write(
        &self,
        path: &Path,
        rows: &[ResultRow],
        append: bool,
        encoding: Encoding,
    ) -> AppResult<()>;
}

// ============================================================================
// CSV Writer
// ============================================================================

/// Writes rows as CSV; comment and section rows are written verbatim.
#[derive(Debug, Default, Clone, Copy)]
pub struct CsvSink;

impl CsvSink {
    /// A sink writing to the local filesystem.
    pub fn new() -> Self {
        Self
    }
}

impl ResultSink for CsvSink {
    fn write(
        &self,
        path: &Path,
        rows: &[ResultRow],
        append: bool,
        encoding: Encoding,
    ) -> AppResult<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let fresh = !append || !path.exists();
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(path)?;
        if fresh && encoding == Encoding::Utf8Bom {
            file.write_all(UTF8_BOM)?;
        }

        let mut buffer = Vec::new();
        for row in rows {
            match row {
                ResultRow::Cells(cells) => buffer.extend(encode_cells(cells)?),
                ResultRow::Section(text) | ResultRow::Comment(text) => {
                    buffer.extend_from_slice(text.as_bytes());
                    buffer.push(b'\n');
                }
            }
        }
        file.write_all(&buffer)?;
        file.flush()?;

        debug!(path = %path.display(), rows = rows.len(), append, "result rows written");
        Ok(())
    }
}

/// One CSV record, quoted as needed, with its line terminator.
fn encode_cells(cells: &[String]) -> AppResult<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .flexible(true)
        .has_headers(false)
        .from_writer(Vec::new());
    writer.write_record(cells)?;
    writer
        .into_inner()
        .map_err(|err| BenchError::Io(err.into_error()))
}

// ============================================================================
// In-memory sink
// ============================================================================

/// One recorded call to [`ResultSink::write`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkWrite {
    /// Target file.
    pub path: PathBuf,
    /// Rows written by the call.
    pub rows: Vec<ResultRow>,
    /// Whether the call appended.
    pub append: bool,
}

/// Records every write instead of touching the filesystem.
#[derive(Debug, Default)]
pub struct MemorySink {
    writes: Mutex<Vec<SinkWrite>>,
}

impl MemorySink {
    /// An empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every write so far, in call order.
    pub fn writes(&self) -> Vec<SinkWrite> {
        self.writes
            .lock()
            .map(|w| w.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    /// File contents as they would be on disk after all recorded writes.
    pub fn files(&self) -> BTreeMap<PathBuf, Vec<ResultRow>> {
        let mut files: BTreeMap<PathBuf, Vec<ResultRow>> = BTreeMap::new();
        for write in self.writes() {
            let content = files.entry(write.path).or_default();
            if !write.append {
                content.clear();
            }
            content.extend(write.rows);
        }
        files
    }

    /// Whether any file name written so far contains `fragment`.
    pub fn has_file_containing(&self, fragment: &str) -> bool {
        self.writes()
            .iter()
            .any(|w| w.path.to_string_lossy().contains(fragment))
    }
}

impl ResultSink for MemorySink {
    fn write(
        &self,
        path: &Path,
        rows: &[ResultRow],
        append: bool,
        _encoding: Encoding,
    ) -> AppResult<()> {
        let record = SinkWrite {
            path: path.to_path_buf(),
            rows: rows.to_vec(),
            append,
        };
        match self.writes.lock() {
            Ok(mut writes) => writes.push(record),
            Err(poisoned) => poisoned.into_inner().push(record),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<ResultRow> {
        vec![
            ResultRow::section("Data"),
            ResultRow::cells(["Item1", "1.0", "2.0"]),
            ResultRow::comment("no trigger"),
        ]
    }

    #[test]
    fn test_csv_sink_overwrite_and_append() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("out").join("result.csv");
        let sink = CsvSink::new();

        sink.write(&path, &sample(), false, Encoding::Utf8).expect("write");
        sink.write(&path, &[ResultRow::cells(["Item2", "3.0"])], true, Encoding::Utf8)
            .expect("append");

        let text = fs::read_to_string(&path).expect("read back");
        assert_eq!(text, "Data\nItem1,1.0,2.0\n# no trigger\nItem2,3.0\n");

        sink.write(&path, &[ResultRow::section("Data")], false, Encoding::Utf8)
            .expect("overwrite");
        assert_eq!(fs::read_to_string(&path).expect("read back"), "Data\n");
    }

    #[test]
    fn test_comment_rows_are_not_quoted() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("comments.csv");
        let rows = vec![
            ResultRow::comment("# WARN:DMM1 read, retrying"),
            ResultRow::cells(["Item1", "a,b", "2.0"]),
        ];

        CsvSink::new()
            .write(&path, &rows, false, Encoding::Utf8)
            .expect("write");

        let text = fs::read_to_string(&path).expect("read back");
        assert_eq!(text, "# WARN:DMM1 read, retrying\nItem1,\"a,b\",2.0\n");
    }

    #[test]
    fn test_bom_only_on_create() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("bom.csv");
        let sink = CsvSink::new();

        sink.write(&path, &[ResultRow::section("Data")], true, Encoding::Utf8Bom)
            .expect("create");
        sink.write(&path, &[ResultRow::section("More")], true, Encoding::Utf8Bom)
            .expect("append");

        let bytes = fs::read(&path).expect("read back");
        assert!(bytes.starts_with(UTF8_BOM));
        assert_eq!(&bytes[UTF8_BOM.len()..], b"Data\nMore\n");
    }

    #[test]
    fn test_memory_sink_replays_overwrites() {
        let sink = MemorySink::new();
        let path = Path::new("x.csv");
        sink.write(path, &sample(), false, Encoding::Utf8).expect("write");
        sink.write(path, &[ResultRow::section("Data")], false, Encoding::Utf8)
            .expect("write");
        sink.write(path, &[ResultRow::comment("tail")], true, Encoding::Utf8)
            .expect("write");

        let files = sink.files();
        assert_eq!(
            files.get(path),
            Some(&vec![ResultRow::section("Data"), ResultRow::comment("tail")])
        );
        assert_eq!(sink.writes().len(), 3);
        assert!(sink.has_file_containing("x.csv"));
    }
}
