//! Append-only CSV persistence
//!
//! Each output record type has a fixed column schema; the sink writes
//! the header once on creation and only ever appends after that. Reads
//! validate the header row exactly, so files with unknown or reordered
//! columns are rejected instead of silently misparsed.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Append-only writer for one CSV file with a fixed schema
#[derive(Debug)]
pub struct CsvSink {
    path: PathBuf,
    columns: usize,
    // Appends from concurrent repository workers must not interleave rows
    write_lock: Mutex<()>,
}

impl CsvSink {
    /// Open the sink, writing the header row when the file is new
    pub fn open(path: &Path, headers: &[&str]) -> Result<CsvSink> {
        let needs_header = match std::fs::metadata(path) {
            Ok(meta) => meta.len() == 0,
            Err(_) => true,
        };
        if needs_header {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create directory: {}", parent.display()))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to create sink: {}", path.display()))?;
            let mut writer = csv::Writer::from_writer(file);
            writer.write_record(headers).context("failed to write CSV header")?;
            writer.flush().context("failed to flush CSV header")?;
        }
        Ok(CsvSink {
            path: path.to_path_buf(),
            columns: headers.len(),
            write_lock: Mutex::new(()),
        })
    }

    /// Append one row; never updates or deletes existing rows
    pub fn append(&self, row: &[String]) -> Result<()> {
        anyhow::ensure!(
            row.len() == self.columns,
            "row has {} fields, schema has {}",
            row.len(),
            self.columns
        );
        let _guard = self.write_lock.lock().expect("sink lock poisoned");
        let file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open sink: {}", self.path.display()))?;
        let mut writer = csv::Writer::from_writer(file);
        writer.write_record(row).context("failed to append CSV row")?;
        writer.flush().context("failed to flush CSV row")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Read all rows of a CSV file, validating the header exactly
pub fn read_rows(path: &Path, expected_headers: &[&str]) -> Result<Vec<Vec<String>>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open CSV: {}", path.display()))?;
    let headers = reader.headers().context("missing CSV header")?;
    let actual: Vec<&str> = headers.iter().collect();
    anyhow::ensure!(
        actual == expected_headers,
        "unexpected CSV columns in {}: {:?}",
        path.display(),
        actual
    );

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.context("invalid CSV row")?;
        rows.push(record.iter().map(str::to_string).collect());
    }
    Ok(rows)
}

/// Repository names already present in an output file's first column
///
/// Used to resume an interrupted run; a missing file is an empty set.
pub fn done_repos(path: &Path) -> Result<HashSet<String>> {
    if !path.exists() {
        return Ok(HashSet::new());
    }
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open CSV: {}", path.display()))?;
    let mut done = HashSet::new();
    for record in reader.records() {
        let record = record.context("invalid CSV row")?;
        if let Some(name) = record.get(0) {
            done.insert(name.to_string());
        }
    }
    Ok(done)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::PATCH_HEADERS;

    #[test]
    fn writes_header_once_and_appends() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("Patches.csv");

        let sink = CsvSink::open(&path, &PATCH_HEADERS).expect("open");
        let row: Vec<String> = vec![
            "acme/vault".into(),
            "null".into(),
            "null".into(),
            "abc".into(),
            "False".into(),
            "Vault".into(),
            "withdraw".into(),
            "contracts/Vault.sol".into(),
            "Slither:locked-ether(3)".into(),
        ];
        sink.append(&row).expect("append");

        // Reopening must not duplicate the header
        let sink = CsvSink::open(&path, &PATCH_HEADERS).expect("reopen");
        sink.append(&row).expect("append again");

        let rows = read_rows(&path, &PATCH_HEADERS).expect("read");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][0], "acme/vault");
    }

    #[test]
    fn schema_width_is_enforced() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let sink = CsvSink::open(&tmp.path().join("out.csv"), &["A", "B"]).expect("open");
        assert!(sink.append(&["only-one".to_string()]).is_err());
    }

    #[test]
    fn unknown_columns_are_rejected_on_read() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("out.csv");
        std::fs::write(&path, "A,B,Mystery\n1,2,3\n").expect("write");
        assert!(read_rows(&path, &["A", "B"]).is_err());
    }

    #[test]
    fn done_repos_reads_first_column() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("Patches.csv");
        assert!(done_repos(&path).expect("missing file").is_empty());

        std::fs::write(
            &path,
            "RepoName,PRID\nacme/vault,1\nacme/token,2\nacme/vault,3\n",
        )
        .expect("write");
        let done = done_repos(&path).expect("read");
        assert_eq!(done.len(), 2);
        assert!(done.contains("acme/vault"));
    }
}
