//! Append-only per-monitor CSV logs (§3 `CsvLog`, §4.1 "CSV log contract").
//! Opened `O_APPEND`, newline-terminated, header written once on creation.
//! A write failure drops the record and logs — it never blocks sampling.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// One open append-only CSV file for a single monitor. Never shared across
/// monitors (§5 "one writer thread per file").
pub struct CsvLog {
    path: PathBuf,
    writer: csv::Writer<std::fs::File>,
}

impl CsvLog {
    /// Open (creating if absent) the log file for `monitor_name` under
    /// `data_dir`, writing `header` once if the file is new/empty.
    pub fn open(data_dir: &Path, monitor_name: &str, header: &[&str]) -> std::io::Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let path = data_dir.join(format!("{monitor_name}.csv"));
        let needs_header = !path.exists() || std::fs::metadata(&path)?.len() == 0;

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        // flexible: a sampling error writes a short (timestamp, outcome) row
        // even though the header carries the monitor's full snapshot schema.
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_writer(file);

        if needs_header {
            writer.write_record(header)?;
            writer.flush()?;
        }

        Ok(Self { path, writer })
    }

    /// Append one record. Logs and swallows the error on failure rather
    /// than propagating it into the sampling path.
    pub fn append(&mut self, record: &[String]) {
        if let Err(e) = self.writer.write_record(record) {
            tracing::warn!(path = %self.path.display(), "csv write failed: {}", e);
            return;
        }
        if let Err(e) = self.writer.flush() {
            tracing::warn!(path = %self.path.display(), "csv flush failed: {}", e);
        }
    }
}

/// Query-contract half of §4.1's `CsvLog`: `query_range(name, t0, t1)`
/// reads the log back out, returning each record as (header, fields)
/// pairs for every row whose `timestamp` column falls within `[t0, t1]`.
/// Rows with an unparseable timestamp (degraded-monitor error rows share
/// the same file but a shorter schema) are skipped, not an error.
pub fn query_range(
    data_dir: &Path,
    monitor_name: &str,
    t0: chrono::DateTime<chrono::Utc>,
    t1: chrono::DateTime<chrono::Utc>,
) -> std::io::Result<Vec<Vec<String>>> {
    let path = data_dir.join(format!("{monitor_name}.csv"));
    if !path.exists() {
        return Ok(Vec::new());
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(&path)?;

    let mut out = Vec::new();
    for result in reader.records() {
        let record = match result {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(path = %path.display(), "csv read error: {}", e);
                continue;
            }
        };
        let Some(ts_field) = record.get(0) else { continue };
        let Ok(ts) = chrono::DateTime::parse_from_rfc3339(ts_field) else { continue };
        let ts = ts.with_timezone(&chrono::Utc);
        if ts >= t0 && ts <= t1 {
            out.push(record.iter().map(|s| s.to_string()).collect());
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_written_once() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut log = CsvLog::open(dir.path(), "system", &["timestamp", "cpu"]).unwrap();
            log.append(&["2026-01-01T00:00:00Z".into(), "5.0".into()]);
        }
        {
            let mut log = CsvLog::open(dir.path(), "system", &["timestamp", "cpu"]).unwrap();
            log.append(&["2026-01-01T00:00:05Z".into(), "6.0".into()]);
        }
        let contents = std::fs::read_to_string(dir.path().join("system.csv")).unwrap();
        assert_eq!(contents.lines().count(), 3);
        assert_eq!(contents.lines().next().unwrap(), "timestamp,cpu");
    }

    #[test]
    fn query_range_filters_by_timestamp_column() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut log = CsvLog::open(dir.path(), "system", &["timestamp", "cpu"]).unwrap();
            log.append(&["2026-01-01T00:00:00Z".into(), "5.0".into()]);
            log.append(&["2026-01-01T00:01:00Z".into(), "6.0".into()]);
            log.append(&["2026-01-01T00:02:00Z".into(), "7.0".into()]);
        }

        let t0 = chrono::DateTime::parse_from_rfc3339("2026-01-01T00:00:30Z")
            .unwrap()
            .with_timezone(&chrono::Utc);
        let t1 = chrono::DateTime::parse_from_rfc3339("2026-01-01T00:01:30Z")
            .unwrap()
            .with_timezone(&chrono::Utc);

        let rows = query_range(dir.path(), "system", t0, t1).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0], vec!["2026-01-01T00:01:00Z".to_string(), "6.0".to_string()]);
    }

    #[test]
    fn query_range_on_missing_file_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let rows = query_range(dir.path(), "nonexistent", chrono::Utc::now(), chrono::Utc::now()).unwrap();
        assert!(rows.is_empty());
    }
}
