//! Exception file sink
//!
//! Writes one CSV per run. The file name is rendered from a pattern that must
//! contain `<runid>`, so a new run never overwrites another run's output.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::NaiveDate;
use secrecon_common::config::ExceptionFileConfig;
use secrecon_common::{Error, ExceptionRecord, Result};
use tracing::info;

const HEADER: [&str; 9] = [
    "run_id",
    "as_of_date",
    "instrument_id",
    "attribute",
    "source_system",
    "target_system",
    "source_value",
    "target_value",
    "difference_type",
];

/// Exception persistence collaborator
#[async_trait]
pub trait ExceptionSink: Send + Sync {
    /// Persist the full exception set and return where it was written
    async fn write(&self, exceptions: &[ExceptionRecord], run_id: &str, as_of_date: NaiveDate) -> Result<PathBuf>;
}

/// Render a file name pattern.
///
/// Tokens: `<runid>`, `<yyyy-mm-dd>`, `<yyyymmdd>`. Numeric run ids are
/// zero-padded to two digits.
pub fn render_filename(pattern: &str, run_id: &str, as_of_date: NaiveDate) -> String {
    let run_id = match run_id.parse::<u64>() {
        Ok(n) => format!("{n:02}"),
        Err(_) => run_id.to_string(),
    };
    pattern
        .replace("<runid>", &run_id)
        .replace("<yyyy-mm-dd>", &as_of_date.format("%Y-%m-%d").to_string())
        .replace("<yyyymmdd>", &as_of_date.format("%Y%m%d").to_string())
}

/// CSV writer rooted at a directory
#[derive(Debug, Clone)]
pub struct CsvExceptionWriter {
    directory: PathBuf,
    pattern: String,
}

impl CsvExceptionWriter {
    pub fn new(directory: impl Into<PathBuf>, pattern: impl Into<String>) -> Result<Self> {
        let pattern = pattern.into();
        if !pattern.contains("<runid>") {
            return Err(Error::Config(format!(
                "exception file pattern '{pattern}' must contain <runid>"
            )));
        }
        Ok(Self {
            directory: directory.into(),
            pattern,
        })
    }

    pub fn from_config(config: &ExceptionFileConfig) -> Result<Self> {
        Self::new(&config.directory, &config.filename)
    }

    pub fn path_for(&self, run_id: &str, as_of_date: NaiveDate) -> PathBuf {
        self.directory.join(render_filename(&self.pattern, run_id, as_of_date))
    }
}

fn write_csv(path: &Path, exceptions: &[ExceptionRecord]) -> Result<()> {
    let sink_err = |e: csv::Error| Error::Sink(format!("write {} failed: {}", path.display(), e));

    let mut writer = csv::Writer::from_path(path).map_err(sink_err)?;
    writer.write_record(HEADER).map_err(sink_err)?;

    for e in exceptions {
        let as_of_date = e.as_of_date.format("%Y-%m-%d").to_string();
        let source_value = e.source_value.as_ref().map(|v| v.to_string()).unwrap_or_default();
        let target_value = e.target_value.as_ref().map(|v| v.to_string()).unwrap_or_default();
        writer
            .write_record([
                e.run_id.as_str(),
                as_of_date.as_str(),
                e.instrument_id.as_str(),
                e.attribute.as_str(),
                e.source_system.as_str(),
                e.target_system.as_str(),
                source_value.as_str(),
                target_value.as_str(),
                e.difference_type.as_str(),
            ])
            .map_err(sink_err)?;
    }

    writer
        .flush()
        .map_err(|e| Error::Sink(format!("flush {} failed: {}", path.display(), e)))?;
    Ok(())
}

#[async_trait]
impl ExceptionSink for CsvExceptionWriter {
    async fn write(&self, exceptions: &[ExceptionRecord], run_id: &str, as_of_date: NaiveDate) -> Result<PathBuf> {
        let path = self.path_for(run_id, as_of_date);
        let parent = path.parent().unwrap_or(&self.directory);
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::Sink(format!("create {} failed: {}", parent.display(), e)))?;

        let rows = exceptions.to_vec();
        let target = path.clone();

        tokio::task::spawn_blocking(move || write_csv(&target, &rows))
            .await
            .map_err(|e| Error::Sink(format!("writer task failed: {}", e)))??;

        info!(
            run_id,
            %as_of_date,
            rows = exceptions.len(),
            path = %path.display(),
            "Exceptions written"
        );
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecon_common::{DifferenceType, Value};

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 12, 29).unwrap()
    }

    fn exception(id: &str, src: Option<Value>, tgt: Option<Value>, kind: DifferenceType) -> ExceptionRecord {
        ExceptionRecord {
            run_id: "run-1".into(),
            as_of_date: date(),
            instrument_id: id.into(),
            attribute: "coupon".into(),
            source_system: "legacy".into(),
            target_system: "strategic".into(),
            source_value: src,
            target_value: tgt,
            difference_type: kind,
        }
    }

    #[test]
    fn test_render_filename_tokens() {
        assert_eq!(
            render_filename("exceptions.<runid>.<yyyymmdd>.csv", "abc", date()),
            "exceptions.abc.20231229.csv"
        );
        assert_eq!(
            render_filename("<yyyy-mm-dd>/<runid>.csv", "abc", date()),
            "2023-12-29/abc.csv"
        );
    }

    #[test]
    fn test_numeric_run_id_is_zero_padded() {
        assert_eq!(
            render_filename("exceptions.<runid>.<yyyymmdd>.csv", "7", date()),
            "exceptions.07.20231229.csv"
        );
        assert_eq!(
            render_filename("exceptions.<runid>.<yyyymmdd>.csv", "123", date()),
            "exceptions.123.20231229.csv"
        );
    }

    #[test]
    fn test_pattern_without_run_id_rejected() {
        let result = CsvExceptionWriter::new("/tmp", "exceptions.<yyyymmdd>.csv");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_write_creates_directory_and_renders_nulls_empty() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("nested").join("output");
        let writer = CsvExceptionWriter::new(&out, "exceptions.<runid>.<yyyymmdd>.csv").unwrap();

        let exceptions = vec![
            exception("US0002", Some(Value::Float(3.5)), Some(Value::Float(3.6)), DifferenceType::ValueMismatch),
            exception("US0003", Some(Value::Float(4.0)), None, DifferenceType::OnlyInSource),
        ];
        let path = writer.write(&exceptions, "run-1", date()).await.unwrap();

        assert_eq!(path, out.join("exceptions.run-1.20231229.csv"));
        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], HEADER.join(","));
        assert_eq!(
            lines[1],
            "run-1,2023-12-29,US0002,coupon,legacy,strategic,3.5,3.6,VALUE_MISMATCH"
        );
        assert_eq!(
            lines[2],
            "run-1,2023-12-29,US0003,coupon,legacy,strategic,4,,ONLY_IN_SOURCE"
        );
    }

    #[tokio::test]
    async fn test_empty_exception_set_writes_header_only() {
        let dir = tempfile::tempdir().unwrap();
        let writer = CsvExceptionWriter::new(dir.path(), "e.<runid>.csv").unwrap();
        let path = writer.write(&[], "run-empty", date()).await.unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 1);
    }

    #[tokio::test]
    async fn test_distinct_runs_never_share_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let writer = CsvExceptionWriter::new(dir.path(), "exceptions.<runid>.<yyyymmdd>.csv").unwrap();
        let a = writer.write(&[], "run-a", date()).await.unwrap();
        let b = writer.write(&[], "run-b", date()).await.unwrap();
        assert_ne!(a, b);
        assert!(a.exists() && b.exists());
    }
}
