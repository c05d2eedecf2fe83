use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::app_dirs::AppDirs;
use crate::stats::RunSummary;

#[derive(Debug, Serialize)]
struct LogLine<'a> {
    date: &'a str,
    text_id: i64,
    source: i64,
    wpm: f64,
    accuracy: f64,
    viscosity: f64,
}

/// Append-only CSV log of run summaries, kept alongside the database so
/// results stay greppable without SQL.
pub struct ResultsLog {
    path: PathBuf,
}

impl ResultsLog {
    pub fn new() -> Option<Self> {
        AppDirs::results_log_path().map(|path| Self { path })
    }

    pub fn at(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    pub fn append(
        &self,
        timestamp: DateTime<Local>,
        text_id: i64,
        source: i64,
        summary: &RunSummary,
    ) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // Emit the header only when creating the file
        let needs_header = !self.path.exists();
        let file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(needs_header)
            .from_writer(file);
        writer.serialize(LogLine {
            date: &timestamp.to_rfc3339(),
            text_id,
            source,
            wpm: summary.wpm,
            accuracy: summary.accuracy,
            viscosity: summary.viscosity,
        })?;
        writer.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary() -> RunSummary {
        RunSummary {
            wpm: 60.0,
            accuracy: 0.95,
            viscosity: 0.1,
        }
    }

    #[test]
    fn test_header_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let log = ResultsLog::at(&dir.path().join("results.csv"));

        log.append(Local::now(), 1, 1, &summary()).unwrap();
        log.append(Local::now(), 2, 1, &summary()).unwrap();

        let contents = std::fs::read_to_string(dir.path().join("results.csv")).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("date,text_id,source,wpm"));
        assert!(lines[1].contains("60"));
    }

    #[test]
    fn test_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let log = ResultsLog::at(&dir.path().join("nested/state/results.csv"));

        log.append(Local::now(), 1, 1, &summary()).unwrap();
        assert!(dir.path().join("nested/state/results.csv").exists());
    }
}
