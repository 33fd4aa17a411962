//! CSV recording of readings and sensor errors.
//!
//! Each run writes one file per record category into the log directory, named
//! after the run's start time (`2024-05-01T12-00-00Z_recording.csv`). Files are
//! opened in append mode and get a header row when empty.

use crate::reading::ReadingBatch;
use chrono::{DateTime, Local};
use serde::{Serialize, Serializer};
use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;

/// Outlier flag as written to the recording file, `None` while bootstrapping.
fn outlier_flag<S: Serializer>(flag: &Option<bool>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(match flag {
        Some(true) => "True",
        Some(false) => "False",
        None => "None",
    })
}

#[derive(Debug, Serialize)]
struct RecordingRow {
    timestamp: f64,
    temperature: f64,
    humidity: f64,
    #[serde(serialize_with = "outlier_flag")]
    temperature_outlier: Option<bool>,
    #[serde(serialize_with = "outlier_flag")]
    humidity_outlier: Option<bool>,
}

#[derive(Debug, Serialize)]
struct ErrorRow<'a> {
    timestamp: f64,
    error_type: &'a str,
}

/// A row for one of the record files.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    /// A successful read and its classification
    Recording(ReadingBatch),
    /// A recoverable sensor error
    Error {
        timestamp: SystemTime,
        error_type: String,
    },
}

impl Record {
    /// File name suffix of this record's category.
    pub fn category(&self) -> &'static str {
        match self {
            Record::Recording(_) => "recording",
            Record::Error { .. } => "error",
        }
    }
}

fn unix_seconds(time: SystemTime) -> f64 {
    time.duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

/// Write `record` to `out`, preceded by its header when `with_header` is set.
pub fn write_record<W: io::Write>(out: W, with_header: bool, record: &Record) -> csv::Result<()> {
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(with_header)
        .from_writer(out);

    match record {
        Record::Recording(batch) => wtr.serialize(RecordingRow {
            timestamp: unix_seconds(batch.reading.timestamp),
            temperature: batch.reading.temperature,
            humidity: batch.reading.humidity,
            temperature_outlier: batch.temperature.outlier_flag(),
            humidity_outlier: batch.humidity.outlier_flag(),
        })?,
        Record::Error {
            timestamp,
            error_type,
        } => wtr.serialize(ErrorRow {
            timestamp: unix_seconds(*timestamp),
            error_type,
        })?,
    }

    wtr.flush()?;
    Ok(())
}

/// Error type for record files.
#[derive(Error, Debug)]
#[error("Cannot write record file {}: {source}", path.display())]
pub struct RecordError {
    pub path: PathBuf,
    #[source]
    pub source: csv::Error,
}

/// Appends records to per-run CSV files.
#[derive(Debug, Clone)]
pub struct CsvRecorder {
    /// `None` when file logging is disabled
    dir: Option<PathBuf>,
    started: DateTime<Local>,
}

impl CsvRecorder {
    /// Create a recorder writing into `dir` for a run started at `started`.
    pub fn new(dir: impl AsRef<Path>, started: DateTime<Local>) -> Self {
        Self {
            dir: Some(dir.as_ref().to_path_buf()),
            started,
        }
    }

    /// A recorder that drops every record.
    pub fn disabled() -> Self {
        Self {
            dir: None,
            started: Local::now(),
        }
    }

    /// Path of the file holding `category` records for this run.
    pub fn path(&self, category: &str) -> Option<PathBuf> {
        let name = format!(
            "{}_{}.csv",
            self.started.format("%Y-%m-%dT%H-%M-%SZ"),
            category
        );
        self.dir.as_ref().map(|dir| dir.join(name))
    }

    /// Append `record` to its category file.
    pub fn record(&self, record: &Record) -> Result<(), RecordError> {
        let Some(path) = self.path(record.category()) else {
            return Ok(());
        };

        let append = || -> csv::Result<()> {
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            let empty = file.metadata()?.len() == 0;
            write_record(file, empty, record)
        };

        append().map_err(|source| RecordError { path, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reading::{Classification, Reading};
    use chrono::TimeZone;
    use std::time::Duration;

    fn batch() -> ReadingBatch {
        ReadingBatch {
            reading: Reading {
                timestamp: SystemTime::UNIX_EPOCH + Duration::from_millis(1_700_000_000_500),
                temperature: 21.5,
                humidity: 40.0,
            },
            temperature: Classification::Accurate,
            humidity: Classification::Bootstrapping,
        }
    }

    fn started() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 5, 1, 12, 30, 5).unwrap()
    }

    #[test]
    fn test_write_outlier_flags() {
        let mut flagged = batch();
        flagged.temperature = Classification::Outlier;
        flagged.humidity = Classification::Accurate;
        let mut out = Vec::<u8>::new();
        write_record(&mut out, false, &Record::Recording(flagged)).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "1700000000.5,21.5,40.0,True,False\n"
        );
    }

    #[test]
    fn test_write_error_quotes_separators() {
        let record = Record::Error {
            timestamp: SystemTime::UNIX_EPOCH + Duration::from_secs(3),
            error_type: "bad frame, got \"0xff\"".to_string(),
        };
        let mut out = Vec::<u8>::new();
        write_record(&mut out, false, &record).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "3.0,\"bad frame, got \"\"0xff\"\"\"\n"
        );
    }

    #[test]
    fn test_write_recording_with_header() {
        let mut out = Vec::<u8>::new();
        write_record(&mut out, true, &Record::Recording(batch())).unwrap();
        let out = String::from_utf8(out).unwrap();
        assert_eq!(
            out,
            "timestamp,temperature,humidity,temperature_outlier,humidity_outlier\n\
             1700000000.5,21.5,40.0,False,None\n"
        );
    }

    #[test]
    fn test_write_error_without_header() {
        let record = Record::Error {
            timestamp: SystemTime::UNIX_EPOCH + Duration::from_secs(10),
            error_type: "Checksum did not validate. Try again.".to_string(),
        };
        let mut out = Vec::<u8>::new();
        write_record(&mut out, false, &record).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "10.0,Checksum did not validate. Try again.\n"
        );
    }

    #[test]
    fn test_recorder_file_name() {
        let recorder = CsvRecorder::new("/log", started());
        assert_eq!(
            recorder.path("recording"),
            Some(PathBuf::from("/log/2024-05-01T12-30-05Z_recording.csv"))
        );
    }

    #[test]
    fn test_recorder_writes_header_once() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = CsvRecorder::new(dir.path(), started());
        recorder.record(&Record::Recording(batch())).unwrap();
        recorder.record(&Record::Recording(batch())).unwrap();

        let contents = std::fs::read_to_string(recorder.path("recording").unwrap()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("timestamp,"));
        assert_eq!(lines[1], lines[2]);
    }

    #[test]
    fn test_recorder_separates_categories() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = CsvRecorder::new(dir.path(), started());
        recorder
            .record(&Record::Error {
                timestamp: SystemTime::UNIX_EPOCH,
                error_type: "timeout".to_string(),
            })
            .unwrap();

        assert!(recorder.path("error").unwrap().exists());
        assert!(!recorder.path("recording").unwrap().exists());
    }

    #[test]
    fn test_disabled_recorder_writes_nothing() {
        let recorder = CsvRecorder::disabled();
        assert_eq!(recorder.path("recording"), None);
        recorder.record(&Record::Recording(batch())).unwrap();
    }

    #[test]
    fn test_recorder_missing_dir_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = CsvRecorder::new(dir.path().join("missing"), started());
        let err = recorder.record(&Record::Recording(batch())).unwrap_err();
        assert!(err.to_string().starts_with("Cannot write record file"));
    }
}
