use std::{
    fs::{self, OpenOptions},
    io::{self, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use chrono::{DateTime, Local, Utc};
use thiserror::Error;

use crate::models::TransitionRecord;

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

pub const HEADER: [&str; 11] = [
    "Timestamp",
    "State",
    "Prod_Time",
    "Setup_Time",
    "Down_Time",
    "Total_Count",
    "Defects",
    "A",
    "P",
    "Q",
    "OEE",
];

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub const LOG_FILE_PREFIX: &str = "OEE_Log_";

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("failed to write session log {path}: {source}", path = .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Append-only CSV record of one session.
///
/// Holds no session state: every call opens the file, appends one complete
/// row, syncs it to disk and closes it again, so a crash loses at most the
/// row being written.
#[derive(Debug, Clone)]
pub struct JournalWriter {
    path: PathBuf,
}

impl JournalWriter {
    /// Claim a fresh log file in `dir`, named after the session start.
    ///
    /// Failure to create the directory or file is logged, not returned: the
    /// session keeps running and later appends retry the write.
    pub fn create(dir: &Path, started_at: DateTime<Utc>) -> Self {
        if let Err(err) = fs::create_dir_all(dir) {
            log_warn!("failed to create log directory {}: {err}", dir.display());
        }

        let stem = file_stem_for(started_at);
        let mut attempt = 1;
        loop {
            let path = if attempt == 1 {
                dir.join(format!("{stem}.csv"))
            } else {
                dir.join(format!("{stem}_{attempt}.csv"))
            };

            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    let header = format!("{}\n", HEADER.join(","));
                    if let Err(err) = file
                        .write_all(header.as_bytes())
                        .and_then(|_| file.sync_data())
                    {
                        log_warn!("failed to write header to {}: {err}", path.display());
                    }
                    log_info!("logging session to {}", path.display());
                    return Self { path };
                }
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => attempt += 1,
                Err(err) => {
                    log_warn!("failed to create session log {}: {err}", path.display());
                    return Self { path };
                }
            }
        }
    }

    /// Use an explicit path, e.g. to resume appending to an existing log.
    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, record: &TransitionRecord) -> Result<(), JournalError> {
        self.write_row(record).map_err(|source| JournalError::Io {
            path: self.path.clone(),
            source,
        })
    }

    fn write_row(&self, record: &TransitionRecord) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .read(true)
            .create(true)
            .append(true)
            .open(&self.path)?;
        let len = file.metadata()?.len();

        let mut chunk = String::new();
        if len == 0 {
            // The header may have been lost if the file could not be created up front.
            chunk.push_str(&HEADER.join(","));
            chunk.push('\n');
        } else if !ends_with_newline(&mut file, len)? {
            // A torn row from an earlier failed write stays on a line of its own.
            log_warn!("session log {} ends mid-row; starting a new line", self.path.display());
            chunk.push('\n');
        }
        chunk.push_str(&format_row(record));
        chunk.push('\n');

        if let Err(err) = file.write_all(chunk.as_bytes()) {
            if let Err(trim_err) = file.set_len(len) {
                log_warn!("failed to trim torn row from {}: {trim_err}", self.path.display());
            }
            return Err(err);
        }
        file.sync_data()
    }
}

fn ends_with_newline(file: &mut fs::File, len: u64) -> io::Result<bool> {
    let mut last = [0u8; 1];
    file.seek(SeekFrom::Start(len - 1))?;
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

/// `OEE_Log_YYYYMMDD_HHMMSS`, in local time so logs sort chronologically.
pub fn file_stem_for(started_at: DateTime<Utc>) -> String {
    format!(
        "{LOG_FILE_PREFIX}{}",
        started_at.with_timezone(&Local).format("%Y%m%d_%H%M%S")
    )
}

pub fn format_row(record: &TransitionRecord) -> String {
    let totals = &record.totals;
    let metrics = &record.metrics;
    format!(
        "{},{},{:.2},{:.2},{:.2},{},{},{:.1},{:.1},{:.1},{:.1}",
        record.timestamp.with_timezone(&Local).format(TIMESTAMP_FORMAT),
        record.state.code(),
        totals.prod_time,
        totals.setup_time,
        totals.down_time,
        totals.total_count,
        totals.defects,
        metrics.availability * 100.0,
        metrics.performance * 100.0,
        metrics.quality * 100.0,
        metrics.oee * 100.0,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MachineState, RowState, Totals};
    use chrono::TimeZone;

    fn record(state: RowState, totals: Totals) -> TransitionRecord {
        TransitionRecord::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap(),
            state,
            totals,
            8.5,
        )
    }

    #[test]
    fn formats_fixed_precision_columns() {
        let row = format_row(&record(
            RowState::Stopped,
            Totals {
                prod_time: 150.0,
                setup_time: 12.346,
                down_time: 0.0,
                total_count: 20,
                defects: 3,
            },
        ));
        let fields: Vec<&str> = row.split(',').collect();

        assert_eq!(fields.len(), HEADER.len());
        assert_eq!(fields[1], "STOPPED");
        assert_eq!(fields[2], "150.00");
        assert_eq!(fields[3], "12.35");
        assert_eq!(fields[5], "20");
        assert_eq!(fields[6], "3");
        assert_eq!(fields[8], "113.3");
        assert_eq!(fields[9], "85.0");
    }

    #[test]
    fn creates_header_and_appends_rows() {
        let tmp = tempfile::tempdir().unwrap();
        let started = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
        let writer = JournalWriter::create(tmp.path(), started);

        let name = writer.path().file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("OEE_Log_"));
        assert!(name.ends_with(".csv"));

        writer
            .append(&record(MachineState::Production.into(), Totals::default()))
            .unwrap();
        writer
            .append(&record(MachineState::Downtime.into(), Totals::default()))
            .unwrap();

        let contents = fs::read_to_string(writer.path()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], HEADER.join(","));
        assert!(lines[1].contains(",GREEN,"));
        assert!(lines[2].contains(",RED,"));
        assert!(contents.ends_with('\n'));
    }

    #[test]
    fn sessions_started_in_the_same_second_do_not_collide() {
        let tmp = tempfile::tempdir().unwrap();
        let started = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
        let first = JournalWriter::create(tmp.path(), started);
        let second = JournalWriter::create(tmp.path(), started);
        assert_ne!(first.path(), second.path());
    }

    #[test]
    fn append_after_torn_row_starts_a_new_line() {
        let tmp = tempfile::tempdir().unwrap();
        let started = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
        let writer = JournalWriter::create(tmp.path(), started);
        writer
            .append(&record(MachineState::Production.into(), Totals::default()))
            .unwrap();

        let mut file = OpenOptions::new().append(true).open(writer.path()).unwrap();
        file.write_all(b"2024-03-01 08:00:10,RED,10.0").unwrap();
        drop(file);

        writer
            .append(&record(MachineState::Downtime.into(), Totals::default()))
            .unwrap();

        let contents = fs::read_to_string(writer.path()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[2], "2024-03-01 08:00:10,RED,10.0");
        assert_eq!(lines[3].split(',').count(), HEADER.len());
        assert!(lines[3].contains(",RED,"));
        assert_eq!(crate::journal::parse_journal(&contents).unwrap().len(), 2);
    }

    #[test]
    fn append_failure_is_reported_and_later_append_recovers() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("not-yet");
        let writer = JournalWriter::at_path(dir.join("OEE_Log_test.csv"));
        let row = record(MachineState::Setup.into(), Totals::default());

        let err = writer.append(&row).unwrap_err();
        assert!(err.to_string().contains("OEE_Log_test.csv"));

        fs::create_dir_all(&dir).unwrap();
        writer.append(&row).unwrap();
        let contents = fs::read_to_string(writer.path()).unwrap();
        assert!(contents.starts_with("Timestamp,State"));
        assert_eq!(contents.lines().count(), 2);
    }
}
