use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use chrono::{Local, NaiveDateTime, TimeZone, Utc};

use crate::models::{Metrics, RowState, Totals, TransitionRecord};

use super::writer::{HEADER, LOG_FILE_PREFIX, TIMESTAMP_FORMAT};

const ENABLE_LOGS: bool = true;

use crate::log_warn;

/// Read every complete row of a session log.
///
/// The file may still be growing: a trailing row without its newline is
/// treated as in flight and left for the next read.
pub async fn read_journal(path: &Path) -> Result<Vec<TransitionRecord>> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read session log {}", path.display()))?;
    parse_journal(&contents).with_context(|| format!("malformed session log {}", path.display()))
}

/// Session logs in `dir`, oldest first. File names carry the start time, so
/// name order is chronological order.
pub async fn list_journals(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to list {}", dir.display()));
        }
    };

    let mut logs = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .with_context(|| format!("failed to list {}", dir.display()))?
    {
        let path = entry.path();
        let is_log = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with(LOG_FILE_PREFIX) && name.ends_with(".csv"));
        if is_log {
            logs.push(path);
        }
    }
    logs.sort();
    Ok(logs)
}

/// Parse a session log.
///
/// A malformed row followed by valid rows is a torn write the writer has
/// already moved past; it is skipped with a warning. A malformed final row
/// is an error.
pub fn parse_journal(contents: &str) -> Result<Vec<TransitionRecord>> {
    let complete = match contents.rfind('\n') {
        Some(end) => &contents[..end],
        None => return Ok(Vec::new()),
    };

    let mut records = Vec::new();
    let mut torn: Option<anyhow::Error> = None;
    for (index, line) in complete.split('\n').enumerate() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        if index == 0 && line.starts_with(HEADER[0]) {
            continue;
        }
        match parse_row(line).with_context(|| format!("line {}", index + 1)) {
            Ok(record) => {
                if let Some(err) = torn.take() {
                    log_warn!("skipping torn session log row: {err:#}");
                }
                records.push(record);
            }
            Err(err) => {
                if let Some(previous) = torn.replace(err) {
                    log_warn!("skipping torn session log row: {previous:#}");
                }
            }
        }
    }
    match torn {
        Some(err) => Err(err),
        None => Ok(records),
    }
}

pub fn parse_row(line: &str) -> Result<TransitionRecord> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() != HEADER.len() {
        bail!(
            "expected {} columns, found {}",
            HEADER.len(),
            fields.len()
        );
    }

    let naive = NaiveDateTime::parse_from_str(fields[0], TIMESTAMP_FORMAT)
        .with_context(|| format!("invalid timestamp '{}'", fields[0]))?;
    let timestamp = Local
        .from_local_datetime(&naive)
        .earliest()
        .ok_or_else(|| anyhow!("timestamp '{}' does not exist in local time", fields[0]))?
        .with_timezone(&Utc);

    let state = RowState::from_code(fields[1])
        .ok_or_else(|| anyhow!("unknown state '{}'", fields[1]))?;

    let totals = Totals {
        prod_time: parse_seconds(fields[2], HEADER[2])?,
        setup_time: parse_seconds(fields[3], HEADER[3])?,
        down_time: parse_seconds(fields[4], HEADER[4])?,
        total_count: parse_count(fields[5], HEADER[5])?,
        defects: parse_count(fields[6], HEADER[6])?,
    };

    let metrics = Metrics {
        availability: parse_percent(fields[7], HEADER[7])?,
        performance: parse_percent(fields[8], HEADER[8])?,
        quality: parse_percent(fields[9], HEADER[9])?,
        oee: parse_percent(fields[10], HEADER[10])?,
    };

    Ok(TransitionRecord {
        timestamp,
        state,
        totals,
        metrics,
    })
}

fn parse_seconds(value: &str, column: &str) -> Result<f64> {
    let secs: f64 = value
        .parse()
        .with_context(|| format!("{column}: '{value}' is not a number"))?;
    if !secs.is_finite() || secs < 0.0 {
        bail!("{column}: '{value}' must be a non-negative number of seconds");
    }
    Ok(secs)
}

fn parse_count(value: &str, column: &str) -> Result<u64> {
    value
        .parse()
        .with_context(|| format!("{column}: '{value}' is not a non-negative integer"))
}

fn parse_percent(value: &str, column: &str) -> Result<f64> {
    let percent: f64 = value
        .parse()
        .with_context(|| format!("{column}: '{value}' is not a number"))?;
    Ok(percent / 100.0)
}
