use std::collections::VecDeque;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, Utc};

use super::{parse_event, Reading, SignalSource, SourceEvent};

/// Deterministic, finite feed of pre-stamped readings.
///
/// Used for replaying a recorded shift and in tests. Readings are handed out
/// immediately; the feed's clock is the timestamp of the last reading served.
pub struct ScriptedSignalSource {
    pending: VecDeque<Reading>,
    clock: DateTime<Utc>,
    label: String,
}

impl ScriptedSignalSource {
    pub fn new(readings: impl IntoIterator<Item = Reading>, start: DateTime<Utc>) -> Self {
        Self {
            pending: readings.into_iter().collect(),
            clock: start,
            label: "script".to_string(),
        }
    }

    /// Build a feed from `(offset_secs, event)` pairs relative to `start`.
    pub fn from_offsets(
        start: DateTime<Utc>,
        events: impl IntoIterator<Item = (f64, SourceEvent)>,
    ) -> Self {
        let readings = events
            .into_iter()
            .map(|(offset, event)| Reading::new(event, start + offset_duration(offset)));
        Self::new(readings, start)
    }

    /// Parse a script with one `<offset_secs> <CODE>` pair per line.
    ///
    /// Blank lines and `#` comments are skipped; `-` stands for an empty read.
    pub fn parse(contents: &str, start: DateTime<Utc>) -> Result<Self> {
        let mut events = Vec::new();
        for (index, raw_line) in contents.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let line_no = index + 1;
            let (offset, code) = line
                .split_once(char::is_whitespace)
                .ok_or_else(|| anyhow!("line {line_no}: expected '<offset_secs> <CODE>'"))?;
            let offset: f64 = offset
                .parse()
                .with_context(|| format!("line {line_no}: invalid offset '{offset}'"))?;
            if !offset.is_finite() {
                return Err(anyhow!("line {line_no}: offset must be finite"));
            }
            let code = code.trim();
            let event = parse_event(if code == "-" { "" } else { code });
            events.push((offset, event));
        }
        Ok(Self::from_offsets(start, events))
    }

    pub async fn load(path: &Path, start: DateTime<Utc>) -> Result<Self> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read signal script {}", path.display()))?;
        let mut source = Self::parse(&contents, start)?;
        source.label = format!("script {}", path.display());
        Ok(source)
    }

    pub fn remaining(&self) -> usize {
        self.pending.len()
    }
}

fn offset_duration(secs: f64) -> Duration {
    Duration::microseconds((secs * 1_000_000.0).round() as i64)
}

impl SignalSource for ScriptedSignalSource {
    async fn read_next(&mut self) -> Option<Reading> {
        let reading = self.pending.pop_front()?;
        if reading.at > self.clock {
            self.clock = reading.at;
        }
        Some(reading)
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}
