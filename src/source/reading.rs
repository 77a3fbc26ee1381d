use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::RawSignal;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SourceEvent {
    Signal(RawSignal),
    /// One finished unit, independent of the state signal.
    UnitCompleted,
}

/// One item pulled from a signal source, stamped with the time it was read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reading {
    pub event: SourceEvent,
    pub at: DateTime<Utc>,
}

impl Reading {
    pub fn new(event: SourceEvent, at: DateTime<Utc>) -> Self {
        Self { event, at }
    }

    pub fn signal(code: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self::new(SourceEvent::Signal(RawSignal::code(code)), at)
    }

    pub fn unavailable(at: DateTime<Utc>) -> Self {
        Self::new(SourceEvent::Signal(RawSignal::Unavailable), at)
    }

    pub fn unit(at: DateTime<Utc>) -> Self {
        Self::new(SourceEvent::UnitCompleted, at)
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self.event, SourceEvent::Signal(RawSignal::Unavailable))
    }
}

/// Parse one line of the text protocol spoken by the stack-light controller.
///
/// `COUNT` and `UNIT` are unit events; an empty line means nothing was read;
/// anything else is handed to the classifier as a code.
pub fn parse_event(line: &str) -> SourceEvent {
    let line = line.trim();
    if line.is_empty() {
        return SourceEvent::Signal(RawSignal::Unavailable);
    }
    if line.eq_ignore_ascii_case("COUNT") || line.eq_ignore_ascii_case("UNIT") {
        return SourceEvent::UnitCompleted;
    }
    SourceEvent::Signal(RawSignal::code(line))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_protocol_lines() {
        assert_eq!(parse_event("COUNT\n"), SourceEvent::UnitCompleted);
        assert_eq!(parse_event("unit"), SourceEvent::UnitCompleted);
        assert_eq!(
            parse_event(" GREEN "),
            SourceEvent::Signal(RawSignal::code("GREEN"))
        );
        assert_eq!(
            parse_event("   "),
            SourceEvent::Signal(RawSignal::Unavailable)
        );
        assert_eq!(
            parse_event("garbage"),
            SourceEvent::Signal(RawSignal::code("garbage"))
        );
    }
}
