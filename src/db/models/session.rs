use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::Totals;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SessionStatus {
    Running,
    /// Closed normally with a STOPPED row.
    Completed,
    /// The process went away while the session was running.
    Interrupted,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Running => "Running",
            SessionStatus::Completed => "Completed",
            SessionStatus::Interrupted => "Interrupted",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// One monitored session as indexed in the history database.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub status: SessionStatus,
    pub target_steps: u64,
    pub ideal_cycle_time: f64,
    pub log_path: String,
    /// Last totals mirrored from the log.
    pub totals: Totals,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn running(
        id: String,
        started_at: DateTime<Utc>,
        target_steps: u64,
        ideal_cycle_time: f64,
        log_path: String,
    ) -> Self {
        Self {
            id,
            started_at,
            stopped_at: None,
            status: SessionStatus::Running,
            target_steps,
            ideal_cycle_time,
            log_path,
            totals: Totals::default(),
            created_at: started_at,
            updated_at: started_at,
        }
    }
}
