use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{RowState, Totals, TransitionRecord};

/// Final state reconstructed from a session log.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayedSession {
    pub totals: Totals,
    pub last_state: Option<RowState>,
    pub closed: bool,
    pub rows: usize,
    pub first_row_at: Option<DateTime<Utc>>,
    pub last_row_at: Option<DateTime<Utc>>,
}

/// Fold log rows in order, checking they could have come from one session.
///
/// Each row carries cumulative totals, so the last row holds the final
/// accumulator values; the fold rejects logs whose totals go backwards, whose
/// defects appear before the closing row, or which continue after it.
pub fn replay(records: &[TransitionRecord]) -> Result<ReplayedSession> {
    let mut session = ReplayedSession {
        totals: Totals::default(),
        last_state: None,
        closed: false,
        rows: 0,
        first_row_at: None,
        last_row_at: None,
    };

    for (index, record) in records.iter().enumerate() {
        let row = index + 1;
        if session.closed {
            bail!("row {row} follows the closing row");
        }

        let previous = &session.totals;
        let current = &record.totals;
        if current.prod_time < previous.prod_time
            || current.setup_time < previous.setup_time
            || current.down_time < previous.down_time
        {
            bail!("row {row}: time accumulators decreased");
        }
        if current.total_count < previous.total_count {
            bail!("row {row}: total count decreased");
        }
        if current.defects > current.total_count {
            bail!(
                "row {row}: {} defects exceed {} units",
                current.defects,
                current.total_count
            );
        }
        if record.state != RowState::Stopped && current.defects != 0 {
            bail!("row {row}: defects recorded before the session was closed");
        }

        session.totals = *current;
        session.last_state = Some(record.state);
        session.closed = record.state == RowState::Stopped;
        session.rows = row;
        session.first_row_at.get_or_insert(record.timestamp);
        session.last_row_at = Some(record.timestamp);
    }

    Ok(session)
}
