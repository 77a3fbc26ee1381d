use anyhow::Result;
use rusqlite::{params, Row};

use crate::db::{
    helpers::{parse_datetime, parse_row_state, to_i64, to_u64},
    Database,
};
use crate::models::{Metrics, Totals, TransitionRecord};

fn row_to_transition(row: &Row) -> Result<TransitionRecord> {
    let timestamp: String = row.get("timestamp")?;
    let state: String = row.get("state")?;
    let total_count: i64 = row.get("total_count")?;
    let defects: i64 = row.get("defects")?;

    Ok(TransitionRecord {
        timestamp: parse_datetime(&timestamp, "timestamp")?,
        state: parse_row_state(&state)?,
        totals: Totals {
            prod_time: row.get("prod_time")?,
            setup_time: row.get("setup_time")?,
            down_time: row.get("down_time")?,
            total_count: to_u64(total_count, "total_count")?,
            defects: to_u64(defects, "defects")?,
        },
        metrics: Metrics {
            availability: row.get("availability")?,
            performance: row.get("performance")?,
            quality: row.get("quality")?,
            oee: row.get("oee")?,
        },
    })
}

impl Database {
    /// Mirror one log row. `seq` is the row's position in the session log.
    pub async fn insert_transition(
        &self,
        session_id: &str,
        seq: u64,
        record: &TransitionRecord,
    ) -> Result<()> {
        let session_id = session_id.to_string();
        let record = record.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO transitions (session_id, seq, timestamp, state, prod_time, setup_time, down_time,
                                          total_count, defects, availability, performance, quality, oee)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    session_id,
                    to_i64(seq)?,
                    record.timestamp.to_rfc3339(),
                    record.state.code(),
                    record.totals.prod_time,
                    record.totals.setup_time,
                    record.totals.down_time,
                    to_i64(record.totals.total_count)?,
                    to_i64(record.totals.defects)?,
                    record.metrics.availability,
                    record.metrics.performance,
                    record.metrics.quality,
                    record.metrics.oee,
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_transitions_for_session(
        &self,
        session_id: &str,
    ) -> Result<Vec<TransitionRecord>> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT timestamp, state, prod_time, setup_time, down_time, total_count, defects,
                        availability, performance, quality, oee
                 FROM transitions
                 WHERE session_id = ?1
                 ORDER BY seq ASC",
            )?;

            let mut rows = stmt.query(params![session_id])?;
            let mut records = Vec::new();
            while let Some(row) = rows.next()? {
                records.push(row_to_transition(row)?);
            }
            Ok(records)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::SessionRecord;
    use crate::models::{MachineState, RowState};
    use chrono::{TimeZone, Utc};

    #[tokio::test]
    async fn transitions_are_returned_in_log_order() {
        let tmp = tempfile::tempdir().unwrap();
        let db = Database::new(tmp.path().join("history.sqlite3")).unwrap();
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 6, 0, 0).unwrap();

        db.insert_session(&SessionRecord::running(
            "s-1".into(),
            start,
            30,
            10.0,
            "/logs/s-1.csv".into(),
        ))
        .await
        .unwrap();

        let first = TransitionRecord::new(
            start,
            MachineState::Production.into(),
            Totals::default(),
            10.0,
        );
        let second = TransitionRecord::new(
            start + chrono::Duration::seconds(40),
            RowState::Stopped,
            Totals {
                prod_time: 40.0,
                total_count: 4,
                defects: 1,
                ..Totals::default()
            },
            10.0,
        );

        db.insert_transition("s-1", 2, &second).await.unwrap();
        db.insert_transition("s-1", 1, &first).await.unwrap();
        assert!(db.insert_transition("s-1", 1, &first).await.is_err());

        let stored = db.get_transitions_for_session("s-1").await.unwrap();
        assert_eq!(stored, vec![first, second]);
    }
}
