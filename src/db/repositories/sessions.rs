use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::db::{
    helpers::{parse_datetime, parse_optional_datetime, parse_status, to_i64, to_u64},
    models::{SessionRecord, SessionStatus},
    Database,
};
use crate::models::Totals;

const SESSION_COLUMNS: &str = "id, started_at, stopped_at, status, target_steps, ideal_cycle_time, log_path,
     prod_time, setup_time, down_time, total_count, defects, created_at, updated_at";

fn row_to_session(row: &Row) -> Result<SessionRecord> {
    let started_at: String = row.get("started_at")?;
    let stopped_at: Option<String> = row.get("stopped_at")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    let status: String = row.get("status")?;
    let target_steps: i64 = row.get("target_steps")?;
    let total_count: i64 = row.get("total_count")?;
    let defects: i64 = row.get("defects")?;

    Ok(SessionRecord {
        id: row.get("id")?,
        started_at: parse_datetime(&started_at, "started_at")?,
        stopped_at: parse_optional_datetime(stopped_at, "stopped_at")?,
        status: parse_status(&status)?,
        target_steps: to_u64(target_steps, "target_steps")?,
        ideal_cycle_time: row.get("ideal_cycle_time")?,
        log_path: row.get("log_path")?,
        totals: Totals {
            prod_time: row.get("prod_time")?,
            setup_time: row.get("setup_time")?,
            down_time: row.get("down_time")?,
            total_count: to_u64(total_count, "total_count")?,
            defects: to_u64(defects, "defects")?,
        },
        created_at: parse_datetime(&created_at, "created_at")?,
        updated_at: parse_datetime(&updated_at, "updated_at")?,
    })
}

impl Database {
    pub async fn insert_session(&self, session: &SessionRecord) -> Result<()> {
        let record = session.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO sessions (id, started_at, stopped_at, status, target_steps, ideal_cycle_time, log_path,
                                       prod_time, setup_time, down_time, total_count, defects, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    record.id,
                    record.started_at.to_rfc3339(),
                    record.stopped_at.as_ref().map(|dt| dt.to_rfc3339()),
                    record.status.as_str(),
                    to_i64(record.target_steps)?,
                    record.ideal_cycle_time,
                    record.log_path,
                    record.totals.prod_time,
                    record.totals.setup_time,
                    record.totals.down_time,
                    to_i64(record.totals.total_count)?,
                    to_i64(record.totals.defects)?,
                    record.created_at.to_rfc3339(),
                    record.updated_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Mirror the latest totals of a running session.
    pub async fn update_session_totals(
        &self,
        session_id: &str,
        totals: Totals,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            conn.execute(
                "UPDATE sessions
                 SET prod_time = ?1,
                     setup_time = ?2,
                     down_time = ?3,
                     total_count = ?4,
                     defects = ?5,
                     updated_at = ?6
                 WHERE id = ?7",
                params![
                    totals.prod_time,
                    totals.setup_time,
                    totals.down_time,
                    to_i64(totals.total_count)?,
                    to_i64(totals.defects)?,
                    updated_at.to_rfc3339(),
                    session_id,
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn mark_session_status(
        &self,
        session_id: &str,
        status: SessionStatus,
        stopped_at: Option<DateTime<Utc>>,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            conn.execute(
                "UPDATE sessions
                 SET status = ?1,
                     stopped_at = ?2,
                     updated_at = ?3
                 WHERE id = ?4",
                params![
                    status.as_str(),
                    stopped_at.map(|dt| dt.to_rfc3339()),
                    updated_at.to_rfc3339(),
                    session_id,
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"
            ))?;

            let session = stmt
                .query_row(params![session_id], |row| Ok(row_to_session(row)))
                .optional()?
                .transpose()
                .map_err(|e| anyhow!("failed to parse session: {e}"))?;

            Ok(session)
        })
        .await
    }

    /// The session that wrote the log at `log_path`, if it was indexed.
    pub async fn find_session_by_log_path(&self, log_path: &str) -> Result<Option<SessionRecord>> {
        let log_path = log_path.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS}
                 FROM sessions
                 WHERE log_path = ?1
                 ORDER BY started_at DESC
                 LIMIT 1"
            ))?;

            let mut rows = stmt.query(params![log_path])?;
            let session = match rows.next()? {
                Some(row) => Some(row_to_session(row)?),
                None => None,
            };
            Ok(session)
        })
        .await
    }

    pub async fn get_incomplete_sessions(&self) -> Result<Vec<SessionRecord>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS}
                 FROM sessions
                 WHERE status = 'Running'
                 ORDER BY started_at ASC"
            ))?;

            let mut rows = stmt.query([])?;
            let mut sessions = Vec::new();
            while let Some(row) = rows.next()? {
                sessions.push(row_to_session(row)?);
            }
            Ok(sessions)
        })
        .await
    }

    /// Most recent sessions first.
    pub async fn list_sessions(&self, limit: usize) -> Result<Vec<SessionRecord>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS}
                 FROM sessions
                 ORDER BY started_at DESC
                 LIMIT ?1"
            ))?;

            let mut rows = stmt.query(params![limit])?;
            let mut sessions = Vec::new();
            while let Some(row) = rows.next()? {
                sessions.push(row_to_session(row)?);
            }
            Ok(sessions)
        })
        .await
    }
}
