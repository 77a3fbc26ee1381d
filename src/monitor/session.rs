use std::{future::Future, time::Duration as StdDuration};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::{sync::watch, time};

use crate::{
    db::{Database, SessionStatus},
    engine::{Advance, OeeAccumulator, SessionError, SessionPhase},
    journal::JournalWriter,
    models::{Metrics, Totals, TransitionRecord},
    report::{estimate_eta, Eta, Progress},
    source::Reading,
};

const ENABLE_LOGS: bool = true;

/// Upper bound on each log append or history write.
pub const DEFAULT_WRITE_TIMEOUT: StdDuration = StdDuration::from_secs(2);

use crate::{log_error, log_info, log_warn};

/// What readers of a live session get to see. Published after every reading.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveSnapshot {
    pub session_id: String,
    pub phase: SessionPhase,
    pub totals: Totals,
    pub metrics: Metrics,
    pub units_in_production: u64,
    pub target_steps: u64,
    pub ideal_cycle_time: f64,
    pub updated_at: Option<DateTime<Utc>>,
    /// False while log rows are failing to reach disk.
    pub journal_healthy: bool,
    pub rows_written: u64,
}

impl LiveSnapshot {
    pub fn progress(&self) -> Progress {
        Progress {
            totals: self.totals,
            units_in_production: self.units_in_production,
        }
    }

    pub fn eta(&self, now: DateTime<Utc>) -> Eta {
        estimate_eta(&self.progress(), self.target_steps, self.ideal_cycle_time, now)
    }
}

/// One monitoring run: the accumulator plus everything its rows are
/// persisted to.
///
/// Only the ingestion loop mutates it; everyone else reads `LiveSnapshot`s
/// from the watch channel.
pub struct MonitorSession {
    id: String,
    accumulator: OeeAccumulator,
    journal: JournalWriter,
    history: Option<Database>,
    live: watch::Sender<LiveSnapshot>,
    rows_written: u64,
    journal_healthy: bool,
    write_timeout: StdDuration,
}

impl MonitorSession {
    pub fn new(
        id: String,
        accumulator: OeeAccumulator,
        journal: JournalWriter,
        history: Option<Database>,
    ) -> Self {
        let initial = LiveSnapshot {
            session_id: id.clone(),
            phase: accumulator.phase(),
            totals: accumulator.totals(),
            metrics: accumulator.metrics(),
            units_in_production: accumulator.units_in_production(),
            target_steps: accumulator.params().target_steps,
            ideal_cycle_time: accumulator.params().ideal_cycle_time,
            updated_at: accumulator.last_reading_at(),
            journal_healthy: true,
            rows_written: 0,
        };
        let (live, _) = watch::channel(initial);

        Self {
            id,
            accumulator,
            journal,
            history,
            live,
            rows_written: 0,
            journal_healthy: true,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }

    pub fn with_write_timeout(mut self, write_timeout: StdDuration) -> Self {
        self.write_timeout = write_timeout;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn accumulator(&self) -> &OeeAccumulator {
        &self.accumulator
    }

    pub fn journal(&self) -> &JournalWriter {
        &self.journal
    }

    pub fn journal_healthy(&self) -> bool {
        self.journal_healthy
    }

    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    pub fn subscribe(&self) -> watch::Receiver<LiveSnapshot> {
        self.live.subscribe()
    }

    pub fn snapshot(&self) -> LiveSnapshot {
        self.live.borrow().clone()
    }

    /// Feed one reading through the accumulator and persist any row it emits.
    pub async fn ingest(&mut self, reading: &Reading) -> Result<Advance, SessionError> {
        let advance = self.accumulator.apply(reading)?;
        if let Some(record) = &advance.transition {
            log_info!(
                "session {} -> {} at {}",
                self.id,
                record.state,
                record.timestamp
            );
            self.persist(record).await;
        }
        self.publish();
        Ok(advance)
    }

    /// Write a snapshot row for the current state. Nothing is written before
    /// the first confirmed state.
    pub async fn checkpoint(&mut self, at: DateTime<Utc>) -> Result<Option<TransitionRecord>, SessionError> {
        let record = self.accumulator.checkpoint(at)?;
        if let Some(record) = &record {
            self.persist(record).await;
        }
        self.publish();
        Ok(record)
    }

    /// Close with the operator's defect count. On `DefectsOutOfRange` the
    /// session stays open and nothing is written.
    pub async fn close(&mut self, defects: i64, at: DateTime<Utc>) -> Result<TransitionRecord, SessionError> {
        let record = self.accumulator.close(defects, at)?;
        self.persist(&record).await;
        self.publish();

        if let Some(db) = &self.history {
            let marked = db.mark_session_status(
                &self.id,
                SessionStatus::Completed,
                Some(record.timestamp),
                record.timestamp,
            );
            if let Err(err) = bounded(self.write_timeout, marked).await {
                log_warn!("failed to mark session {} completed in history: {err:#}", self.id);
            }
        }

        log_info!(
            "session {} closed: {} units, {} defects, OEE {:.1}%",
            self.id,
            record.totals.total_count,
            record.totals.defects,
            record.metrics.oee * 100.0
        );
        Ok(record)
    }

    async fn persist(&mut self, record: &TransitionRecord) {
        let journal = self.journal.clone();
        let row = record.clone();
        let append = tokio::task::spawn_blocking(move || journal.append(&row));

        match time::timeout(self.write_timeout, append).await {
            Ok(Ok(Ok(()))) => {
                if !self.journal_healthy {
                    log_info!("session log {} is writable again", self.journal.path().display());
                }
                self.journal_healthy = true;
            }
            Ok(Ok(Err(err))) => {
                log_warn!("{err}; monitoring continues in memory");
                self.journal_healthy = false;
            }
            Ok(Err(join_err)) => {
                log_error!("session log writer task failed: {join_err}");
                self.journal_healthy = false;
            }
            Err(_) => {
                log_warn!(
                    "append to {} timed out (> {:?}); monitoring continues in memory",
                    self.journal.path().display(),
                    self.write_timeout
                );
                self.journal_healthy = false;
            }
        }

        // Sequence numbers follow every row the engine produced, written or not,
        // so gaps in the mirror line up with gaps in the log.
        self.rows_written += 1;

        if let Some(db) = &self.history {
            let mirrored = db.insert_transition(&self.id, self.rows_written, record);
            if let Err(err) = bounded(self.write_timeout, mirrored).await {
                log_warn!("failed to mirror row {} of session {}: {err:#}", self.rows_written, self.id);
            }
            let updated = db.update_session_totals(&self.id, record.totals, record.timestamp);
            if let Err(err) = bounded(self.write_timeout, updated).await {
                log_warn!("failed to update history totals for session {}: {err:#}", self.id);
            }
        }
    }

    fn publish(&self) {
        let acc = &self.accumulator;
        self.live.send_replace(LiveSnapshot {
            session_id: self.id.clone(),
            phase: acc.phase(),
            totals: acc.totals(),
            metrics: acc.metrics(),
            units_in_production: acc.units_in_production(),
            target_steps: acc.params().target_steps,
            ideal_cycle_time: acc.params().ideal_cycle_time,
            updated_at: acc.last_reading_at(),
            journal_healthy: self.journal_healthy,
            rows_written: self.rows_written,
        });
    }
}

/// A history write that gives up after `limit`.
async fn bounded<T>(limit: StdDuration, write: impl Future<Output = anyhow::Result<T>>) -> anyhow::Result<T> {
    match time::timeout(limit, write).await {
        Ok(result) => result,
        Err(_) => Err(anyhow::anyhow!("history write timed out (> {limit:?})")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SessionRecord;
    use crate::engine::{SessionParams, UnitCounting};
    use crate::journal::read_journal;
    use crate::models::{MachineState, RowState};
    use chrono::{Duration, TimeZone};

    fn params() -> SessionParams {
        SessionParams {
            target_steps: 10,
            ideal_cycle_time: 5.0,
            unit_counting: UnitCounting::Events,
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap() + Duration::seconds(secs)
    }

    #[tokio::test]
    async fn transitions_reach_the_log_and_the_watchers() {
        let tmp = tempfile::tempdir().unwrap();
        let journal = JournalWriter::create(tmp.path(), at(0));
        let mut session = MonitorSession::new(
            "s-1".into(),
            OeeAccumulator::new(params()),
            journal.clone(),
            None,
        );
        let mut watcher = session.subscribe();

        session.ingest(&Reading::signal("GREEN", at(0))).await.unwrap();
        session.ingest(&Reading::unit(at(4))).await.unwrap();
        session.ingest(&Reading::signal("GREEN", at(10))).await.unwrap();
        session.ingest(&Reading::signal("RED", at(10))).await.unwrap();

        assert!(watcher.has_changed().unwrap());
        let live = watcher.borrow_and_update().clone();
        assert_eq!(live.phase, SessionPhase::Active(MachineState::Downtime));
        assert_eq!(live.totals.total_count, 1);
        assert_eq!(live.rows_written, 2);
        assert!(live.journal_healthy);

        session.close(0, at(20)).await.unwrap();
        let rows = read_journal(journal.path()).await.unwrap();
        let states: Vec<_> = rows.iter().map(|row| row.state).collect();
        assert_eq!(
            states,
            vec![
                RowState::Machine(MachineState::Production),
                RowState::Machine(MachineState::Downtime),
                RowState::Stopped
            ]
        );
        assert_eq!(rows[2].totals.down_time, 10.0);
        assert!(session.ingest(&Reading::signal("GREEN", at(30))).await.is_err());
    }

    #[tokio::test]
    async fn journal_failure_does_not_stop_accumulation() {
        let tmp = tempfile::tempdir().unwrap();
        // A directory where the log file should be makes every append fail.
        let blocked = tmp.path().join("blocked.csv");
        std::fs::create_dir(&blocked).unwrap();

        let mut session = MonitorSession::new(
            "s-2".into(),
            OeeAccumulator::new(params()),
            JournalWriter::at_path(&blocked),
            None,
        );

        session.ingest(&Reading::signal("GREEN", at(0))).await.unwrap();
        session.ingest(&Reading::signal("YELLOW", at(12))).await.unwrap();

        assert!(!session.journal_healthy());
        assert!(!session.snapshot().journal_healthy);
        assert_eq!(session.accumulator().totals().prod_time, 12.0);
        assert_eq!(session.rows_written(), 2);
    }

    #[tokio::test]
    async fn rows_are_mirrored_into_history() {
        let tmp = tempfile::tempdir().unwrap();
        let db = Database::new(tmp.path().join("history.sqlite3")).unwrap();
        let journal = JournalWriter::create(tmp.path(), at(0));
        db.insert_session(&SessionRecord::running(
            "s-3".into(),
            at(0),
            10,
            5.0,
            journal.path().display().to_string(),
        ))
        .await
        .unwrap();

        let mut session = MonitorSession::new(
            "s-3".into(),
            OeeAccumulator::new(params()),
            journal,
            Some(db.clone()),
        );
        session.ingest(&Reading::signal("YELLOW", at(0))).await.unwrap();
        session.ingest(&Reading::signal("GREEN", at(30))).await.unwrap();
        session.ingest(&Reading::unit(at(35))).await.unwrap();
        let closing = session.close(0, at(40)).await.unwrap();

        let mirrored = db.get_transitions_for_session("s-3").await.unwrap();
        assert_eq!(mirrored.len(), 3);
        assert_eq!(mirrored[2], closing);

        let stored = db.get_session("s-3").await.unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Completed);
        assert_eq!(stored.totals, closing.totals);
    }

    #[tokio::test]
    async fn stalled_history_does_not_hold_up_ingestion() {
        let tmp = tempfile::tempdir().unwrap();
        let db = Database::new(tmp.path().join("history.sqlite3")).unwrap();
        let journal = JournalWriter::create(tmp.path(), at(0));

        // Occupy the single DB worker thread well past the write timeout.
        let busy = db.clone();
        tokio::spawn(async move {
            let _ = busy
                .execute(|_| {
                    std::thread::sleep(std::time::Duration::from_secs(2));
                    Ok(())
                })
                .await;
        });
        tokio::time::sleep(StdDuration::from_millis(20)).await;

        let mut session = MonitorSession::new(
            "s-4".into(),
            OeeAccumulator::new(params()),
            journal.clone(),
            Some(db),
        )
        .with_write_timeout(StdDuration::from_millis(50));

        let started = std::time::Instant::now();
        session.ingest(&Reading::signal("GREEN", at(0))).await.unwrap();
        session.ingest(&Reading::signal("RED", at(8))).await.unwrap();
        assert!(started.elapsed() < StdDuration::from_secs(1));

        assert!(session.journal_healthy());
        assert_eq!(session.rows_written(), 2);
        assert_eq!(read_journal(journal.path()).await.unwrap().len(), 2);
    }

    #[test]
    fn snapshot_eta_uses_production_units() {
        let snapshot = LiveSnapshot {
            session_id: "s".into(),
            phase: SessionPhase::Active(MachineState::Production),
            totals: Totals {
                prod_time: 20.0,
                total_count: 4,
                ..Totals::default()
            },
            metrics: Metrics::default(),
            units_in_production: 4,
            target_steps: 10,
            ideal_cycle_time: 5.0,
            updated_at: None,
            journal_healthy: true,
            rows_written: 1,
        };
        match snapshot.eta(at(0)) {
            Eta::Remaining { seconds, .. } => assert!((seconds - 30.0).abs() < 1e-9),
            other => panic!("expected remaining, got {other:?}"),
        }
    }
}
