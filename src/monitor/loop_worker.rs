use std::future;

use tokio::time::{self, Duration, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{
    engine::SessionError,
    source::{Reading, SignalSource},
};

use super::session::MonitorSession;

// Set to false to silence the per-reading chatter of this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

/// Why the ingestion loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// Stop was requested; the last known state has been flushed.
    Cancelled,
    /// The source has no more readings; the last known state has been flushed.
    FeedEnded,
    /// The session was closed underneath the loop.
    SessionClosed,
}

#[derive(Debug, Clone, Copy)]
pub struct LoopTiming {
    /// Wait after an empty read before asking the source again.
    pub poll_interval: Duration,
    pub checkpoint_interval: Option<Duration>,
}

enum Step {
    Stop,
    Checkpoint,
    Read(Option<Reading>),
}

/// Pull readings from `source` into `session` until cancelled or the feed
/// ends.
///
/// Every wait is bounded: the source's own read timeout, the poll interval
/// after an empty read, or the cancellation token, which always wins a tie.
pub async fn ingest_loop<S>(
    session: &mut MonitorSession,
    source: &mut S,
    timing: LoopTiming,
    cancel_token: CancellationToken,
) -> LoopExit
where
    S: SignalSource + Send,
{
    log_info!(
        "ingesting session {} from {}",
        session.id(),
        source.describe()
    );

    let mut checkpoints = timing.checkpoint_interval.map(|every| {
        let mut ticker = time::interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    });

    loop {
        let step = tokio::select! {
            biased;
            _ = cancel_token.cancelled() => Step::Stop,
            _ = next_checkpoint(&mut checkpoints) => Step::Checkpoint,
            reading = source.read_next() => Step::Read(reading),
        };

        match step {
            Step::Stop => {
                log_info!("ingestion loop for session {} stopping", session.id());
                return flush(session, source.now()).await.unwrap_or(LoopExit::Cancelled);
            }
            Step::Checkpoint => {
                if let Err(err) = session.checkpoint(source.now()).await {
                    return rejected(session, err);
                }
            }
            Step::Read(None) => {
                log_info!("{} has no more readings", source.describe());
                return flush(session, source.now()).await.unwrap_or(LoopExit::FeedEnded);
            }
            Step::Read(Some(reading)) => {
                let idle = reading.is_unavailable();
                match session.ingest(&reading).await {
                    Ok(advance) if advance.clamped => {
                        log_debug!("reading at {} contributed no time", reading.at);
                    }
                    Ok(_) => {}
                    Err(err) => return rejected(session, err),
                }

                if idle {
                    tokio::select! {
                        _ = cancel_token.cancelled() => {}
                        _ = time::sleep(timing.poll_interval) => {}
                    }
                }
            }
        }
    }
}

async fn next_checkpoint(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => future::pending::<()>().await,
    }
}

/// Write the last known state before the loop hands the session back.
async fn flush(session: &mut MonitorSession, at: chrono::DateTime<chrono::Utc>) -> Option<LoopExit> {
    match session.checkpoint(at).await {
        Ok(_) => None,
        Err(err) => Some(rejected(session, err)),
    }
}

fn rejected(session: &MonitorSession, err: SessionError) -> LoopExit {
    match err {
        SessionError::Closed => {
            log_error!("session {} was closed while still ingesting", session.id());
        }
        other => {
            log_warn!("session {} rejected an update: {other}", session.id());
        }
    }
    LoopExit::SessionClosed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{OeeAccumulator, RawSignal, SessionParams, UnitCounting};
    use crate::journal::{read_journal, replay, JournalWriter};
    use crate::models::{MachineState, RowState};
    use crate::source::{LineSignalSource, ScriptedSignalSource, SourceEvent};
    use chrono::{DateTime, TimeZone, Utc};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()
    }

    fn timing() -> LoopTiming {
        LoopTiming {
            poll_interval: Duration::from_millis(1),
            checkpoint_interval: None,
        }
    }

    fn session_in(dir: &std::path::Path, ideal_cycle_time: f64) -> MonitorSession {
        MonitorSession::new(
            "loop".into(),
            OeeAccumulator::new(SessionParams {
                target_steps: 30,
                ideal_cycle_time,
                unit_counting: UnitCounting::Events,
            }),
            JournalWriter::create(dir, start()),
            None,
        )
    }

    fn code(c: &str) -> SourceEvent {
        SourceEvent::Signal(RawSignal::Code(c.into()))
    }

    #[tokio::test]
    async fn shift_scenario_is_logged_as_expected() {
        let tmp = tempfile::tempdir().unwrap();
        let mut session = session_in(tmp.path(), 8.0);
        let mut source = ScriptedSignalSource::from_offsets(
            start(),
            vec![
                (0.0, code("GREEN")),
                (8.0, SourceEvent::UnitCompleted),
                (10.0, code("GREEN")),
                (10.0, code("RED")),
                (25.0, code("RED")),
                (25.0, code("GREEN")),
            ],
        );

        let exit = ingest_loop(&mut session, &mut source, timing(), CancellationToken::new()).await;
        assert_eq!(exit, LoopExit::FeedEnded);

        let rows = read_journal(session.journal().path()).await.unwrap();
        // GREEN, RED, GREEN transitions plus the flush on end of feed.
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[1].state, RowState::Machine(MachineState::Downtime));
        assert_eq!(rows[1].totals.prod_time, 10.0);
        assert_eq!(rows[1].totals.total_count, 1);
        assert_eq!(rows[2].state, RowState::Machine(MachineState::Production));
        assert_eq!(rows[2].totals.down_time, 15.0);
        assert_eq!(rows[2].totals.total_count, 1);

        let replayed = replay(&rows).unwrap();
        assert_eq!(replayed.totals, session.accumulator().totals());
    }

    #[tokio::test]
    async fn unavailable_readings_keep_the_state() {
        let tmp = tempfile::tempdir().unwrap();
        let mut session = session_in(tmp.path(), 8.0);
        let unavailable = SourceEvent::Signal(RawSignal::Unavailable);
        let mut source = ScriptedSignalSource::from_offsets(
            start(),
            vec![
                (0.0, code("YELLOW")),
                (5.0, unavailable.clone()),
                (9.0, code("BLUE")),
                (12.0, unavailable),
            ],
        );

        ingest_loop(&mut session, &mut source, timing(), CancellationToken::new()).await;

        let totals = session.accumulator().totals();
        assert_eq!(totals.setup_time, 12.0);
        assert_eq!(totals.prod_time, 0.0);
        assert_eq!(
            session.accumulator().current_state(),
            Some(MachineState::Setup)
        );
    }

    #[tokio::test]
    async fn cancellation_flushes_last_state() {
        let tmp = tempfile::tempdir().unwrap();
        let mut session = session_in(tmp.path(), 8.0);
        let mut source =
            ScriptedSignalSource::from_offsets(start(), vec![(0.0, code("GREEN")), (30.0, code("GREEN"))]);

        let cancel_token = CancellationToken::new();
        cancel_token.cancel();
        let exit = ingest_loop(&mut session, &mut source, timing(), cancel_token).await;
        assert_eq!(exit, LoopExit::Cancelled);
        // Cancellation wins before any reading, so there is nothing to flush.
        assert_eq!(session.rows_written(), 0);
        assert_eq!(source.remaining(), 2);
    }

    #[tokio::test]
    async fn closed_session_ends_the_loop() {
        let tmp = tempfile::tempdir().unwrap();
        let mut session = session_in(tmp.path(), 8.0);
        session.close(0, start()).await.unwrap();
        let mut source = ScriptedSignalSource::from_offsets(start(), vec![(1.0, code("GREEN"))]);

        let exit = ingest_loop(&mut session, &mut source, timing(), CancellationToken::new()).await;
        assert_eq!(exit, LoopExit::SessionClosed);
    }

    #[tokio::test(start_paused = true)]
    async fn checkpoints_follow_the_interval() {
        let tmp = tempfile::tempdir().unwrap();
        let mut session = session_in(tmp.path(), 8.0);
        // One reading, then a feed that never says anything again.
        session.ingest(&Reading::signal("GREEN", Utc::now())).await.unwrap();

        let mut idle = LineSignalSource::new(
            tokio::io::empty(),
            "idle",
            Duration::from_millis(50),
            Duration::from_millis(50),
            false,
        );
        let cancel_token = CancellationToken::new();
        let stopper = cancel_token.clone();
        tokio::spawn(async move {
            time::sleep(Duration::from_millis(2_500)).await;
            stopper.cancel();
        });

        let exit = ingest_loop(
            &mut session,
            &mut idle,
            LoopTiming {
                poll_interval: Duration::from_millis(50),
                checkpoint_interval: Some(Duration::from_secs(1)),
            },
            cancel_token,
        )
        .await;

        assert_eq!(exit, LoopExit::Cancelled);
        // Initial row, two checkpoints and the final flush.
        assert_eq!(session.rows_written(), 4);
    }
}
