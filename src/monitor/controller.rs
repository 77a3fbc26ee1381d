use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    db::{Database, SessionRecord, SessionStatus},
    engine::{OeeAccumulator, SessionParams},
    journal::JournalWriter,
    source::SignalSource,
};

use super::{
    loop_worker::{ingest_loop, LoopExit, LoopTiming},
    session::{LiveSnapshot, MonitorSession},
};

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

/// Everything needed to start a session, already resolved from settings and
/// command-line flags.
#[derive(Debug, Clone)]
pub struct MonitorOptions {
    pub params: SessionParams,
    pub log_dir: PathBuf,
    pub timing: LoopTiming,
}

/// Starts monitoring sessions and keeps the history index in step with them.
pub struct MonitorController {
    options: MonitorOptions,
    history: Option<Database>,
}

impl MonitorController {
    pub fn new(options: MonitorOptions, history: Option<Database>) -> Self {
        Self { options, history }
    }

    pub fn options(&self) -> &MonitorOptions {
        &self.options
    }

    /// Mark sessions a previous process left `Running` as interrupted.
    ///
    /// Their logs are already complete up to the last row that reached disk.
    pub async fn recover_interrupted(&self) -> Result<usize> {
        let Some(db) = &self.history else {
            return Ok(0);
        };

        let stale = db.get_incomplete_sessions().await?;
        for session in &stale {
            log_warn!(
                "Recovered incomplete session {} ({}); marking as Interrupted",
                session.id,
                session.log_path
            );
            db.mark_session_status(
                &session.id,
                SessionStatus::Interrupted,
                Some(session.updated_at),
                Utc::now(),
            )
            .await
            .with_context(|| format!("failed to mark session {} interrupted", session.id))?;
        }
        Ok(stale.len())
    }

    /// Create the session, its log and its history entry, then spawn the
    /// ingestion loop over `source`.
    pub async fn start<S>(&self, source: S, started_at: DateTime<Utc>) -> Result<RunningSession<S>>
    where
        S: SignalSource + Send + 'static,
    {
        let session_id = Uuid::new_v4().to_string();
        let journal = JournalWriter::create(&self.options.log_dir, started_at);
        let params = self.options.params;

        let history = match &self.history {
            Some(db) => {
                let record = SessionRecord::running(
                    session_id.clone(),
                    started_at,
                    params.target_steps,
                    params.ideal_cycle_time,
                    journal.path().display().to_string(),
                );
                match db.insert_session(&record).await {
                    Ok(()) => Some(db.clone()),
                    Err(err) => {
                        log_warn!("history index unavailable for session {session_id}: {err:?}");
                        None
                    }
                }
            }
            None => None,
        };

        let session = MonitorSession::new(
            session_id.clone(),
            OeeAccumulator::new(params),
            journal.clone(),
            history,
        );
        let live = session.subscribe();

        log_info!(
            "session {session_id} started: target {} units at {}s per unit",
            params.target_steps,
            params.ideal_cycle_time
        );

        let cancel_token = CancellationToken::new();
        let token_clone = cancel_token.clone();
        let timing = self.options.timing;
        let handle = tokio::spawn(async move {
            let mut session = session;
            let mut source = source;
            let exit = ingest_loop(&mut session, &mut source, timing, token_clone).await;
            FinishedRun {
                session,
                source,
                exit,
            }
        });

        Ok(RunningSession {
            session_id,
            journal_path: journal.path().to_path_buf(),
            live,
            cancel_token,
            handle,
        })
    }
}

/// Handle to a session whose ingestion loop is running.
pub struct RunningSession<S> {
    session_id: String,
    journal_path: PathBuf,
    live: watch::Receiver<LiveSnapshot>,
    cancel_token: CancellationToken,
    handle: JoinHandle<FinishedRun<S>>,
}

/// The session handed back once its loop has stopped, ready to be closed.
pub struct FinishedRun<S> {
    pub session: MonitorSession,
    pub source: S,
    pub exit: LoopExit,
}

impl<S> RunningSession<S> {
    pub fn id(&self) -> &str {
        &self.session_id
    }

    pub fn journal_path(&self) -> &Path {
        &self.journal_path
    }

    pub fn subscribe(&self) -> watch::Receiver<LiveSnapshot> {
        self.live.clone()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Ask the loop to flush and stop. Returns immediately.
    pub fn stop(&self) {
        self.cancel_token.cancel();
    }

    /// Wait for the loop to end, by cancellation or end of feed.
    pub async fn finish(self) -> Result<FinishedRun<S>> {
        self.handle
            .await
            .context("ingestion loop task failed to join")
    }
}
