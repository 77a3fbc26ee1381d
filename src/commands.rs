use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local, Utc};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::watch,
    time::Instant,
};

use crate::{
    cli::{Cli, Command, LineArgs, MonitorArgs, SourceArgs},
    db::Database,
    engine::{SessionError, SessionPhase},
    journal::{list_journals, read_journal, replay},
    models::{RowState, TransitionRecord},
    monitor::{
        close_interactively, DefectSource, FinishedRun, LiveSnapshot, LoopTiming, MonitorController,
        MonitorOptions, MonitorSession,
    },
    report::{format_eta, Progress, ShiftReport},
    settings::Settings,
    source::{AnySource, LineSignalSource, ScriptedSignalSource, SignalSource, SimulatedSignalSource},
};

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

pub async fn dispatch(cli: Cli) -> Result<()> {
    let settings = Settings::load(&cli.config)
        .with_context(|| format!("invalid settings in {}", cli.config.display()))?;

    match cli.command {
        Command::Monitor(args) => monitor(settings, args).await,
        Command::Report { log, json, line } => report(settings, &log, json, &line).await,
        Command::History { log_dir, limit } => history(settings, log_dir, limit).await,
        Command::InitConfig { force } => init_config(&settings, &cli.config, force),
    }
}

fn apply_line_args(settings: &mut Settings, line: &LineArgs) {
    if let Some(target_steps) = line.target_steps {
        settings.target_steps = target_steps;
    }
    if let Some(ideal_cycle_time) = line.ideal_cycle_time {
        settings.ideal_cycle_time_secs = ideal_cycle_time;
    }
}

/// The history index is optional: failing to open it only costs the index.
async fn open_history(settings: &Settings) -> Option<Database> {
    let path = settings.database_path();
    let opened = tokio::task::spawn_blocking(move || Database::new(path)).await;
    match opened {
        Ok(Ok(db)) => Some(db),
        Ok(Err(err)) => {
            log_warn!("session history disabled: {err:#}");
            None
        }
        Err(join_err) => {
            log_warn!("session history disabled: {join_err}");
            None
        }
    }
}

/// Open the history index only if it already exists.
async fn existing_history(settings: &Settings) -> Option<Database> {
    if settings.database_path().exists() {
        open_history(settings).await
    } else {
        None
    }
}

async fn monitor(mut settings: Settings, args: MonitorArgs) -> Result<()> {
    apply_line_args(&mut settings, &args.line);
    if let Some(log_dir) = &args.log_dir {
        settings.log_dir = log_dir.clone();
    }
    if args.checkpoint_secs.is_some() {
        settings.checkpoint_interval_secs = args.checkpoint_secs;
    }
    if args.seed.is_some() {
        settings.simulation_seed = args.seed;
    }
    settings.validate()?;

    let history = open_history(&settings).await;
    let controller = MonitorController::new(
        MonitorOptions {
            params: settings.session_params(),
            log_dir: settings.log_dir.clone(),
            timing: LoopTiming {
                poll_interval: settings.poll_interval(),
                checkpoint_interval: settings.checkpoint_interval(),
            },
        },
        history,
    );
    match controller.recover_interrupted().await {
        Ok(0) => {}
        Ok(count) => log_info!("marked {count} interrupted session(s) from a previous run"),
        Err(err) => log_warn!("failed to recover interrupted sessions: {err:#}"),
    }

    let started_at = Utc::now();
    let source = select_source(&args.source, &settings, started_at).await?;
    // Stdin carries the feed, so it cannot also carry the operator's answer.
    let can_prompt = !matches!(source, AnySource::Line(_) if args.source.stdin);
    let feed = source.describe();

    let running = controller.start(source, started_at).await?;
    println!(
        "Monitoring {} (session {}), logging to {}. Press Ctrl-C to stop.",
        feed,
        running.id(),
        running.journal_path().display()
    );

    let status = tokio::spawn(print_status(running.subscribe()));
    let cancel_token = running.cancel_token();
    let interrupt = tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                log_info!("stop requested");
                cancel_token.cancel();
            }
            Err(err) => log_warn!("cannot listen for Ctrl-C: {err}"),
        }
    });

    let FinishedRun {
        mut session,
        source,
        exit,
    } = running.finish().await?;
    interrupt.abort();
    status.abort();
    log_info!("ingestion finished: {exit:?}");

    let closed_at = source.now();
    let record = close_session(
        &mut session,
        closed_at,
        args.defects,
        can_prompt,
        settings.close_prompt_timeout(),
    )
    .await?;

    let report = ShiftReport::build(
        Some(record.state),
        Progress {
            totals: record.totals,
            units_in_production: session.accumulator().units_in_production(),
        },
        settings.target_steps,
        settings.ideal_cycle_time_secs,
        record.timestamp,
    );
    println!();
    print!("{}", report.render_text());
    if !session.journal_healthy() {
        println!(
            "WARNING: some rows never reached {}; the log has gaps",
            session.journal().path().display()
        );
    }
    Ok(())
}

async fn select_source(
    args: &SourceArgs,
    settings: &Settings,
    started_at: DateTime<Utc>,
) -> Result<AnySource> {
    if let Some(path) = &args.device {
        match LineSignalSource::open_device(path, settings.read_timeout(), settings.poll_interval())
            .await
        {
            Ok(source) => return Ok(source.into()),
            Err(err) => log_warn!("{err:#}; falling back to simulation"),
        }
    } else if args.stdin {
        return Ok(LineSignalSource::stdin(settings.read_timeout(), settings.poll_interval()).into());
    } else if let Some(path) = &args.script {
        return Ok(ScriptedSignalSource::load(path, started_at).await?.into());
    } else if !args.simulate {
        log_info!("no signal source given; simulating the line");
    }

    Ok(SimulatedSignalSource::new(
        settings.poll_interval(),
        settings.ideal_cycle_time_secs,
        settings.simulation_seed,
    )
    .into())
}

/// Close with `--defects` when given, otherwise ask on stdin.
async fn close_session(
    session: &mut MonitorSession,
    at: DateTime<Utc>,
    defects: Option<i64>,
    can_prompt: bool,
    prompt_timeout: std::time::Duration,
) -> Result<TransitionRecord> {
    if let Some(defects) = defects {
        match session.close(defects, at).await {
            Ok(record) => return Ok(record),
            Err(err @ SessionError::DefectsOutOfRange { .. }) if can_prompt => {
                println!("{err}");
            }
            Err(err) => return Err(err.into()),
        }
    }

    if !can_prompt {
        log_warn!("no defect count given and stdin is busy with the feed; closing with 0 defects");
        return Ok(session.close(0, at).await?);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let deadline = Instant::now() + prompt_timeout;
    let mut stdout = std::io::stdout();

    let answered = tokio::select! {
        closed = close_interactively(session, &mut lines, at, deadline, &mut stdout) => Some(closed),
        _ = tokio::signal::ctrl_c() => None,
    };

    match answered {
        Some(closed) => {
            let (record, how) = closed?;
            if how != DefectSource::Entered {
                println!("No defect count entered; closed with 0 defects.");
            }
            Ok(record)
        }
        None => {
            println!();
            log_warn!("defect entry interrupted; closing with 0 defects");
            Ok(session.close(0, at).await?)
        }
    }
}

/// Print a status line whenever the state, the count or log health changes.
async fn print_status(mut live: watch::Receiver<LiveSnapshot>) {
    let mut last_key = None;
    while live.changed().await.is_ok() {
        let snapshot = live.borrow_and_update().clone();
        let key = (
            snapshot.phase,
            snapshot.totals.total_count,
            snapshot.journal_healthy,
        );
        if last_key == Some(key) {
            continue;
        }
        last_key = Some(key);
        println!("{}", format_status(&snapshot, Utc::now()));
    }
}

fn format_status(snapshot: &LiveSnapshot, now: DateTime<Utc>) -> String {
    let state = match snapshot.phase {
        SessionPhase::Uninitialized => "WAITING",
        SessionPhase::Active(state) => state.code(),
        SessionPhase::Closed => RowState::Stopped.code(),
    };
    let metrics = &snapshot.metrics;
    let mut line = format!(
        "[{state}] OEE {:.1}% (A {:.1}% P {:.1}% Q {:.1}%) {}/{} units, ETA {}",
        metrics.oee * 100.0,
        metrics.availability * 100.0,
        metrics.performance * 100.0,
        metrics.quality * 100.0,
        snapshot.totals.total_count,
        snapshot.target_steps,
        format_eta(&snapshot.eta(now)),
    );
    if !snapshot.journal_healthy {
        line.push_str("  !! session log not writable, monitoring continues");
    }
    line
}

async fn report(mut settings: Settings, log: &Path, json: bool, line: &LineArgs) -> Result<()> {
    let records = read_journal(log).await?;
    let session = replay(&records)
        .with_context(|| format!("{} is not a consistent session log", log.display()))?;

    // Line parameters: explicit flags, then the indexed session, then settings.
    if let Some(db) = existing_history(&settings).await {
        match find_indexed(&db, log).await {
            Ok(Some(indexed)) => {
                settings.target_steps = indexed.target_steps;
                settings.ideal_cycle_time_secs = indexed.ideal_cycle_time;
            }
            Ok(None) => {}
            Err(err) => log_warn!("history lookup failed for {}: {err:#}", log.display()),
        }
    }
    apply_line_args(&mut settings, line);
    settings.validate()?;

    let now = match (session.closed, session.last_row_at) {
        (true, Some(last_row_at)) => last_row_at,
        _ => Utc::now(),
    };
    let report = ShiftReport::build(
        session.last_state,
        Progress::from_totals(session.totals),
        settings.target_steps,
        settings.ideal_cycle_time_secs,
        now,
    );

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", log.display());
        print!("{}", report.render_text());
    }
    Ok(())
}

async fn find_indexed(db: &Database, log: &Path) -> Result<Option<crate::db::SessionRecord>> {
    if let Some(found) = db.find_session_by_log_path(&log.display().to_string()).await? {
        return Ok(Some(found));
    }
    match std::fs::canonicalize(log) {
        Ok(canonical) => db.find_session_by_log_path(&canonical.display().to_string()).await,
        Err(_) => Ok(None),
    }
}

async fn history(mut settings: Settings, log_dir: Option<PathBuf>, limit: usize) -> Result<()> {
    if let Some(log_dir) = log_dir {
        settings.log_dir = log_dir;
    }

    let logs = list_journals(&settings.log_dir).await?;
    if logs.is_empty() {
        println!("No session logs in {}", settings.log_dir.display());
    } else {
        println!("Session logs in {}:", settings.log_dir.display());
    }
    let skip = logs.len().saturating_sub(limit);
    for path in logs.iter().skip(skip) {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        println!("  {}", summarize_log(&name, path).await);
    }

    if let Some(db) = existing_history(&settings).await {
        let sessions = db.list_sessions(limit).await?;
        if !sessions.is_empty() {
            println!("Indexed sessions (newest first):");
        }
        for session in sessions {
            println!(
                "  {}  {:<11}  {}  {} units  {}",
                session.started_at.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
                session.status,
                session.id,
                session.totals.total_count,
                session.log_path
            );
        }
    }
    Ok(())
}

async fn summarize_log(name: &str, path: &Path) -> String {
    let records = match read_journal(path).await {
        Ok(records) => records,
        Err(err) => return format!("{name}  unreadable: {err:#}"),
    };
    let Some(last) = records.last() else {
        return format!("{name}  empty");
    };
    let status = match replay(&records) {
        Ok(session) if session.closed => "closed".to_string(),
        Ok(_) => "open".to_string(),
        Err(err) => format!("inconsistent ({err})"),
    };
    format!(
        "{name}  {:>4} rows  {:<6}  {} units, {} defects  OEE {:.1}%",
        records.len(),
        status,
        last.totals.total_count,
        last.totals.defects,
        last.metrics.oee * 100.0
    )
}

fn init_config(settings: &Settings, path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!(
            "{} already exists; pass --force to overwrite it",
            path.display()
        );
    }
    settings.persist(path)?;
    println!("Wrote settings to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::JournalWriter;
    use crate::models::{MachineState, Totals};
    use chrono::TimeZone;

    fn snapshot(journal_healthy: bool) -> LiveSnapshot {
        let totals = Totals {
            prod_time: 40.0,
            setup_time: 10.0,
            total_count: 4,
            ..Totals::default()
        };
        LiveSnapshot {
            session_id: "s".into(),
            phase: SessionPhase::Active(MachineState::Production),
            totals,
            metrics: totals.metrics(10.0),
            units_in_production: 4,
            target_steps: 10,
            ideal_cycle_time: 10.0,
            updated_at: None,
            journal_healthy,
            rows_written: 2,
        }
    }

    #[test]
    fn status_line_shows_metrics_and_banner() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
        let line = format_status(&snapshot(true), now);
        assert!(line.starts_with("[GREEN] OEE 80.0%"));
        assert!(line.contains("4/10 units"));
        assert!(line.contains("60s left"));
        assert!(!line.contains("!!"));

        assert!(format_status(&snapshot(false), now).contains("session log not writable"));
    }

    #[tokio::test]
    async fn flag_defects_close_without_prompting() {
        let tmp = tempfile::tempdir().unwrap();
        let mut session = MonitorSession::new(
            "s".into(),
            crate::engine::OeeAccumulator::new(Settings::default().session_params()),
            JournalWriter::create(tmp.path(), Utc::now()),
            None,
        );
        let at = Utc::now();

        let err = close_session(&mut session, at, Some(3), false, std::time::Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("out of range"));
        assert!(!session.accumulator().is_closed());

        let record = close_session(&mut session, at, None, false, std::time::Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(record.totals.defects, 0);
        assert!(session.accumulator().is_closed());
    }

    #[tokio::test]
    async fn init_config_refuses_to_overwrite() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("factory-sight.json");
        init_config(&Settings::default(), &path, false).unwrap();
        assert!(init_config(&Settings::default(), &path, false).is_err());
        init_config(&Settings::default(), &path, true).unwrap();
    }
}
