use std::fmt;

use chrono::{DateTime, Utc};
use tokio::{
    io::{AsyncBufRead, Lines},
    time::{self, Instant},
};

use crate::{engine::SessionError, models::TransitionRecord};

use super::session::MonitorSession;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

/// How the operator's defect count was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefectSource {
    Entered,
    /// No usable answer before the deadline; closed with zero defects.
    TimedOut,
    /// Input ended before a usable answer; closed with zero defects.
    NoInput,
}

/// Ask for the defect count on `lines` until the session accepts one or the
/// deadline passes.
///
/// Out-of-range and non-numeric answers are rejected and asked again. Giving
/// up always closes the session with zero defects, so this never leaves the
/// session open.
pub async fn close_interactively<R>(
    session: &mut MonitorSession,
    lines: &mut Lines<R>,
    at: DateTime<Utc>,
    deadline: Instant,
    prompt: &mut (impl std::io::Write + Send),
) -> Result<(TransitionRecord, DefectSource), SessionError>
where
    R: AsyncBufRead + Unpin,
{
    let total_count = session.accumulator().totals().total_count;

    loop {
        say(prompt, format_args!("Defective units (0-{total_count}): "));

        let answer = match time::timeout_at(deadline, lines.next_line()).await {
            Ok(Ok(Some(line))) => line,
            Ok(Ok(None)) => return give_up(session, at, DefectSource::NoInput).await,
            Ok(Err(err)) => {
                log_warn!("failed to read defect count: {err}");
                return give_up(session, at, DefectSource::NoInput).await;
            }
            Err(_) => return give_up(session, at, DefectSource::TimedOut).await,
        };

        let defects: i64 = match answer.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                say(prompt, format_args!("'{}' is not a whole number\n", answer.trim()));
                continue;
            }
        };

        match session.close(defects, at).await {
            Ok(record) => return Ok((record, DefectSource::Entered)),
            Err(err @ SessionError::DefectsOutOfRange { .. }) => {
                say(prompt, format_args!("{err}\n"));
            }
            Err(err) => return Err(err),
        }
    }
}

/// Prompt output is best effort: a closed terminal must not block the close.
fn say(prompt: &mut impl std::io::Write, text: fmt::Arguments<'_>) {
    if let Err(err) = prompt.write_fmt(text).and_then(|_| prompt.flush()) {
        log_debug!("failed to write defect prompt: {err}");
    }
}

async fn give_up(
    session: &mut MonitorSession,
    at: DateTime<Utc>,
    reason: DefectSource,
) -> Result<(TransitionRecord, DefectSource), SessionError> {
    match reason {
        DefectSource::TimedOut => {
            log_warn!("no defect count entered in time; closing session {} with 0 defects", session.id());
        }
        _ => {
            log_warn!("no defect count available; closing session {} with 0 defects", session.id());
        }
    }
    let record = session.close(0, at).await?;
    log_info!("session {} closed without operator input", session.id());
    Ok((record, reason))
}
