use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    models::{MachineState, Metrics, RowState, Totals, TransitionRecord},
    source::{Reading, SourceEvent},
};

use super::{classify, RawSignal, SessionError};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_warn};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum SessionPhase {
    /// No state confirmed yet; the clock has no baseline.
    #[default]
    Uninitialized,
    Active(MachineState),
    Closed,
}

/// How `total_count` grows.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum UnitCounting {
    /// Only explicit unit events count.
    #[default]
    Events,
    /// The count also follows production time at the ideal cycle time.
    Derived,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionParams {
    pub target_steps: u64,
    pub ideal_cycle_time: f64,
    pub unit_counting: UnitCounting,
}

/// Outcome of feeding one reading to the accumulator.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Advance {
    /// Seconds attributed to the state that was active during the interval.
    pub attributed_secs: f64,
    /// The reading was older than the previous one and contributed no time.
    pub clamped: bool,
    pub transition: Option<TransitionRecord>,
}

/// Per-session running totals and the state machine that feeds them.
///
/// Time between two readings is always charged to the state that was current
/// during that interval, never to the state the interval ends in.
#[derive(Debug, Clone)]
pub struct OeeAccumulator {
    params: SessionParams,
    phase: SessionPhase,
    totals: Totals,
    units_in_production: u64,
    started_at: Option<DateTime<Utc>>,
    last_reading_at: Option<DateTime<Utc>>,
}

impl OeeAccumulator {
    pub fn new(params: SessionParams) -> Self {
        Self {
            params,
            phase: SessionPhase::Uninitialized,
            totals: Totals::default(),
            units_in_production: 0,
            started_at: None,
            last_reading_at: None,
        }
    }

    pub fn params(&self) -> &SessionParams {
        &self.params
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn current_state(&self) -> Option<MachineState> {
        match self.phase {
            SessionPhase::Active(state) => Some(state),
            SessionPhase::Uninitialized | SessionPhase::Closed => None,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.phase == SessionPhase::Closed
    }

    pub fn totals(&self) -> Totals {
        self.totals
    }

    pub fn metrics(&self) -> Metrics {
        self.totals.metrics(self.params.ideal_cycle_time)
    }

    /// Units that finished while the line was in production.
    pub fn units_in_production(&self) -> u64 {
        self.units_in_production
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn last_reading_at(&self) -> Option<DateTime<Utc>> {
        self.last_reading_at
    }

    /// Dispatch a source reading to `observe` or `record_unit`.
    ///
    /// A unit event also moves the clock, so the time up to it is charged to
    /// the current state before the count goes up.
    pub fn apply(&mut self, reading: &Reading) -> Result<Advance, SessionError> {
        match &reading.event {
            SourceEvent::Signal(raw) => self.observe(raw, reading.at),
            SourceEvent::UnitCompleted => {
                let (attributed_secs, clamped) = match self.phase {
                    SessionPhase::Closed => return Err(SessionError::Closed),
                    SessionPhase::Active(current) => self.advance_clock(current, reading.at),
                    SessionPhase::Uninitialized => (0.0, false),
                };
                self.record_unit()?;
                Ok(Advance {
                    attributed_secs,
                    clamped,
                    transition: None,
                })
            }
        }
    }

    /// Advance the clock to `at` and apply the classified signal.
    pub fn observe(&mut self, raw: &RawSignal, at: DateTime<Utc>) -> Result<Advance, SessionError> {
        let classified = classify(raw);

        let current = match self.phase {
            SessionPhase::Closed => return Err(SessionError::Closed),
            SessionPhase::Uninitialized => {
                // Silence before the first confirmed state carries no time.
                let Some(state) = classified else {
                    log_debug!("ignoring {raw:?} before the first confirmed state");
                    return Ok(Advance::default());
                };
                self.started_at = Some(at);
                self.last_reading_at = Some(at);
                self.phase = SessionPhase::Active(state);
                return Ok(Advance {
                    transition: Some(self.record(at, state.into())),
                    ..Advance::default()
                });
            }
            SessionPhase::Active(state) => state,
        };

        let (attributed_secs, clamped) = self.advance_clock(current, at);

        let transition = match classified {
            Some(next) if next != current => {
                self.phase = SessionPhase::Active(next);
                Some(self.record(self.clock(at), next.into()))
            }
            Some(_) => None,
            None => {
                if let RawSignal::Code(code) = raw {
                    log_debug!("unrecognized signal code {code:?}; keeping {current}");
                }
                None
            }
        };

        Ok(Advance {
            attributed_secs,
            clamped,
            transition,
        })
    }

    /// Count one finished unit against whatever state is current.
    pub fn record_unit(&mut self) -> Result<(), SessionError> {
        match self.phase {
            SessionPhase::Closed => Err(SessionError::Closed),
            SessionPhase::Active(MachineState::Production) => {
                self.totals.total_count += 1;
                self.units_in_production += 1;
                Ok(())
            }
            SessionPhase::Active(_) | SessionPhase::Uninitialized => {
                self.totals.total_count += 1;
                Ok(())
            }
        }
    }

    /// Bring the totals up to `at` without a state change and snapshot them.
    ///
    /// Returns `None` while no state has been confirmed yet.
    pub fn checkpoint(&mut self, at: DateTime<Utc>) -> Result<Option<TransitionRecord>, SessionError> {
        let current = match self.phase {
            SessionPhase::Closed => return Err(SessionError::Closed),
            SessionPhase::Uninitialized => return Ok(None),
            SessionPhase::Active(state) => state,
        };
        self.advance_clock(current, at);
        Ok(Some(self.record(self.clock(at), current.into())))
    }

    /// Close the session with the operator's defect count.
    ///
    /// An out-of-range count leaves the session open and untouched.
    pub fn close(&mut self, defects: i64, at: DateTime<Utc>) -> Result<TransitionRecord, SessionError> {
        let current = match self.phase {
            SessionPhase::Closed => return Err(SessionError::Closed),
            SessionPhase::Uninitialized => None,
            SessionPhase::Active(state) => Some(state),
        };
        let total_count = self.totals.total_count;
        let defects = u64::try_from(defects)
            .ok()
            .filter(|value| *value <= total_count)
            .ok_or(SessionError::DefectsOutOfRange {
                defects,
                total_count,
            })?;

        match current {
            Some(state) => {
                self.advance_clock(state, at);
            }
            None => {
                self.started_at = Some(at);
                self.last_reading_at = Some(at);
            }
        }

        self.totals.defects = defects;
        self.phase = SessionPhase::Closed;
        Ok(self.record(self.clock(at), RowState::Stopped))
    }

    fn advance_clock(&mut self, current: MachineState, at: DateTime<Utc>) -> (f64, bool) {
        let Some(last) = self.last_reading_at else {
            self.last_reading_at = Some(at);
            return (0.0, false);
        };

        let delta = at.signed_duration_since(last);
        if delta < Duration::zero() {
            log_warn!(
                "reading at {at} is {}ms older than the previous one; counting it as zero time",
                -delta.num_milliseconds()
            );
            return (0.0, true);
        }

        self.last_reading_at = Some(at);
        let secs = delta
            .num_microseconds()
            .map(|us| us as f64 / 1_000_000.0)
            .unwrap_or_else(|| delta.num_milliseconds() as f64 / 1_000.0);
        self.totals.add_time(current, secs);

        if current == MachineState::Production && self.params.unit_counting == UnitCounting::Derived {
            self.follow_production_time();
        }

        (secs, false)
    }

    fn follow_production_time(&mut self) {
        if self.params.ideal_cycle_time <= 0.0 {
            return;
        }
        let expected = (self.totals.prod_time / self.params.ideal_cycle_time).floor() as u64;
        if expected > self.totals.total_count {
            self.units_in_production += expected - self.totals.total_count;
            self.totals.total_count = expected;
        }
    }

    /// The effective time of an event: a skewed reading never moves the clock
    /// backwards.
    fn clock(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        match self.last_reading_at {
            Some(last) if last > at => last,
            _ => at,
        }
    }

    fn record(&self, at: DateTime<Utc>, state: RowState) -> TransitionRecord {
        TransitionRecord::new(at, state, self.totals, self.params.ideal_cycle_time)
    }
}
