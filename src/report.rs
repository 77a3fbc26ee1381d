use std::fmt::Write as _;

use chrono::{DateTime, Duration, Local, Utc};
use serde::Serialize;

use crate::models::{Metrics, RowState, Totals};

/// Estimated time to reach the target count.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum Eta {
    /// No unit has been produced while in production yet.
    Unknown,
    Reached,
    Remaining {
        seconds: f64,
        finish_at: DateTime<Utc>,
    },
}

/// Inputs for the ETA: the totals plus how many of the units were produced
/// while the line was actually in production.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    pub totals: Totals,
    pub units_in_production: u64,
}

impl Progress {
    /// A log only has totals; any units are assumed to come from production
    /// time once some production time exists.
    pub fn from_totals(totals: Totals) -> Self {
        let units_in_production = if totals.prod_time > 0.0 {
            totals.total_count
        } else {
            0
        };
        Self {
            totals,
            units_in_production,
        }
    }
}

/// `remaining_units * ideal_cycle_time / performance`, where performance is
/// the observed production rate relative to the ideal cycle time.
pub fn estimate_eta(progress: &Progress, target_steps: u64, ideal_cycle_time: f64, now: DateTime<Utc>) -> Eta {
    let totals = &progress.totals;
    if totals.total_count >= target_steps {
        return Eta::Reached;
    }
    if progress.units_in_production == 0 || totals.prod_time <= 0.0 || ideal_cycle_time <= 0.0 {
        return Eta::Unknown;
    }

    let performance = progress.units_in_production as f64 * ideal_cycle_time / totals.prod_time;
    let remaining_units = (target_steps - totals.total_count) as f64;
    let seconds = remaining_units * ideal_cycle_time / performance;
    let finish_at = now + Duration::milliseconds((seconds * 1_000.0).round() as i64);

    Eta::Remaining { seconds, finish_at }
}

/// End-of-shift (or live) summary of one session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShiftReport {
    pub state: Option<RowState>,
    pub closed: bool,
    pub target_steps: u64,
    pub ideal_cycle_time: f64,
    pub totals: Totals,
    pub availability_pct: f64,
    pub performance_pct: f64,
    pub quality_pct: f64,
    pub oee_pct: f64,
    pub eta: Eta,
}

impl ShiftReport {
    pub fn build(
        state: Option<RowState>,
        progress: Progress,
        target_steps: u64,
        ideal_cycle_time: f64,
        now: DateTime<Utc>,
    ) -> Self {
        let metrics: Metrics = progress.totals.metrics(ideal_cycle_time);
        Self {
            state,
            closed: state == Some(RowState::Stopped),
            target_steps,
            ideal_cycle_time,
            totals: progress.totals,
            availability_pct: metrics.availability * 100.0,
            performance_pct: metrics.performance * 100.0,
            quality_pct: metrics.quality * 100.0,
            oee_pct: metrics.oee * 100.0,
            eta: estimate_eta(&progress, target_steps, ideal_cycle_time, now),
        }
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let heading = if self.closed {
            "FINAL SHIFT REPORT"
        } else {
            "SHIFT REPORT (session still open)"
        };
        let state = self.state.map(|s| s.code()).unwrap_or("-");
        let totals = &self.totals;

        let _ = writeln!(out, "{heading}");
        let _ = writeln!(out, "  OEE           {:>6.1}%", self.oee_pct);
        let _ = writeln!(out, "  Availability  {:>6.1}%", self.availability_pct);
        let _ = writeln!(out, "  Performance   {:>6.1}%", self.performance_pct);
        let _ = writeln!(out, "  Quality       {:>6.1}%", self.quality_pct);
        let _ = writeln!(out, "  State         {state}");
        let _ = writeln!(
            out,
            "  Output        {} / {} ({} defects)",
            totals.total_count, self.target_steps, totals.defects
        );
        let _ = writeln!(
            out,
            "  Time          production {:.1}s, setup {:.1}s, downtime {:.1}s",
            totals.prod_time, totals.setup_time, totals.down_time
        );
        let _ = writeln!(out, "  ETA           {}", format_eta(&self.eta));
        out
    }
}

pub fn format_eta(eta: &Eta) -> String {
    match eta {
        Eta::Unknown => "unknown".to_string(),
        Eta::Reached => "target reached".to_string(),
        Eta::Remaining { seconds, finish_at } => format!(
            "{} ({:.0}s left)",
            finish_at.with_timezone(&Local).format("%H:%M:%S"),
            seconds
        ),
    }
}
