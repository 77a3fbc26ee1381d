use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{MachineState, RowState};

/// Running totals owned by a session. Times are in seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Totals {
    pub prod_time: f64,
    pub setup_time: f64,
    pub down_time: f64,
    pub total_count: u64,
    /// Stays at zero until the session is closed.
    pub defects: u64,
}

impl Totals {
    /// Sum of the three time accumulators, i.e. the planned time so far.
    pub fn elapsed(&self) -> f64 {
        self.prod_time + self.setup_time + self.down_time
    }

    pub fn time_in(&self, state: MachineState) -> f64 {
        match state {
            MachineState::Production => self.prod_time,
            MachineState::Setup => self.setup_time,
            MachineState::Downtime => self.down_time,
        }
    }

    pub(crate) fn add_time(&mut self, state: MachineState, secs: f64) {
        match state {
            MachineState::Production => self.prod_time += secs,
            MachineState::Setup => self.setup_time += secs,
            MachineState::Downtime => self.down_time += secs,
        }
    }

    pub fn metrics(&self, ideal_cycle_time: f64) -> Metrics {
        Metrics::compute(self, ideal_cycle_time)
    }
}

/// Availability, performance, quality and OEE as fractions (1.0 == 100%).
///
/// Performance is deliberately left unclamped: a line running faster than its
/// ideal cycle time reports more than 100%.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metrics {
    pub availability: f64,
    pub performance: f64,
    pub quality: f64,
    pub oee: f64,
}

impl Metrics {
    pub fn compute(totals: &Totals, ideal_cycle_time: f64) -> Self {
        let elapsed = totals.elapsed();
        let availability = if elapsed > 0.0 {
            totals.prod_time / elapsed
        } else {
            0.0
        };
        let performance = if totals.prod_time > 0.0 {
            (totals.total_count as f64 * ideal_cycle_time) / totals.prod_time
        } else {
            0.0
        };
        // No units yet means nothing was scrapped either.
        let quality = if totals.total_count > 0 {
            totals.total_count.saturating_sub(totals.defects) as f64 / totals.total_count as f64
        } else {
            1.0
        };

        Self {
            availability,
            performance,
            quality,
            oee: availability * performance * quality,
        }
    }
}

/// Immutable snapshot appended to the session log on every state change,
/// checkpoint and close.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionRecord {
    pub timestamp: DateTime<Utc>,
    pub state: RowState,
    pub totals: Totals,
    pub metrics: Metrics,
}

impl TransitionRecord {
    pub fn new(
        timestamp: DateTime<Utc>,
        state: RowState,
        totals: Totals,
        ideal_cycle_time: f64,
    ) -> Self {
        Self {
            timestamp,
            state,
            totals,
            metrics: totals.metrics(ideal_cycle_time),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn closing_numbers_are_not_clamped() {
        let totals = Totals {
            prod_time: 150.0,
            setup_time: 0.0,
            down_time: 0.0,
            total_count: 20,
            defects: 3,
        };
        let metrics = totals.metrics(8.5);

        assert!(approx(metrics.quality, 0.85));
        assert!(approx(metrics.performance, 170.0 / 150.0));
        assert!(metrics.performance > 1.0);
        assert!(approx(metrics.availability, 1.0));
        assert!(approx(metrics.oee, (170.0 / 150.0) * 0.85));
    }

    #[test]
    fn zero_production_time_reports_zero_performance() {
        let totals = Totals {
            prod_time: 0.0,
            setup_time: 30.0,
            down_time: 12.0,
            total_count: 4,
            defects: 1,
        };
        let metrics = totals.metrics(8.5);

        assert_eq!(metrics.performance, 0.0);
        assert_eq!(metrics.availability, 0.0);
        assert_eq!(metrics.oee, 0.0);
        assert!(metrics.performance.is_finite());
    }

    #[test]
    fn empty_session_has_vacuously_perfect_quality() {
        let metrics = Totals::default().metrics(20.0);
        assert_eq!(metrics.quality, 1.0);
        assert_eq!(metrics.availability, 0.0);
        assert_eq!(metrics.performance, 0.0);
    }

    #[test]
    fn availability_is_share_of_production_time() {
        let totals = Totals {
            prod_time: 30.0,
            setup_time: 10.0,
            down_time: 20.0,
            ..Totals::default()
        };
        assert!(approx(totals.metrics(1.0).availability, 0.5));
        assert!(approx(totals.elapsed(), 60.0));
        assert!(approx(totals.time_in(MachineState::Downtime), 20.0));
    }
}
