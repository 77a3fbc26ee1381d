use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::{self, Duration};

use crate::models::MachineState;

use super::{Reading, SignalSource};

const ENABLE_LOGS: bool = true;

use crate::log_debug;

/// Chance that a read comes back empty, mimicking a flaky link.
const STALL_PROBABILITY: f64 = 0.05;
/// Mean number of reads the line dwells in a state before moving on.
const MEAN_DWELL_READS: u32 = 150;

/// Pseudo-random stand-in for the stack light.
///
/// Wanders between states with a bias towards production and, while
/// producing, finishes units at roughly the ideal cycle time (give or take
/// 20%). Seeded runs are reproducible in sequence, not in wall-clock timing.
pub struct SimulatedSignalSource {
    rng: StdRng,
    tick: Duration,
    ideal_cycle_time: f64,
    state: MachineState,
    dwell_remaining: u32,
    /// Production seconds accumulated towards the next unit.
    unit_progress: f64,
    last_read_at: Option<DateTime<Utc>>,
}

impl SimulatedSignalSource {
    pub fn new(tick: Duration, ideal_cycle_time: f64, seed: Option<u64>) -> Self {
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let dwell_remaining = rng.gen_range(1..=MEAN_DWELL_READS * 2);
        Self {
            rng,
            tick,
            ideal_cycle_time,
            state: MachineState::Production,
            dwell_remaining,
            unit_progress: 0.0,
            last_read_at: None,
        }
    }

    fn next_state(&mut self) -> MachineState {
        let roll: f64 = self.rng.gen();
        match self.state {
            MachineState::Production if roll < 0.5 => MachineState::Setup,
            MachineState::Production => MachineState::Downtime,
            _ if roll < 0.8 => MachineState::Production,
            MachineState::Setup => MachineState::Downtime,
            MachineState::Downtime => MachineState::Setup,
        }
    }
}

impl SignalSource for SimulatedSignalSource {
    async fn read_next(&mut self) -> Option<Reading> {
        time::sleep(self.tick).await;
        let now = Utc::now();
        let elapsed = self
            .last_read_at
            .map(|last| (now - last).num_milliseconds().max(0) as f64 / 1_000.0)
            .unwrap_or(0.0);
        self.last_read_at = Some(now);

        if self.state == MachineState::Production && self.ideal_cycle_time > 0.0 {
            let speed = self.rng.gen_range(0.8..1.2);
            self.unit_progress += elapsed * speed;
            if self.unit_progress >= self.ideal_cycle_time {
                self.unit_progress -= self.ideal_cycle_time;
                return Some(Reading::unit(now));
            }
        }

        if self.rng.gen_bool(STALL_PROBABILITY) {
            return Some(Reading::unavailable(now));
        }

        self.dwell_remaining = self.dwell_remaining.saturating_sub(1);
        if self.dwell_remaining == 0 {
            let next = self.next_state();
            log_debug!("simulation moving {} -> {}", self.state, next);
            self.state = next;
            self.dwell_remaining = self.rng.gen_range(1..=MEAN_DWELL_READS * 2);
        }

        Some(Reading::signal(self.state.code(), now))
    }

    fn describe(&self) -> String {
        "simulation".to_string()
    }
}
