pub mod record;
pub mod state;

pub use record::{Metrics, Totals, TransitionRecord};
pub use state::{MachineState, RowState};
