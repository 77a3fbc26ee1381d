//! One monitoring run from first reading to the closing row.

pub mod close;
pub mod controller;
pub mod loop_worker;
pub mod session;

pub use close::{close_interactively, DefectSource};
pub use controller::{FinishedRun, MonitorController, MonitorOptions, RunningSession};
pub use loop_worker::{ingest_loop, LoopExit, LoopTiming};
pub use session::{LiveSnapshot, MonitorSession};
