pub mod accumulator;
pub mod classifier;
pub mod error;

pub use accumulator::{Advance, OeeAccumulator, SessionParams, SessionPhase, UnitCounting};
pub use classifier::{classify, RawSignal};
pub use error::SessionError;
