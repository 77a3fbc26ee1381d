pub mod line;
pub mod reading;
pub mod scripted;
pub mod simulated;

use std::future::Future;

use chrono::{DateTime, Utc};

pub use line::LineSignalSource;
pub use reading::{parse_event, Reading, SourceEvent};
pub use scripted::ScriptedSignalSource;
pub use simulated::SimulatedSignalSource;

/// Anything that can hand the engine a stream of readings.
///
/// `read_next` must return within a bounded time: a feed with nothing to say
/// yields an `Unavailable` reading rather than blocking. `None` means the feed
/// has ended for good.
pub trait SignalSource {
    fn read_next(&mut self) -> impl Future<Output = Option<Reading>> + Send;

    /// Current time on this feed's timeline.
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn describe(&self) -> String;
}

/// The feed chosen at startup.
pub enum AnySource {
    Line(LineSignalSource),
    Simulated(SimulatedSignalSource),
    Scripted(ScriptedSignalSource),
}

impl SignalSource for AnySource {
    async fn read_next(&mut self) -> Option<Reading> {
        match self {
            AnySource::Line(source) => source.read_next().await,
            AnySource::Simulated(source) => source.read_next().await,
            AnySource::Scripted(source) => source.read_next().await,
        }
    }

    fn now(&self) -> DateTime<Utc> {
        match self {
            AnySource::Line(source) => source.now(),
            AnySource::Simulated(source) => source.now(),
            AnySource::Scripted(source) => source.now(),
        }
    }

    fn describe(&self) -> String {
        match self {
            AnySource::Line(source) => source.describe(),
            AnySource::Simulated(source) => source.describe(),
            AnySource::Scripted(source) => source.describe(),
        }
    }
}

impl From<LineSignalSource> for AnySource {
    fn from(source: LineSignalSource) -> Self {
        AnySource::Line(source)
    }
}

impl From<SimulatedSignalSource> for AnySource {
    fn from(source: SimulatedSignalSource) -> Self {
        AnySource::Simulated(source)
    }
}

impl From<ScriptedSignalSource> for AnySource {
    fn from(source: ScriptedSignalSource) -> Self {
        AnySource::Scripted(source)
    }
}
