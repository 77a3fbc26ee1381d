//! Durable per-session CSV record: one row per transition, checkpoint and close.

pub mod reader;
pub mod replay;
pub mod writer;

pub use reader::{list_journals, parse_journal, read_journal};
pub use replay::{replay, ReplayedSession};
pub use writer::{JournalError, JournalWriter};
