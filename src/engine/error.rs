use thiserror::Error;

/// Rejections at the accumulator boundary.
///
/// Both indicate a caller bug or invalid operator input; neither is retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("session is closed; readings and unit counts are no longer accepted")]
    Closed,
    #[error("defect count {defects} is out of range: must be between 0 and {total_count}")]
    DefectsOutOfRange { defects: i64, total_count: u64 },
}
