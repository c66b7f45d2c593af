//! Error types for the looper core.

use crate::track::TrackId;

/// Errors surfaced by imperative looper operations.
///
/// All of these are recoverable: the operation that returned one left the
/// clock and track state as it was before the call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LooperError {
    #[error("unknown track: {0}")]
    UnknownTrack(TrackId),

    #[error("tick source has not been started")]
    NotStarted,

    #[error("invalid timing: {0}")]
    InvalidTiming(String),

    #[error("invalid follow: {0}")]
    InvalidFollow(String),

    #[error("invalid track record: {0}")]
    InvalidRecord(String),
}

pub type Result<T> = std::result::Result<T, LooperError>;
