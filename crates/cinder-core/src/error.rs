//! Transport error kinds.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransportError {
    /// The engine rejected a start. Transport stays paused.
    #[error("backend failed to start: {0}")]
    BackendStartFailed(String),

    #[error("backend failed to stop: {0}")]
    BackendStopFailed(String),

    /// A start was superseded by a stop or teardown before it began.
    #[error("backend start cancelled")]
    BackendCancelled,

    /// The audio timing source could not be created.
    #[error("audio clock unavailable: {0}")]
    ClockUnavailable(String),

    #[error("track index out of range: {0}")]
    IndexOutOfRange(usize),

    #[error("playlist is empty")]
    EmptyPlaylist,
}

impl TransportError {
    /// Cancellations are expected during fast switching and never surface.
    pub fn is_reportable(&self) -> bool {
        !matches!(self, TransportError::BackendCancelled)
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
