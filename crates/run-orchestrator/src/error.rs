use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunError {
    /// Another run is already in state `running`.
    #[error("a run is already running")]
    AlreadyRunning,

    /// Market time is at or after the end-of-day cutoff.
    #[error("end-of-day cutoff {0} has passed")]
    PastCutoff(String),

    #[error("run {0} not found")]
    NotFound(i64),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}
