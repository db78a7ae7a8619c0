use std::path::PathBuf;

/// Errors for genuinely exceptional failures: broken pool files, malformed
/// problem documents, unusable child process handles. Judging outcomes
/// (wrong answers, timeouts, user aborts) are never reported through this
/// type; they travel as [`crate::outcome::Outcome`] values.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("{0}")]
    Problem(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn problem(msg: impl Into<String>) -> Self {
        Error::Problem(msg.into())
    }
}
