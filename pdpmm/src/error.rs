use std::path::PathBuf;

use thiserror::Error;

/// Result alias for `pdpmm`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that abort a run before any artifact is written.
///
/// Numerical degeneracies are deliberately absent: they are repaired in place
/// by [`crate::linalg::regularized_cholesky`].
#[derive(Debug, Error)]
pub enum Error {
    /// The configuration or the hyperparameter vector is invalid.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The observation table could not be read or does not match the
    /// declared shape.
    #[error("invalid input {}: {message}", .path.display())]
    Input { path: PathBuf, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error(transparent)]
    Persist(#[from] tempfile::PersistError),
}

impl Error {
    pub(crate) fn config<S: Into<String>>(message: S) -> Self {
        Self::Config(message.into())
    }

    pub(crate) fn input<P, S>(path: P, line: Option<u64>, message: S) -> Self
    where
        P: Into<PathBuf>,
        S: Into<String>,
    {
        let message = match line {
            Some(line) => format!("line {line}: {}", message.into()),
            None => message.into(),
        };
        Self::Input {
            path: path.into(),
            message,
        }
    }
}
