use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

/// An external encoder or subtitle converter refused the job.
///
/// Carries the diagnostic text the tool printed, or a short description when the
/// tool never got far enough to print anything.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct EncoderError {
    pub message: String,
}

impl EncoderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Encoder(#[from] EncoderError),

    #[error("path not found: {}", .0.display())]
    MissingPath(PathBuf),

    #[error("I/O error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("catalog request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected catalog response: {0}")]
    Catalog(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
