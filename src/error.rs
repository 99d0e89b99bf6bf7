use std::path::PathBuf;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("i/o failure on {path:?}: {inner}")]
    Io {
        path: PathBuf,
        inner: std::io::Error,
    },

    #[error("malformed idx file {path:?}: {reason}")]
    InvalidIdx { path: PathBuf, reason: String },

    #[error("failed to download {url}: {reason}")]
    Download { url: String, reason: String },

    #[error("split has {images} images but {labels} labels")]
    LengthMismatch { images: usize, labels: usize },

    #[error("failed to {action} {path:?}: {reason}")]
    Record {
        action: &'static str,
        path: PathBuf,
        reason: String,
    },

    #[error("failed to load config {path:?}: {reason}")]
    ConfigLoad { path: PathBuf, reason: String },

    #[error("could not find a trained model in {0:?}")]
    NoCheckpoint(PathBuf),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("bad command-line arguments: {0}")]
    Args(#[from] pico_args::Error),

    #[error("unused command-line arguments: {0:?}")]
    UnusedArgs(Vec<std::ffi::OsString>),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, inner: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            inner,
        }
    }

    pub(crate) fn invalid_idx(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::InvalidIdx {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
