use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while resolving or inspecting a data source.
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// No registered connector handles the URI.
    #[error("unsupported source '{uri}' (known schemes: {known})")]
    Unsupported { uri: String, known: String },

    #[error("cannot reach {target}: {message}")]
    Unreachable { target: String, message: String },

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

impl ConnectorError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| ConnectorError::Io { path, source }
    }

    pub(crate) fn parse(path: impl Into<PathBuf>) -> impl FnOnce(String) -> Self {
        let path = path.into();
        move |message| ConnectorError::Parse { path, message }
    }
}
