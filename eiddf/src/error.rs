use std::path::PathBuf;

use eidcore::error::CoreError;
use thiserror::Error;

pub type DataResult<T> = Result<T, DataError>;

/// Errors raised while reading shards, persisting scalers or loading configuration.
#[derive(Debug, Error)]
pub enum DataError {
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("encode error: {0}")]
    Encode(#[from] bincode::error::EncodeError),
    #[error("decode error: {0}")]
    Decode(#[from] bincode::error::DecodeError),
    #[error("thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("corrupt file {path}: {msg}")]
    Corrupt { path: PathBuf, msg: String },
}

impl DataError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DataError::Io { path: path.into(), source }
    }

    pub fn corrupt(path: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        DataError::Corrupt { path: path.into(), msg: msg.into() }
    }
}
