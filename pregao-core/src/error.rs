//! Error types for acquisition and ETL.
//!
//! Per-item retrieval problems never show up here: they are captured as
//! [`Outcome`](crate::retriever::Outcome) values in the retrieval report.
//! Everything in [`EtlError`] is fatal to the current pipeline run.

use std::path::PathBuf;
use thiserror::Error;

/// Transport-level failure raised by a content source.
///
/// "Nothing published for this date" is not an error; sources return
/// `Ok(None)` for that.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("unexpected HTTP status {status} for {url}")]
    UnexpectedStatus { status: u16, url: String },

    #[error("invalid locator '{0}'")]
    InvalidLocator(String),

    #[error("listing page could not be parsed: {0}")]
    Listing(String),

    #[error("source error: {0}")]
    Other(String),
}

impl From<reqwest::Error> for SourceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SourceError::Timeout(e.to_string())
        } else if e.is_connect() {
            SourceError::NetworkUnreachable(e.to_string())
        } else if let Some(status) = e.status() {
            SourceError::UnexpectedStatus {
                status: status.as_u16(),
                url: e.url().map(|u| u.to_string()).unwrap_or_default(),
            }
        } else {
            SourceError::Other(e.to_string())
        }
    }
}

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Fatal errors of an ETL run.
#[derive(Debug, Error)]
pub enum EtlError {
    /// The content source could not be set up (bad URL, HTTP client
    /// construction).
    #[error("content source '{name}' failed: {source}")]
    Source {
        name: String,
        #[source]
        source: SourceError,
    },

    /// An artifact could not be converted into a table.
    #[error("failed to parse artifact {artifact}: {reason}")]
    Parse { artifact: PathBuf, reason: String },

    /// An artifact or output dataset could not be persisted.
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("polars error: {0}")]
    Polars(#[from] polars::prelude::PolarsError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// `extract()` tried to read a lazy dataset accessor while it was
    /// already populating that dataset.
    #[error("extract() re-entered while populating datasets")]
    ReentrantExtract,
}

impl EtlError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        EtlError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        EtlError::Write {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn parse(artifact: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        EtlError::Parse {
            artifact: artifact.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T, E = EtlError> = std::result::Result<T, E>;
