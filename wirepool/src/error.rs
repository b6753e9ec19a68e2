//! Engine-wide error type.
//!
//! Component boundaries return `Result<T, EngineError>`; programmer errors
//! (contract violations the caller could have checked) still panic.

use std::{io, path::PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("network error ({detail}): {source}")]
    Network {
        detail: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("file error at {path}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("allocation failed")]
    Memory,

    #[error("thread error: {0}")]
    Thread(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("protocol timeout after sending {sent} bytes")]
    ProtocolTimeout { sent: usize },
}

impl EngineError {
    pub fn network(detail: &'static str, source: io::Error) -> Self {
        Self::Network { detail, source }
    }

    pub fn file(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::File { path: path.into(), source }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
