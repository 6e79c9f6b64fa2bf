use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Error taxonomy of a filter run.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid or missing user input. Raised before anything touches the destination.
    #[error("{0}")]
    Config(String),

    #[error("{}: {source:#}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    /// Column layout that cannot be reconciled without losing data.
    #[error("{0}")]
    Schema(String),
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: impl Into<anyhow::Error>) -> Self {
        Error::Io {
            path: path.into(),
            source: source.into(),
        }
    }

    /// Short category name printed in front of the message.
    pub fn category(&self) -> &'static str {
        match self {
            Error::Config(_) => "ConfigError",
            Error::Io { .. } => "IOError",
            Error::Schema(_) => "SchemaError",
        }
    }

    pub fn exit_code(&self) -> u8 {
        match self {
            Error::Config(_) => 2,
            Error::Io { .. } => 3,
            Error::Schema(_) => 4,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Pipeline stage a run was in when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Loading,
    Matching,
    Aggregating,
    Finalizing,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Loading => write!(f, "loading"),
            Stage::Matching => write!(f, "matching"),
            Stage::Aggregating => write!(f, "aggregating"),
            Stage::Finalizing => write!(f, "finalizing"),
        }
    }
}

/// A failed run: the originating error plus the stage it surfaced in.
#[derive(Error, Debug)]
#[error("{} during {stage}: {source}", .source.category())]
pub struct RunError {
    pub stage: Stage,
    #[source]
    pub source: Error,
}

impl RunError {
    pub fn exit_code(&self) -> u8 {
        self.source.exit_code()
    }
}
