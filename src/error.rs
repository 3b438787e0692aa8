// ABOUTME: Error taxonomy for the dump migration pipeline
// ABOUTME: Separates fatal errors (decode, connection) from per-statement and per-table failures

use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Input bytes could not be turned into trustworthy text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("dump is empty")]
    Empty,

    #[error("dump is not valid UTF-8 (first invalid byte at offset {offset}) and lossy decoding is disabled")]
    InvalidUtf8 { offset: usize },

    #[error("dump looks like binary data: {replaced} of {total} characters could not be decoded")]
    Undecodable { replaced: usize, total: usize },
}

/// Failure reported by a target store for a single request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("{0}")]
    Rejected(String),
}

/// One statement failed at the target store. Recorded, never fatal.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("statement #{ordinal} failed: {message}")]
pub struct StatementExecutionError {
    pub ordinal: usize,
    pub message: String,
    pub timed_out: bool,
}

impl StatementExecutionError {
    pub fn from_store(ordinal: usize, err: &StoreError) -> Self {
        Self {
            ordinal,
            message: err.to_string(),
            timed_out: matches!(err, StoreError::Timeout(_)),
        }
    }
}

/// A post-import check could not be completed for one table.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("verification of '{table}' failed: {message}")]
pub struct VerificationError {
    pub table: String,
    pub message: String,
}

/// The target store could not be reached before any statement was attempted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("cannot connect to target {target}: {message}")]
pub struct ConnectionError {
    pub target: String,
    pub message: String,
}

/// Errors that end a run in the `Aborted` state.
#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("failed to decode {}: {source}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: DecodeError,
    },

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl MigrationError {
    pub fn decode(path: impl Into<PathBuf>, source: DecodeError) -> Self {
        MigrationError::Decode {
            path: path.into(),
            source,
        }
    }

    pub fn read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MigrationError::Read {
            path: path.into(),
            source,
        }
    }
}
