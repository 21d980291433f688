use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failures of the outer layer: loading resources, compiling a plan,
/// persisting alias tables. Resolvers themselves never return errors.
#[derive(Debug, Error)]
pub enum CleanError {
    #[error("cannot read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("cannot write {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("gazetteer error: {0}")]
    Gazetteer(String),
    #[error("plan error: {0}")]
    Plan(String),
    #[error("alias table '{0}' is not loaded")]
    UnknownAliasTable(String),
    #[error("alias store conflict on {path}: expected version {expected}, found {found}")]
    AliasConflict {
        path: PathBuf,
        expected: u64,
        found: u64,
    },
    #[error("input table error: {0}")]
    Table(String),
}

pub type Result<T> = std::result::Result<T, CleanError>;

/// Failures talking to an external name service. These never escape a
/// reconciliation batch; they only decide whether a lookup is retried.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{service} is rate limiting requests")]
    RateLimited { service: &'static str },
    #[error("{service} request failed: {source}")]
    Transport {
        service: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{service} returned unexpected data: {reason}")]
    Malformed {
        service: &'static str,
        reason: String,
    },
}
