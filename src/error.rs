use thiserror::Error;

use crate::record::Record;

pub type Result<T, E = WalError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum WalError {
    #[error("invalid log configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("truncated record frame: expected {expected} bytes, found {found}")]
    Truncated { expected: usize, found: usize },

    #[error("log is closed")]
    Closed,
}

/// Failure of a read path, carrying every record decoded before the first
/// error so callers can see what was recoverable.
#[derive(Error, Debug)]
#[error("{source}")]
pub struct ReadError {
    pub recovered: Vec<Record>,
    #[source]
    pub source: WalError,
}
