//! Crate-wide error types.
//!
//! Each variant maps to a recovery policy: blob, upstream and metadata
//! errors abort the current task and the node returns to FREE; an
//! out-of-range offset classification is terminal for the task; a config
//! error is fatal at startup.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("blob store error: {0}")]
    BlobIo(String),

    #[error("upstream log unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("metadata store error: {0}")]
    MetadataStore(String),

    #[error("metadata entry already exists: {0}")]
    AlreadyExists(String),

    #[error("offset range [{task_start}, {task_end}] outside retained range [{earliest}, {latest}]")]
    OffsetOutOfRange {
        earliest: i64,
        latest: i64,
        task_start: i64,
        task_end: i64,
    },

    #[error("index error: {0}")]
    Index(String),

    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::BlobIo(err.to_string())
    }
}
