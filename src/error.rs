//! Domain error taxonomy.
//!
//! Four failure classes with distinct handling policies:
//! - [`Error::TransientIo`] — collaborator I/O expected to succeed on the next
//!   scheduled pass; isolated per file, never aborts the batch.
//! - [`Error::InvalidConfig`] — rejected at startup (config file) or per
//!   request (query parameters); never retried.
//! - [`Error::PartialBatchFailure`] — the batch completed but some files ended
//!   `Failed`; reported in the batch summary.
//! - [`Error::QueryCollaborator`] — a search-path collaborator failed; the
//!   request fails fast, no degraded results are returned.

#[derive(Debug)]
pub enum Error {
    TransientIo(String),
    InvalidConfig(String),
    PartialBatchFailure { failed: usize, total: usize },
    QueryCollaborator(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::TransientIo(e) => write!(f, "transient I/O error: {}", e),
            Error::InvalidConfig(e) => write!(f, "invalid configuration: {}", e),
            Error::PartialBatchFailure { failed, total } => {
                write!(f, "batch completed with {} of {} files failed", failed, total)
            }
            Error::QueryCollaborator(e) => write!(f, "query collaborator error: {}", e),
        }
    }
}

impl std::error::Error for Error {}

impl Error {
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Error::InvalidConfig(msg.into())
    }
}
