use thiserror::Error;

/// Errors produced by the job lifecycle, the stores and the archive.
#[derive(Debug, Error)]
pub enum JobmonError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("a job with that jobId, cluster and startTime already exists: dbid: {id}")]
    DuplicateJob { id: i64 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Storage error: {0}")]
    Storage(String),

    /// The job row was committed but attaching its tags failed.
    #[error("adding tag to new job {id} failed: {source}")]
    PartialStart {
        id: i64,
        #[source]
        source: Box<JobmonError>,
    },

    #[error("Archival error: {0}")]
    Archival(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),
}

pub type Result<T> = std::result::Result<T, JobmonError>;

impl From<rusqlite::Error> for JobmonError {
    fn from(err: rusqlite::Error) -> Self {
        JobmonError::Storage(err.to_string())
    }
}

impl From<std::io::Error> for JobmonError {
    fn from(err: std::io::Error) -> Self {
        JobmonError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for JobmonError {
    fn from(err: serde_json::Error) -> Self {
        JobmonError::Storage(err.to_string())
    }
}

impl From<reqwest::Error> for JobmonError {
    fn from(err: reqwest::Error) -> Self {
        JobmonError::Archival(err.to_string())
    }
}

impl From<tokio::task::JoinError> for JobmonError {
    fn from(err: tokio::task::JoinError) -> Self {
        JobmonError::Storage(format!("blocking task failed: {}", err))
    }
}
