use thiserror::Error;

/// Reasons a source is rejected after inspection
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("no video stream found in file")]
    NoVideoStream,
}

/// Failures of the delivery stage
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UploadError {
    /// Payload grew past the configured cap before any transfer began
    #[error("file is too big, max. allowed size is {limit}")]
    TooLarge { limit: String },
    #[error("{0}")]
    Sink(String),
}

/// Every way a single job can end without delivering its payload.
///
/// All variants are local to one job: the worker renders them as the job's
/// terminal status and moves on to the next queued entry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("download failed: {0}")]
    Download(String),
    #[error("probe failed: {0}")]
    Probe(String),
    #[error("conversion failed: {0}")]
    Conversion(String),
    #[error("upload failed: {0}")]
    Upload(#[from] UploadError),
    #[error("canceled")]
    Canceled,
    #[error("timed out")]
    TimedOut,
}

/// Rejections of a submitted command before it reaches the queue
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("please enter an URL to download")]
    InvalidUrl,
    #[error("invalid command: {0}")]
    InvalidCommand(String),
}

pub type JobResult<T> = std::result::Result<T, JobError>;
