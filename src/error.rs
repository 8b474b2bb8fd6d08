use thiserror::Error;

/// Errors surfaced to callers of the enqueue-side API.
///
/// Everything that can go wrong *after* a job is enqueued is reported
/// through the job's `status`/`error_message` instead (the worker never
/// lets an extraction or persistence failure escape as an error value).
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("no extractor registered for domain {domain:?}")]
    UnsupportedSource { domain: String },

    #[error("invalid source url {url:?}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Failure reaching or parsing source pages.
///
/// At novel level (metadata, chapter list) this fails the whole job; at
/// chapter level it is downgraded to a recorded [`ChapterFailure`].
///
/// [`ChapterFailure`]: crate::app::model::ChapterFailure
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ExtractionError {
    message: String,
}

impl ExtractionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Failure writing canonical records. A batch that returns this has not
/// made any of its writes visible.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct PersistenceError {
    message: String,
}

impl PersistenceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
