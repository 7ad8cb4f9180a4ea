//! Publishing new revisions to the log.

use futures::future::LocalBoxFuture;

use crate::error::ErrorCode;
use crate::record::{Content, RecordKey};

/// Errors reported by a [`Publish`] implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PublishError {
    /// The log refused the content.
    #[error("publish rejected: {0}")]
    Rejected(String),

    /// The log could not be reached.
    #[error("log unavailable: {0}")]
    Unavailable(String),
}

impl PublishError {
    /// Machine-readable code associated with this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Rejected(_) => ErrorCode::PublishRejected,
            Self::Unavailable(_) => ErrorCode::LogUnavailable,
        }
    }
}

/// Appends content to the remote log.
pub trait Publish {
    /// Persist `content` as a new message, resolving to its key.
    fn publish(&self, content: Content) -> LocalBoxFuture<'static, Result<RecordKey, PublishError>>;
}

impl<F> Publish for F
where
    F: Fn(Content) -> LocalBoxFuture<'static, Result<RecordKey, PublishError>>,
{
    fn publish(&self, content: Content) -> LocalBoxFuture<'static, Result<RecordKey, PublishError>> {
        self(content)
    }
}
