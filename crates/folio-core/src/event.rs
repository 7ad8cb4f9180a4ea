//! Live event stream model.
//!
//! An [`EventSource`] opens a stream of [`StreamItem`]s for a set of
//! [`StreamOptions`]. The stream yields record mutations in log order, an
//! optional [`StreamItem::Synced`] marker once the initial snapshot has been
//! delivered, and may terminate with a [`StreamError`]. An error carrying
//! `please_retry_in` is transient: the server asks to be re-subscribed after
//! that delay.

use std::rc::Rc;
use std::time::Duration;

use futures::stream::LocalBoxStream;
use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;
use crate::record::Record;

/// Subscription options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamOptions {
    /// Deliver the current state of the log (then a `Synced` marker) before
    /// live updates.
    pub sync: bool,
    /// Keep streaming changes after the snapshot.
    pub live: bool,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            sync: true,
            live: true,
        }
    }
}

/// Kind of a record mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationKind {
    /// A record identity appeared.
    Add,
    /// A new revision of a known identity arrived.
    Update,
    /// The identity left the log view.
    Remove,
}

/// One record mutation delivered by the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mutation {
    pub kind: MutationKind,
    pub record: Rc<Record>,
}

impl Mutation {
    #[must_use]
    pub fn add(record: Rc<Record>) -> Self {
        Self {
            kind: MutationKind::Add,
            record,
        }
    }

    #[must_use]
    pub fn update(record: Rc<Record>) -> Self {
        Self {
            kind: MutationKind::Update,
            record,
        }
    }

    #[must_use]
    pub fn remove(record: Rc<Record>) -> Self {
        Self {
            kind: MutationKind::Remove,
            record,
        }
    }
}

/// Item yielded by an event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamItem {
    Mutation(Mutation),
    /// The initial snapshot is complete; everything after this is live.
    Synced,
}

/// Error terminating an event stream.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct StreamError {
    pub message: String,
    /// Server-supplied delay after which a fresh subscription may succeed.
    /// `None` means the failure is terminal.
    pub please_retry_in: Option<Duration>,
}

impl StreamError {
    /// A transient failure: re-subscribe after `delay`.
    pub fn transient(message: impl Into<String>, delay: Duration) -> Self {
        Self {
            message: message.into(),
            please_retry_in: Some(delay),
        }
    }

    /// A terminal failure: no further attempts.
    pub fn terminal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            please_retry_in: None,
        }
    }

    /// Whether the server asked for a retry.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        self.please_retry_in.is_some()
    }

    /// Machine-readable code associated with this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        if self.is_transient() {
            ErrorCode::StreamInterrupted
        } else {
            ErrorCode::StreamTerminated
        }
    }
}

/// A live, ordered stream of mutations.
pub type EventStream = LocalBoxStream<'static, Result<StreamItem, StreamError>>;

/// Factory for event streams.
///
/// Any `Fn(StreamOptions) -> EventStream` closure is a source.
pub trait EventSource {
    /// Open a new stream. Each call is an independent subscription.
    fn subscribe(&self, options: StreamOptions) -> EventStream;
}

impl<F> EventSource for F
where
    F: Fn(StreamOptions) -> EventStream,
{
    fn subscribe(&self, options: StreamOptions) -> EventStream {
        self(options)
    }
}
