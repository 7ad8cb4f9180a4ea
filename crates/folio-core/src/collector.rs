//! Mutation collector: folds a live event stream into an ordered collection.
//!
//! # Lifecycle
//!
//! 1. [`MutationCollector::start`] clears the collection and opens exactly one
//!    subscription. A previous subscription and any pending retry are torn
//!    down first.
//! 2. Every stream item is applied synchronously, in delivery order:
//!    add/update upsert by identity (replace in place, else append), remove
//!    deletes by identity.
//! 3. A transient [`StreamError`] (`please_retry_in` set) schedules a full
//!    restart through the [`RetryScheduler`]. The restart clears the
//!    collection again; there is no incremental resume.
//! 4. A terminal error is logged and the collection freezes at its last state.
//! 5. [`MutationCollector::abort`] detaches the stream and cancels the retry.
//!
//! # Epochs
//!
//! Each subscription is tagged with an epoch. Starting, restarting, or
//! aborting bumps the epoch, and the drain task checks it before applying an
//! item, so a superseded subscription can never mutate the collection even if
//! its task has not been dropped yet.

use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::time::Duration;

use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::collection::{Collection, CollectionView};
use crate::event::{EventSource, EventStream, Mutation, MutationKind, StreamError, StreamItem, StreamOptions};
use crate::record::Record;
use crate::retry::RetryScheduler;

/// Where the collector is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectorStatus {
    /// Never started.
    Idle,
    /// A subscription is open.
    Streaming,
    /// The stream failed transiently; a restart is armed.
    RetryPending { delay: Duration },
    /// The stream ended normally (non-live subscription).
    Ended,
    /// The stream failed terminally. No further attempts.
    Failed(StreamError),
    /// [`MutationCollector::abort`] was called.
    Aborted,
}

struct State {
    epoch: u64,
    drain: Option<JoinHandle<()>>,
    retry: RetryScheduler,
    status: CollectorStatus,
    synced: bool,
    restarts: u64,
    applied: u64,
}

struct Shared {
    collection: Collection<Rc<Record>>,
    state: RefCell<State>,
}

/// Owns the local record collection and the single live subscription
/// feeding it.
pub struct MutationCollector {
    shared: Rc<Shared>,
}

impl Default for MutationCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MutationCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.borrow();
        f.debug_struct("MutationCollector")
            .field("epoch", &state.epoch)
            .field("status", &state.status)
            .field("len", &self.shared.collection.view().len())
            .finish_non_exhaustive()
    }
}

impl MutationCollector {
    /// Create an idle collector with an empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Rc::new(Shared {
                collection: Collection::new(),
                state: RefCell::new(State {
                    epoch: 0,
                    drain: None,
                    retry: RetryScheduler::new(),
                    status: CollectorStatus::Idle,
                    synced: false,
                    restarts: 0,
                    applied: 0,
                }),
            }),
        }
    }

    /// Read-only handle to the collected records.
    #[must_use]
    pub fn collection(&self) -> CollectionView<Rc<Record>> {
        self.shared.collection.view()
    }

    /// Clear the collection and subscribe to `source`.
    ///
    /// Supersedes any running subscription and pending retry. Must be called
    /// inside a `tokio::task::LocalSet`.
    pub fn start<S>(&self, source: S, options: StreamOptions)
    where
        S: EventSource + 'static,
    {
        let source: Rc<dyn EventSource> = Rc::new(source);
        connect(&self.shared, source, options);
    }

    /// Detach the stream and cancel any pending retry.
    ///
    /// Idempotent. No collection mutation happens after this returns.
    pub fn abort(&self) {
        let mut state = self.shared.state.borrow_mut();
        state.epoch += 1;
        state.retry.cancel();
        if let Some(drain) = state.drain.take() {
            drain.abort();
        }
        if state.status != CollectorStatus::Aborted {
            info!(epoch = state.epoch, "collector aborted");
            state.status = CollectorStatus::Aborted;
        }
    }

    /// Current lifecycle status.
    #[must_use]
    pub fn status(&self) -> CollectorStatus {
        self.shared.state.borrow().status.clone()
    }

    /// Whether the current subscription has delivered its initial snapshot.
    #[must_use]
    pub fn is_synced(&self) -> bool {
        self.shared.state.borrow().synced
    }

    /// Number of restarts performed after transient failures.
    #[must_use]
    pub fn restarts(&self) -> u64 {
        self.shared.state.borrow().restarts
    }

    /// Number of mutations applied since creation.
    #[must_use]
    pub fn applied(&self) -> u64 {
        self.shared.state.borrow().applied
    }

    /// Whether a retry is armed.
    #[must_use]
    pub fn retry_pending(&self) -> bool {
        self.shared.state.borrow().retry.is_pending()
    }
}

impl Drop for MutationCollector {
    fn drop(&mut self) {
        let mut state = self.shared.state.borrow_mut();
        state.epoch += 1;
        state.retry.cancel();
        if let Some(drain) = state.drain.take() {
            drain.abort();
        }
    }
}

fn connect(shared: &Rc<Shared>, source: Rc<dyn EventSource>, options: StreamOptions) {
    let epoch = {
        let mut state = shared.state.borrow_mut();
        state.retry.cancel();
        if let Some(drain) = state.drain.take() {
            drain.abort();
        }
        state.epoch += 1;
        state.synced = false;
        state.status = CollectorStatus::Streaming;
        state.epoch
    };

    shared.collection.clear();
    info!(epoch, sync = options.sync, live = options.live, "subscription opened");

    let stream = source.subscribe(options);
    let drain = tokio::task::spawn_local(drain(
        Rc::downgrade(shared),
        source,
        options,
        epoch,
        stream,
    ));

    let mut state = shared.state.borrow_mut();
    if state.epoch == epoch {
        state.drain = Some(drain);
    } else {
        // Superseded while subscribing.
        drain.abort();
    }
}

async fn drain(
    shared: Weak<Shared>,
    source: Rc<dyn EventSource>,
    options: StreamOptions,
    epoch: u64,
    mut stream: EventStream,
) {
    while let Some(item) = stream.next().await {
        let Some(shared) = shared.upgrade() else {
            return;
        };
        if !shared.is_current(epoch) {
            return;
        }
        match item {
            Ok(StreamItem::Mutation(mutation)) => shared.apply(mutation),
            Ok(StreamItem::Synced) => {
                debug!(epoch, "initial snapshot delivered");
                shared.state.borrow_mut().synced = true;
            }
            Err(err) => {
                drop(stream);
                on_stream_error(&shared, source, options, epoch, err);
                return;
            }
        }
    }

    if let Some(shared) = shared.upgrade() {
        let mut state = shared.state.borrow_mut();
        if state.epoch == epoch {
            debug!(epoch, "stream ended");
            state.status = CollectorStatus::Ended;
            state.drain = None;
        }
    }
}

fn on_stream_error(
    shared: &Rc<Shared>,
    source: Rc<dyn EventSource>,
    options: StreamOptions,
    epoch: u64,
    err: StreamError,
) {
    let mut state = shared.state.borrow_mut();
    state.drain = None;

    let Some(delay) = err.please_retry_in else {
        error!(
            code = %err.code(),
            epoch,
            message = %err.message,
            "event stream terminated; synchronization paused"
        );
        state.status = CollectorStatus::Failed(err);
        return;
    };

    warn!(
        code = %err.code(),
        epoch,
        delay_ms = delay.as_millis(),
        message = %err.message,
        "event stream interrupted; restarting after delay"
    );
    state.status = CollectorStatus::RetryPending { delay };

    let weak = Rc::downgrade(shared);
    state.retry.schedule(delay, move || {
        let Some(shared) = weak.upgrade() else {
            return;
        };
        {
            let mut state = shared.state.borrow_mut();
            if state.epoch != epoch {
                return;
            }
            state.restarts += 1;
        }
        connect(&shared, source, options);
    });
}

impl Shared {
    fn is_current(&self, epoch: u64) -> bool {
        self.state.borrow().epoch == epoch
    }

    fn apply(&self, mutation: Mutation) {
        let Mutation { kind, record } = mutation;
        let identity = record.identity().clone();
        let position = self
            .collection
            .position(|existing| existing.identity() == &identity);

        match (kind, position) {
            (MutationKind::Add | MutationKind::Update, Some(index)) => {
                debug!(%identity, key = %record.key, index, "replace");
                self.collection.replace(index, record);
            }
            (MutationKind::Add | MutationKind::Update, None) => {
                debug!(%identity, key = %record.key, "append");
                self.collection.push(record);
            }
            (MutationKind::Remove, Some(index)) => {
                debug!(%identity, index, "remove");
                self.collection.remove(index);
            }
            (MutationKind::Remove, None) => {
                debug!(%identity, "remove for unknown identity ignored");
            }
        }
        self.state.borrow_mut().applied += 1;
    }
}
