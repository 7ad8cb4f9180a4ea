//! In-memory append-only log.
//!
//! [`MemoryLog`] stands in for the remote log in tests, the simulator and
//! the CLI. It keeps every appended record, tracks the head (latest
//! revision) of each chain identity in order of first appearance, and
//! broadcasts changes to live subscribers.
//!
//! Keys are content addressed: `blake3:<hex>` over the canonical JSON of the
//! content, salted with the append sequence number so identical content
//! appended twice still gets two keys.
//!
//! A subscription with `sync` first receives one `Add` per head followed by
//! `Synced`; with `live` it then receives every change until the log drops
//! it. Faults can be injected with [`MemoryLog::fail_subscribers`] and
//! [`MemoryLog::fail_next_publish`].

pub mod canonical;

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use futures::FutureExt;
use futures::StreamExt;
use futures::channel::mpsc;
use futures::future::LocalBoxFuture;
use tracing::{debug, info};

use crate::event::{EventSource, EventStream, Mutation, StreamError, StreamItem, StreamOptions};
use crate::publish::{Publish, PublishError};
use crate::record::{Content, Record, RecordKey};
use crate::resolve::{Lookup, LookupError};

use canonical::canonicalize_json;

type Sender = mpsc::UnboundedSender<Result<StreamItem, StreamError>>;

#[derive(Default)]
struct LogState {
    seq: u64,
    records: Vec<Rc<Record>>,
    by_key: HashMap<RecordKey, Rc<Record>>,
    heads: Vec<Rc<Record>>,
    subscribers: Vec<Sender>,
    fail_next_publish: Option<String>,
}

/// Shared handle to an in-memory log. Clones see the same log.
#[derive(Clone, Default)]
pub struct MemoryLog {
    state: Rc<RefCell<LogState>>,
}

impl fmt::Debug for MemoryLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("MemoryLog")
            .field("records", &state.records.len())
            .field("heads", &state.heads.len())
            .field("subscribers", &state.subscribers.len())
            .finish()
    }
}

/// Content-addressed key for the `seq`-th append of `content`.
#[must_use]
pub fn content_key(seq: u64, content: &Content) -> RecordKey {
    let canonical = canonicalize_json(&content.to_value());
    let mut hasher = blake3::Hasher::new();
    hasher.update(seq.to_string().as_bytes());
    hasher.update(b"\t");
    hasher.update(canonical.as_bytes());
    RecordKey::new(format!("blake3:{}", hasher.finalize().to_hex()))
}

impl MemoryLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `content` and broadcast the change. Never fails.
    pub fn append(&self, content: Content) -> Rc<Record> {
        let mut state = self.state.borrow_mut();
        state.seq += 1;
        let key = content_key(state.seq, &content);
        let record = Rc::new(Record::new(key, content));

        state.records.push(Rc::clone(&record));
        state.by_key.insert(record.key.clone(), Rc::clone(&record));

        let identity = record.identity().clone();
        let mutation = match state
            .heads
            .iter()
            .position(|head| head.identity() == &identity)
        {
            Some(index) => {
                state.heads[index] = Rc::clone(&record);
                Mutation::update(Rc::clone(&record))
            }
            None => {
                state.heads.push(Rc::clone(&record));
                Mutation::add(Rc::clone(&record))
            }
        };
        debug!(%identity, key = %record.key, kind = ?mutation.kind, "log append");
        broadcast(&mut state.subscribers, &Ok(StreamItem::Mutation(mutation)));
        record
    }

    /// Drop `identity` from the heads and tell subscribers. Returns the
    /// removed head, if the identity was present.
    pub fn remove(&self, identity: &RecordKey) -> Option<Rc<Record>> {
        let mut state = self.state.borrow_mut();
        let index = state
            .heads
            .iter()
            .position(|head| head.identity() == identity)?;
        let head = state.heads.remove(index);
        debug!(%identity, "log remove");
        broadcast(
            &mut state.subscribers,
            &Ok(StreamItem::Mutation(Mutation::remove(Rc::clone(&head)))),
        );
        Some(head)
    }

    /// Terminate every open subscription with `error`. Returns how many
    /// subscriptions were terminated.
    pub fn fail_subscribers(&self, error: &StreamError) -> usize {
        let subscribers = std::mem::take(&mut self.state.borrow_mut().subscribers);
        let mut failed = 0;
        for tx in subscribers {
            if tx.unbounded_send(Err(error.clone())).is_ok() {
                failed += 1;
            }
        }
        info!(failed, transient = error.is_transient(), "subscribers failed");
        failed
    }

    /// Make the next [`Publish::publish`] call fail with `message`.
    pub fn fail_next_publish(&self, message: impl Into<String>) {
        self.state.borrow_mut().fail_next_publish = Some(message.into());
    }

    /// Latest revision of every identity, in order of first appearance.
    #[must_use]
    pub fn heads(&self) -> Vec<Rc<Record>> {
        self.state.borrow().heads.clone()
    }

    /// Every appended record, in append order.
    #[must_use]
    pub fn records(&self) -> Vec<Rc<Record>> {
        self.state.borrow().records.clone()
    }

    #[must_use]
    pub fn get(&self, key: &RecordKey) -> Option<Rc<Record>> {
        self.state.borrow().by_key.get(key).cloned()
    }

    /// Current head of `identity`.
    #[must_use]
    pub fn head(&self, identity: &RecordKey) -> Option<Rc<Record>> {
        self.state
            .borrow()
            .heads
            .iter()
            .find(|head| head.identity() == identity)
            .cloned()
    }

    /// Open live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        let mut state = self.state.borrow_mut();
        state.subscribers.retain(|tx| !tx.is_closed());
        state.subscribers.len()
    }
}

fn broadcast(subscribers: &mut Vec<Sender>, item: &Result<StreamItem, StreamError>) {
    subscribers.retain(|tx| tx.unbounded_send(item.clone()).is_ok());
}

impl EventSource for MemoryLog {
    fn subscribe(&self, options: StreamOptions) -> EventStream {
        let (tx, rx) = mpsc::unbounded();
        let mut state = self.state.borrow_mut();

        if options.sync {
            for head in &state.heads {
                let _ = tx.unbounded_send(Ok(StreamItem::Mutation(Mutation::add(Rc::clone(head)))));
            }
            let _ = tx.unbounded_send(Ok(StreamItem::Synced));
        }
        if options.live {
            state.subscribers.push(tx);
        }
        debug!(sync = options.sync, live = options.live, heads = state.heads.len(), "log subscribe");

        rx.boxed_local()
    }
}

impl Publish for MemoryLog {
    fn publish(&self, content: Content) -> LocalBoxFuture<'static, Result<RecordKey, PublishError>> {
        let log = self.clone();
        async move {
            if let Some(message) = log.state.borrow_mut().fail_next_publish.take() {
                return Err(PublishError::Rejected(message));
            }
            Ok(log.append(content).key.clone())
        }
        .boxed_local()
    }
}

impl Lookup for MemoryLog {
    fn get(&self, key: &RecordKey) -> LocalBoxFuture<'static, Result<Option<Rc<Record>>, LookupError>> {
        futures::future::ready(Ok(Self::get(self, key))).boxed_local()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::NAME_FIELD;
    use crate::revision::make_revision;
    use std::time::Duration;

    fn drain_now(stream: &mut EventStream) -> Vec<Result<StreamItem, StreamError>> {
        let mut items = Vec::new();
        while let Some(Some(item)) = stream.next().now_or_never() {
            items.push(item);
        }
        items
    }

    fn kinds(items: &[Result<StreamItem, StreamError>]) -> Vec<String> {
        items
            .iter()
            .map(|item| match item {
                Ok(StreamItem::Mutation(m)) => format!("{:?}:{}", m.kind, m.record.name().unwrap_or("")),
                Ok(StreamItem::Synced) => "synced".to_string(),
                Err(err) => format!("err:{err}"),
            })
            .collect()
    }

    #[test]
    fn keys_are_content_addressed_and_unique_per_append() {
        let content = Content::new().with_name("a");
        assert_eq!(content_key(1, &content), content_key(1, &content.clone()));
        assert_ne!(content_key(1, &content), content_key(2, &content));
        assert!(content_key(1, &content).as_str().starts_with("blake3:"));

        let log = MemoryLog::new();
        let a = log.append(content.clone());
        let b = log.append(content);
        assert_ne!(a.key, b.key);
    }

    #[test]
    fn revisions_replace_heads_in_place() {
        let log = MemoryLog::new();
        let a = log.append(Content::new().with_name("a"));
        log.append(Content::new().with_name("b"));
        let a2 = log.append(make_revision(&a).with(NAME_FIELD, "a2"));

        let names: Vec<_> = log.heads().iter().map(|h| h.name().map(str::to_string)).collect();
        assert_eq!(names, vec![Some("a2".to_string()), Some("b".to_string())]);
        assert_eq!(log.head(a.identity()).map(|h| h.key.clone()), Some(a2.key.clone()));
        assert_eq!(log.records().len(), 3);
    }

    #[test]
    fn sync_subscription_gets_snapshot_then_live_changes() {
        let log = MemoryLog::new();
        let a = log.append(Content::new().with_name("a"));
        let mut stream = log.subscribe(StreamOptions::default());

        log.append(make_revision(&a).with(NAME_FIELD, "a2"));
        log.remove(a.identity());

        assert_eq!(
            kinds(&drain_now(&mut stream)),
            vec!["Add:a", "synced", "Update:a2", "Remove:a2"]
        );
        assert_eq!(log.subscriber_count(), 1);
        drop(stream);
        assert_eq!(log.subscriber_count(), 0);
    }

    #[test]
    fn non_live_subscription_ends_after_snapshot() {
        let log = MemoryLog::new();
        log.append(Content::new().with_name("a"));
        let mut stream = log.subscribe(StreamOptions { sync: true, live: false });

        assert_eq!(kinds(&drain_now(&mut stream)), vec!["Add:a", "synced"]);
        assert_eq!(stream.next().now_or_never(), Some(None));
        assert_eq!(log.subscriber_count(), 0);
    }

    #[test]
    fn failed_subscribers_receive_error_and_close() {
        let log = MemoryLog::new();
        let mut stream = log.subscribe(StreamOptions { sync: false, live: true });
        let error = StreamError::transient("restart", Duration::from_millis(10));

        assert_eq!(log.fail_subscribers(&error), 1);
        let items = drain_now(&mut stream);
        assert_eq!(items, vec![Err(error)]);
        assert_eq!(stream.next().now_or_never(), Some(None));
        assert_eq!(log.subscriber_count(), 0);
    }

    #[test]
    fn fail_next_publish_rejects_once() {
        let log = MemoryLog::new();
        log.fail_next_publish("read only");

        let first = log.publish(Content::new().with_name("x")).now_or_never();
        assert_eq!(first, Some(Err(PublishError::Rejected("read only".to_string()))));
        assert!(log.records().is_empty());

        let second = log.publish(Content::new().with_name("x")).now_or_never();
        assert!(matches!(second, Some(Ok(_))));
        assert_eq!(log.records().len(), 1);
    }

    #[test]
    fn lookup_finds_any_revision_by_key() {
        let log = MemoryLog::new();
        let a = log.append(Content::new().with_name("a"));
        log.append(make_revision(&a).with(NAME_FIELD, "a2"));

        let found = Lookup::get(&log, &a.key).now_or_never();
        assert_eq!(found, Some(Ok(Some(Rc::clone(&a)))));
        let missing = Lookup::get(&log, &RecordKey::from("nope")).now_or_never();
        assert_eq!(missing, Some(Ok(None)));
    }
}
