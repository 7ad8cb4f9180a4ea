//! Accordion engine: the full pipeline behind an expandable record list.
//!
//! ```text
//! EventSource -> MutationCollector -> Collection<Rc<Record>>
//!             -> Projection(resolver) -> per-identity ItemMachine -> ItemView
//! ```
//!
//! The projection memoizes on the record key: a key names immutable content,
//! so a replace carrying the same key never re-resolves. Item states are
//! reconciled after every derived diff. An identity gets a closed machine
//! when it first shows up in the resolved list and loses it when it leaves
//! (or becomes ignored), so phase does not survive a restart.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::{Rc, Weak};

use serde::Serialize;
use tracing::{debug, trace};

use crate::collection::{CollectionView, SubscriberId};
use crate::collector::{CollectorStatus, MutationCollector};
use crate::error::ErrorCode;
use crate::event::{EventSource, StreamOptions};
use crate::item::{ItemMachine, ItemPhase, TransitionError};
use crate::projection::{Projection, ProjectionOptions, Resolution, ResolvedItem};
use crate::publish::Publish;
use crate::record::{Content, Record, RecordKey};
use crate::resolve::{Resolve, ResolveError};

pub use crate::item::RenameFn;

/// Predicate hiding records from the list.
pub type IgnoreFn = Rc<dyn Fn(&Record) -> bool>;

type Resolved = ResolvedItem<Record, Rc<Record>, ResolveError>;
type Listener = Rc<dyn Fn(&[ItemView])>;

/// Engine settings.
#[derive(Clone, Default)]
pub struct AccordionConfig {
    pub stream: StreamOptions,
    /// Builds renamed content. `None` disables renaming.
    pub rename: Option<RenameFn>,
    /// Hides matching records. `None` shows everything.
    pub is_ignored: Option<IgnoreFn>,
}

impl fmt::Debug for AccordionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccordionConfig")
            .field("stream", &self.stream)
            .field("rename", &self.rename.is_some())
            .field("is_ignored", &self.is_ignored.is_some())
            .finish()
    }
}

/// Resolution state as shown to a renderer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "error", rename_all = "lowercase")]
pub enum ViewResolution {
    Pending,
    Ready,
    Failed(String),
}

/// Everything a renderer needs for one row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemView {
    pub identity: RecordKey,
    /// Key of the revision currently shown.
    pub key: RecordKey,
    /// Resolved name when available, else the raw record's.
    pub name: Option<String>,
    pub phase: ItemPhase,
    pub resolution: ViewResolution,
    pub can_rename: bool,
}

/// Errors from user intents.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ItemError {
    #[error("no visible item with identity {identity}")]
    UnknownItem { identity: RecordKey },

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("rename is not enabled")]
    RenameDisabled,
}

impl ItemError {
    /// Machine-readable code associated with this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::UnknownItem { .. } => ErrorCode::UnknownItem,
            Self::Transition(_) => ErrorCode::InvalidTransition,
            Self::RenameDisabled => ErrorCode::RenameDisabled,
        }
    }
}

/// Handle returned by [`Accordion::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Inner {
    config: AccordionConfig,
    publisher: Rc<dyn Publish>,
    records: CollectionView<Rc<Record>>,
    derived: CollectionView<Rc<Resolved>>,
    items: RefCell<HashMap<RecordKey, ItemMachine>>,
    listeners: RefCell<Vec<(ListenerId, Listener)>>,
    next_listener: Cell<u64>,
}

/// Live, renameable record list.
pub struct Accordion {
    inner: Rc<Inner>,
    derived_subscription: SubscriberId,
    projection: Projection<Record, Rc<Record>, ResolveError>,
    collector: MutationCollector,
}

impl fmt::Debug for Accordion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Accordion")
            .field("config", &self.inner.config)
            .field("items", &self.inner.items.borrow().len())
            .field("collector", &self.collector)
            .finish_non_exhaustive()
    }
}

impl Accordion {
    /// Wire the pipeline. Nothing streams until [`Accordion::start`].
    pub fn new(config: AccordionConfig, resolver: Rc<dyn Resolve>, publisher: Rc<dyn Publish>) -> Self {
        let collector = MutationCollector::new();
        let projection = Projection::new(
            &collector.collection(),
            move |record| resolver.resolve(record),
            ProjectionOptions::keyed_by(|record: &Record| record.key.clone()),
        );

        let inner = Rc::new(Inner {
            config,
            publisher,
            records: collector.collection(),
            derived: projection.view(),
            items: RefCell::new(HashMap::new()),
            listeners: RefCell::new(Vec::new()),
            next_listener: Cell::new(0),
        });

        let weak: Weak<Inner> = Rc::downgrade(&inner);
        let derived_subscription = inner.derived.subscribe(move |_diff| {
            if let Some(inner) = weak.upgrade() {
                inner.reconcile();
                inner.notify();
            }
        });

        Self {
            inner,
            derived_subscription,
            projection,
            collector,
        }
    }

    /// Subscribe to `source` with the configured stream options.
    ///
    /// Restarts from scratch if already running. Must be called inside a
    /// `tokio::task::LocalSet`.
    pub fn start<S>(&self, source: S)
    where
        S: EventSource + 'static,
    {
        self.collector.start(source, self.inner.config.stream);
    }

    /// Stop streaming. The list keeps its last state.
    pub fn abort(&self) {
        self.collector.abort();
    }

    /// Current rows, in collection order, ignored records excluded.
    #[must_use]
    pub fn views(&self) -> Vec<ItemView> {
        self.inner.views()
    }

    /// View of one identity, if visible.
    #[must_use]
    pub fn view(&self, identity: &RecordKey) -> Option<ItemView> {
        self.inner
            .views()
            .into_iter()
            .find(|view| &view.identity == identity)
    }

    /// Expand or collapse an item.
    ///
    /// # Errors
    ///
    /// Unknown identity, or the item is being renamed.
    pub fn toggle(&self, identity: &RecordKey) -> Result<ItemPhase, ItemError> {
        let phase = self.inner.with_item(identity, ItemMachine::toggle)??;
        debug!(%identity, %phase, "item toggled");
        self.inner.notify();
        Ok(phase)
    }

    /// Open the rename editor of an expanded item.
    ///
    /// # Errors
    ///
    /// Rename disabled, unknown identity, or the item is not open.
    pub fn begin_rename(&self, identity: &RecordKey) -> Result<(), ItemError> {
        if self.inner.config.rename.is_none() {
            return Err(ItemError::RenameDisabled);
        }
        self.inner.with_item(identity, ItemMachine::begin_rename)??;
        debug!(%identity, "rename started");
        self.inner.notify();
        Ok(())
    }

    /// Publish a renamed revision of the record behind `identity`.
    ///
    /// The revision is built from the raw (unresolved) record so inherited
    /// prototype fields are not copied into the new revision. Returns the
    /// content handed to the publisher; the new revision shows up once the
    /// stream delivers it.
    ///
    /// # Errors
    ///
    /// Rename disabled, unknown identity, or the item is not renaming.
    pub fn submit_rename(&self, identity: &RecordKey, new_name: &str) -> Result<Content, ItemError> {
        let Some(rename) = self.inner.config.rename.clone() else {
            return Err(ItemError::RenameDisabled);
        };
        let record = self
            .inner
            .visible_source(identity)
            .ok_or_else(|| ItemError::UnknownItem {
                identity: identity.clone(),
            })?;
        let publisher = Rc::clone(&self.inner.publisher);
        let content = self.inner.with_item(identity, |item| {
            item.submit_rename(&record, new_name, &rename, &publisher)
        })??;
        debug!(%identity, branch = %record.key, "rename submitted");
        self.inner.notify();
        Ok(content)
    }

    /// Call `listener` with fresh views after every view-affecting change.
    pub fn subscribe(&self, listener: impl Fn(&[ItemView]) + 'static) -> ListenerId {
        let id = ListenerId(self.inner.next_listener.get());
        self.inner.next_listener.set(id.0 + 1);
        self.inner.listeners.borrow_mut().push((id, Rc::new(listener)));
        id
    }

    /// Remove a listener. Returns whether it was registered.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.inner.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Re-resolve the item with this identity (for example after one of its
    /// prototypes changed).
    pub fn invalidate(&self, identity: &RecordKey) {
        self.projection
            .invalidate(|record| record.identity() == identity);
    }

    /// Re-resolve every item.
    pub fn invalidate_all(&self) {
        self.projection.invalidate_all();
    }

    #[must_use]
    pub fn collector_status(&self) -> CollectorStatus {
        self.collector.status()
    }

    #[must_use]
    pub fn is_synced(&self) -> bool {
        self.collector.is_synced()
    }

    /// Restarts performed after transient stream failures.
    #[must_use]
    pub fn restarts(&self) -> u64 {
        self.collector.restarts()
    }

    /// Raw collected records, ignored ones included.
    #[must_use]
    pub fn records(&self) -> Vec<Rc<Record>> {
        self.collector.collection().items()
    }

    /// Number of resolver invocations so far.
    #[must_use]
    pub fn resolve_calls(&self) -> u64 {
        self.projection.transform_calls()
    }
}

impl Drop for Accordion {
    fn drop(&mut self) {
        self.inner.derived.unsubscribe(self.derived_subscription);
        self.collector.abort();
    }
}

impl Inner {
    fn is_ignored(&self, item: &Resolved) -> bool {
        let Some(is_ignored) = &self.config.is_ignored else {
            return false;
        };
        match &item.resolution {
            Resolution::Ready(resolved) => is_ignored(resolved),
            Resolution::Pending | Resolution::Failed(_) => is_ignored(&item.source),
        }
    }

    fn visible(&self) -> Vec<Rc<Resolved>> {
        self.derived
            .items()
            .into_iter()
            .filter(|item| !self.is_ignored(item))
            .collect()
    }

    /// Current raw record behind a visible identity. The derived slot may
    /// still hold an older revision while resolutions complete out of order.
    fn visible_source(&self, identity: &RecordKey) -> Option<Rc<Record>> {
        let visible = self
            .visible()
            .iter()
            .any(|item| item.source.identity() == identity);
        if !visible {
            return None;
        }
        self.records.find(|record| record.identity() == identity)
    }

    /// Create states for new identities and drop states for departed ones.
    fn reconcile(&self) {
        let present: HashSet<RecordKey> = self
            .visible()
            .iter()
            .map(|item| item.source.identity().clone())
            .collect();

        let mut items = self.items.borrow_mut();
        items.retain(|identity, _| {
            let keep = present.contains(identity);
            if !keep {
                trace!(%identity, "item state discarded");
            }
            keep
        });
        for identity in present {
            items.entry(identity).or_insert_with(|| {
                trace!("item state created");
                ItemMachine::new()
            });
        }
    }

    fn with_item<R>(
        &self,
        identity: &RecordKey,
        action: impl FnOnce(&mut ItemMachine) -> R,
    ) -> Result<R, ItemError> {
        let mut items = self.items.borrow_mut();
        let item = items.get_mut(identity).ok_or_else(|| ItemError::UnknownItem {
            identity: identity.clone(),
        })?;
        Ok(action(item))
    }

    fn views(&self) -> Vec<ItemView> {
        let can_rename = self.config.rename.is_some();
        let items = self.items.borrow();
        self.visible()
            .iter()
            .map(|item| {
                let identity = item.source.identity().clone();
                let phase = items
                    .get(&identity)
                    .map_or(ItemPhase::Closed, ItemMachine::phase);
                let (name, resolution) = match &item.resolution {
                    Resolution::Pending => (item.source.name(), ViewResolution::Pending),
                    Resolution::Ready(resolved) => (resolved.name(), ViewResolution::Ready),
                    Resolution::Failed(err) => {
                        (item.source.name(), ViewResolution::Failed(err.to_string()))
                    }
                };
                ItemView {
                    identity,
                    key: item.source.key.clone(),
                    name: name.map(str::to_string),
                    phase,
                    resolution,
                    can_rename,
                }
            })
            .collect()
    }

    fn notify(&self) {
        let listeners: Vec<Listener> = self
            .listeners
            .borrow()
            .iter()
            .map(|(_, listener)| Rc::clone(listener))
            .collect();
        if listeners.is_empty() {
            return;
        }
        let views = self.views();
        for listener in listeners {
            listener(&views);
        }
    }
}
