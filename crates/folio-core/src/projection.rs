//! Memoizing projection of an observable collection.
//!
//! A [`Projection`] mirrors a source [`CollectionView`] into a derived
//! collection by running a (possibly asynchronous) transform per item.
//!
//! # Slots
//!
//! Every source item owns one slot in the derived collection, at the same
//! index. A slot holds an `Rc<ResolvedItem>`:
//!
//! - new items start as [`Resolution::Pending`] unless the transform is
//!   immediately ready;
//! - a completion replaces the slot in place with `Ready` or `Failed`;
//! - several computations may be in flight for one slot (the source item was
//!   replaced before the first finished). Every completion that finds the slot
//!   alive is written, so the last completion wins;
//! - removing the source item discards the slot and aborts its computations.
//!   A late completion for a discarded slot is a no-op.
//!
//! # Memoization
//!
//! When the source replaces an item with one that `identity_equals` the
//! current one, the slot is left untouched: no transform call, no diff, and
//! the derived `Rc` stays pointer-equal. The default comparer is
//! [`Rc::ptr_eq`]. Callers with a stable key (for example a content-addressed
//! record key) can supply a key comparer instead.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll};

use futures::FutureExt;
use futures::future::LocalBoxFuture;
use tokio::task::JoinHandle;
use tracing::trace;

use crate::collection::{Collection, CollectionDiff, CollectionView, SubscriberId};

/// Outcome of transforming one source item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution<T, E> {
    /// The transform has not completed yet.
    Pending,
    Ready(T),
    Failed(E),
}

impl<T, E> Resolution<T, E> {
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    #[must_use]
    pub const fn ready(&self) -> Option<&T> {
        match self {
            Self::Ready(value) => Some(value),
            _ => None,
        }
    }
}

/// Derived item: the source it was computed from plus the outcome.
#[derive(Debug, PartialEq, Eq)]
pub struct ResolvedItem<S, T, E> {
    pub source: Rc<S>,
    pub resolution: Resolution<T, E>,
}

/// Per-item transform.
pub type Transform<S, T, E> = Rc<dyn Fn(Rc<S>) -> LocalBoxFuture<'static, Result<T, E>>>;

/// Comparer deciding whether two source items are the same for memoization.
pub type IdentityEquals<S> = Rc<dyn Fn(&Rc<S>, &Rc<S>) -> bool>;

/// Projection settings.
pub struct ProjectionOptions<S> {
    pub identity_equals: IdentityEquals<S>,
}

impl<S: 'static> Default for ProjectionOptions<S> {
    fn default() -> Self {
        Self {
            identity_equals: Rc::new(|a: &Rc<S>, b: &Rc<S>| Rc::ptr_eq(a, b)),
        }
    }
}

impl<S: 'static> ProjectionOptions<S> {
    /// Memoize on a key extracted from each item instead of the pointer.
    pub fn keyed_by<K, F>(key: F) -> Self
    where
        K: PartialEq,
        F: Fn(&S) -> K + 'static,
    {
        Self {
            identity_equals: Rc::new(move |a: &Rc<S>, b: &Rc<S>| key(a) == key(b)),
        }
    }
}

type Derived<S, T, E> = Rc<ResolvedItem<S, T, E>>;

struct Slot<S> {
    id: u64,
    source: Rc<S>,
    inflight: Vec<(u64, JoinHandle<()>)>,
}

impl<S> Slot<S> {
    fn abort_all(&mut self) {
        for (_, handle) in self.inflight.drain(..) {
            handle.abort();
        }
    }
}

struct Shared<S, T, E> {
    derived: Collection<Derived<S, T, E>>,
    slots: RefCell<Vec<Slot<S>>>,
    transform: Transform<S, T, E>,
    identity_equals: IdentityEquals<S>,
    next_slot: Cell<u64>,
    next_ticket: Cell<u64>,
    calls: Cell<u64>,
}

/// Live, memoizing mirror of a source collection.
pub struct Projection<S, T, E> {
    shared: Rc<Shared<S, T, E>>,
    source: CollectionView<Rc<S>>,
    subscription: SubscriberId,
}

impl<S, T, E> fmt::Debug for Projection<S, T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Projection")
            .field("slots", &self.shared.slots.borrow().len())
            .field("transform_calls", &self.shared.calls.get())
            .finish_non_exhaustive()
    }
}

impl<S, T, E> Projection<S, T, E>
where
    S: 'static,
    T: 'static,
    E: 'static,
{
    /// Mirror `source` through `transform`.
    ///
    /// Items already present in `source` are projected immediately. Must be
    /// called inside a `tokio::task::LocalSet` when the transform is
    /// asynchronous.
    pub fn new<F>(source: &CollectionView<Rc<S>>, transform: F, options: ProjectionOptions<S>) -> Self
    where
        F: Fn(Rc<S>) -> LocalBoxFuture<'static, Result<T, E>> + 'static,
    {
        let shared = Rc::new(Shared {
            derived: Collection::new(),
            slots: RefCell::new(Vec::new()),
            transform: Rc::new(transform),
            identity_equals: options.identity_equals,
            next_slot: Cell::new(0),
            next_ticket: Cell::new(0),
            calls: Cell::new(0),
        });

        for item in source.items() {
            shared.push(item);
        }

        let weak: Weak<Shared<S, T, E>> = Rc::downgrade(&shared);
        let subscription = source.subscribe(move |diff| {
            if let Some(shared) = weak.upgrade() {
                shared.on_source_diff(diff);
            }
        });

        Self {
            shared,
            source: source.clone(),
            subscription,
        }
    }

    /// Read-only handle to the derived collection.
    #[must_use]
    pub fn view(&self) -> CollectionView<Derived<S, T, E>> {
        self.shared.derived.view()
    }

    /// Snapshot of the derived items.
    #[must_use]
    pub fn items(&self) -> Vec<Derived<S, T, E>> {
        self.shared.derived.view().items()
    }

    /// Number of transform invocations so far.
    #[must_use]
    pub fn transform_calls(&self) -> u64 {
        self.shared.calls.get()
    }

    /// Number of computations still in flight.
    #[must_use]
    pub fn inflight(&self) -> usize {
        self.shared
            .slots
            .borrow()
            .iter()
            .map(|slot| {
                slot.inflight
                    .iter()
                    .filter(|(_, handle)| !handle.is_finished())
                    .count()
            })
            .sum()
    }

    /// Recompute every slot whose source matches `predicate`.
    pub fn invalidate(&self, predicate: impl Fn(&S) -> bool) {
        let indices: Vec<usize> = self
            .shared
            .slots
            .borrow()
            .iter()
            .enumerate()
            .filter(|(_, slot)| predicate(&slot.source))
            .map(|(index, _)| index)
            .collect();
        for index in indices {
            self.shared.recompute(index);
        }
    }

    /// Recompute every slot.
    pub fn invalidate_all(&self) {
        self.invalidate(|_| true);
    }
}

impl<S, T, E> Drop for Projection<S, T, E> {
    fn drop(&mut self) {
        self.source.unsubscribe(self.subscription);
        for slot in self.shared.slots.borrow_mut().iter_mut() {
            slot.abort_all();
        }
    }
}

/// Outcome of polling a fresh transform future once.
enum Started<T, E> {
    Done(Result<T, E>),
    Running(LocalBoxFuture<'static, Result<T, E>>),
}

impl<S, T, E> Shared<S, T, E>
where
    S: 'static,
    T: 'static,
    E: 'static,
{
    fn on_source_diff(self: &Rc<Self>, diff: &CollectionDiff<Rc<S>>) {
        match diff {
            CollectionDiff::Push { value } => self.push(Rc::clone(value)),
            CollectionDiff::Replace { index, value } => self.replace(*index, Rc::clone(value)),
            CollectionDiff::RemoveAt { index } => {
                let removed = {
                    let mut slots = self.slots.borrow_mut();
                    (*index < slots.len()).then(|| slots.remove(*index))
                };
                if let Some(mut slot) = removed {
                    trace!(slot = slot.id, "slot discarded");
                    slot.abort_all();
                    self.derived.remove(*index);
                }
            }
            CollectionDiff::Clear => {
                let discarded: Vec<Slot<S>> = self.slots.borrow_mut().drain(..).collect();
                for mut slot in discarded {
                    slot.abort_all();
                }
                self.derived.clear();
            }
        }
    }

    fn push(self: &Rc<Self>, source: Rc<S>) {
        let id = self.next_slot.get();
        self.next_slot.set(id + 1);
        self.slots.borrow_mut().push(Slot {
            id,
            source: Rc::clone(&source),
            inflight: Vec::new(),
        });

        match self.start(&source) {
            Started::Done(result) => self.derived.push(Rc::new(resolved(source, result))),
            Started::Running(future) => {
                self.derived.push(Rc::new(ResolvedItem {
                    source: Rc::clone(&source),
                    resolution: Resolution::Pending,
                }));
                self.spawn(id, source, future);
            }
        }
    }

    fn replace(self: &Rc<Self>, index: usize, source: Rc<S>) {
        let id = {
            let mut slots = self.slots.borrow_mut();
            let Some(slot) = slots.get_mut(index) else {
                return;
            };
            if (self.identity_equals)(&slot.source, &source) {
                trace!(slot = slot.id, "source unchanged; memoized");
                return;
            }
            slot.source = Rc::clone(&source);
            slot.id
        };
        self.compute_into(index, id, source);
    }

    fn recompute(self: &Rc<Self>, index: usize) {
        let Some((id, source)) = self
            .slots
            .borrow()
            .get(index)
            .map(|slot| (slot.id, Rc::clone(&slot.source)))
        else {
            return;
        };
        self.compute_into(index, id, source);
    }

    fn compute_into(self: &Rc<Self>, index: usize, id: u64, source: Rc<S>) {
        match self.start(&source) {
            Started::Done(result) => {
                self.derived.replace(index, Rc::new(resolved(source, result)));
            }
            Started::Running(future) => {
                self.derived.replace(
                    index,
                    Rc::new(ResolvedItem {
                        source: Rc::clone(&source),
                        resolution: Resolution::Pending,
                    }),
                );
                self.spawn(id, source, future);
            }
        }
    }

    /// Call the transform and poll it once, so synchronous transforms never
    /// expose a pending placeholder.
    fn start(&self, source: &Rc<S>) -> Started<T, E> {
        self.calls.set(self.calls.get() + 1);
        let mut future = (self.transform)(Rc::clone(source));
        let mut cx = Context::from_waker(futures::task::noop_waker_ref());
        match future.poll_unpin(&mut cx) {
            Poll::Ready(result) => Started::Done(result),
            Poll::Pending => Started::Running(future),
        }
    }

    fn spawn(self: &Rc<Self>, id: u64, source: Rc<S>, future: LocalBoxFuture<'static, Result<T, E>>) {
        let ticket = self.next_ticket.get();
        self.next_ticket.set(ticket + 1);

        let weak = Rc::downgrade(self);
        let handle = tokio::task::spawn_local(async move {
            let result = future.await;
            if let Some(shared) = weak.upgrade() {
                shared.complete(id, ticket, source, result);
            }
        });

        let mut slots = self.slots.borrow_mut();
        match slots.iter_mut().find(|slot| slot.id == id) {
            Some(slot) => {
                slot.inflight.retain(|(_, handle)| !handle.is_finished());
                slot.inflight.push((ticket, handle));
            }
            None => handle.abort(),
        }
    }

    fn complete(&self, id: u64, ticket: u64, source: Rc<S>, result: Result<T, E>) {
        let index = {
            let mut slots = self.slots.borrow_mut();
            let Some(index) = slots.iter().position(|slot| slot.id == id) else {
                trace!(slot = id, "late completion for discarded slot ignored");
                return;
            };
            slots[index].inflight.retain(|(t, _)| *t != ticket);
            index
        };
        self.derived.replace(index, Rc::new(resolved(source, result)));
    }
}

fn resolved<S, T, E>(source: Rc<S>, result: Result<T, E>) -> ResolvedItem<S, T, E> {
    ResolvedItem {
        source,
        resolution: match result {
            Ok(value) => Resolution::Ready(value),
            Err(err) => Resolution::Failed(err),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::oneshot;
    use std::collections::HashMap;
    use tokio::task::LocalSet;

    async fn settle() {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
    }

    fn doubled(item: Rc<u32>) -> LocalBoxFuture<'static, Result<u32, String>> {
        futures::future::ready(Ok(*item * 2)).boxed_local()
    }

    fn values(projection: &Projection<u32, u32, String>) -> Vec<Option<u32>> {
        projection
            .items()
            .iter()
            .map(|item| item.resolution.ready().copied())
            .collect()
    }

    /// Transform whose completions are released by hand, per request.
    #[derive(Default)]
    struct Gate {
        waiting: RefCell<HashMap<u32, Vec<oneshot::Sender<Result<u32, String>>>>>,
    }

    impl Gate {
        fn transform(self: &Rc<Self>) -> impl Fn(Rc<u32>) -> LocalBoxFuture<'static, Result<u32, String>> + 'static {
            let gate = Rc::clone(self);
            move |item: Rc<u32>| {
                let (tx, rx) = oneshot::channel();
                gate.waiting.borrow_mut().entry(*item).or_default().push(tx);
                async move { rx.await.unwrap_or_else(|_| Err("cancelled".to_string())) }.boxed_local()
            }
        }

        fn release(&self, item: u32, result: Result<u32, String>) {
            let sender = self
                .waiting
                .borrow_mut()
                .get_mut(&item)
                .and_then(|queue| (!queue.is_empty()).then(|| queue.remove(0)));
            if let Some(sender) = sender {
                let _ = sender.send(result);
            }
        }
    }

    #[test]
    fn synchronous_transform_mirrors_without_pending() {
        let source = Collection::new();
        source.push(Rc::new(1));
        let projection = Projection::new(&source.view(), doubled, ProjectionOptions::default());

        source.push(Rc::new(2));
        source.push(Rc::new(3));
        source.remove(0);

        assert_eq!(values(&projection), vec![Some(4), Some(6)]);
        assert_eq!(projection.transform_calls(), 3);

        source.clear();
        assert!(projection.items().is_empty());
    }

    #[test]
    fn unchanged_reference_is_memoized() {
        let source = Collection::new();
        let a = Rc::new(1);
        let b = Rc::new(2);
        source.push(Rc::clone(&a));
        source.push(Rc::clone(&b));
        let projection = Projection::new(&source.view(), doubled, ProjectionOptions::default());
        let before = projection.items();

        let diffs = Rc::new(Cell::new(0));
        let counter = Rc::clone(&diffs);
        projection.view().subscribe(move |_| counter.set(counter.get() + 1));

        source.replace(0, Rc::clone(&a));
        let after = projection.items();

        assert!(Rc::ptr_eq(&before[0], &after[0]));
        assert!(Rc::ptr_eq(&before[1], &after[1]));
        assert_eq!(projection.transform_calls(), 2);
        assert_eq!(diffs.get(), 0);

        source.replace(0, Rc::new(1));
        assert!(!Rc::ptr_eq(&before[0], &projection.items()[0]));
        assert_eq!(projection.transform_calls(), 3);
        assert_eq!(diffs.get(), 1);
    }

    #[test]
    fn keyed_comparer_memoizes_equal_values() {
        let source = Collection::new();
        source.push(Rc::new(5));
        let projection = Projection::new(
            &source.view(),
            doubled,
            ProjectionOptions::keyed_by(|value: &u32| *value),
        );
        let before = projection.items();

        source.replace(0, Rc::new(5));
        assert!(Rc::ptr_eq(&before[0], &projection.items()[0]));
        assert_eq!(projection.transform_calls(), 1);

        source.replace(0, Rc::new(6));
        assert_eq!(values(&projection), vec![Some(12)]);
        assert_eq!(projection.transform_calls(), 2);
    }

    #[tokio::test]
    async fn async_slot_is_pending_until_completion() {
        LocalSet::new()
            .run_until(async {
                let gate = Rc::new(Gate::default());
                let source = Collection::new();
                let projection = Projection::new(
                    &source.view(),
                    gate.transform(),
                    ProjectionOptions::default(),
                );

                source.push(Rc::new(1));
                source.push(Rc::new(2));
                assert!(projection.items().iter().all(|item| item.resolution.is_pending()));
                assert_eq!(projection.inflight(), 2);

                gate.release(2, Ok(20));
                settle().await;
                assert_eq!(values(&projection), vec![None, Some(20)]);

                gate.release(1, Err("boom".to_string()));
                settle().await;
                let items = projection.items();
                assert_eq!(items[0].resolution, Resolution::Failed("boom".to_string()));
                assert_eq!(items[1].resolution, Resolution::Ready(20));
                assert_eq!(projection.inflight(), 0);
            })
            .await;
    }

    #[tokio::test]
    async fn last_completion_wins_for_a_slot() {
        LocalSet::new()
            .run_until(async {
                let gate = Rc::new(Gate::default());
                let source = Collection::new();
                let projection = Projection::new(
                    &source.view(),
                    gate.transform(),
                    ProjectionOptions::default(),
                );

                source.push(Rc::new(1));
                source.replace(0, Rc::new(2));
                assert_eq!(projection.inflight(), 2);

                gate.release(2, Ok(200));
                settle().await;
                assert_eq!(values(&projection), vec![Some(200)]);

                // The older request completes later and overwrites.
                gate.release(1, Ok(100));
                settle().await;
                assert_eq!(values(&projection), vec![Some(100)]);
                assert_eq!(*projection.items()[0].source, 1);
            })
            .await;
    }

    #[tokio::test]
    async fn removed_slot_ignores_late_completion() {
        LocalSet::new()
            .run_until(async {
                let gate = Rc::new(Gate::default());
                let source = Collection::new();
                let projection = Projection::new(
                    &source.view(),
                    gate.transform(),
                    ProjectionOptions::default(),
                );

                source.push(Rc::new(1));
                source.push(Rc::new(2));
                source.remove(0);
                assert_eq!(projection.items().len(), 1);

                gate.release(1, Ok(10));
                gate.release(2, Ok(20));
                settle().await;

                assert_eq!(values(&projection), vec![Some(20)]);
                assert_eq!(*projection.items()[0].source, 2);
            })
            .await;
    }

    #[tokio::test]
    async fn cleared_source_ignores_late_completion() {
        LocalSet::new()
            .run_until(async {
                let gate = Rc::new(Gate::default());
                let source = Collection::new();
                let projection = Projection::new(
                    &source.view(),
                    gate.transform(),
                    ProjectionOptions::default(),
                );

                source.push(Rc::new(1));
                source.clear();
                source.push(Rc::new(1));
                assert_eq!(projection.inflight(), 1);

                // First request belongs to the slot discarded by the clear.
                gate.release(1, Ok(10));
                settle().await;
                assert_eq!(projection.items().len(), 1);
                assert!(projection.items()[0].resolution.is_pending());

                gate.release(1, Ok(11));
                settle().await;
                assert_eq!(values(&projection), vec![Some(11)]);
            })
            .await;
    }

    #[tokio::test]
    async fn invalidate_recomputes_matching_slots() {
        LocalSet::new()
            .run_until(async {
                let source = Collection::new();
                source.push(Rc::new(1));
                source.push(Rc::new(2));
                let projection = Projection::new(&source.view(), doubled, ProjectionOptions::default());
                let before = projection.items();

                projection.invalidate(|value| *value == 2);
                let after = projection.items();
                assert!(Rc::ptr_eq(&before[0], &after[0]));
                assert!(!Rc::ptr_eq(&before[1], &after[1]));
                assert_eq!(projection.transform_calls(), 3);

                projection.invalidate_all();
                assert_eq!(projection.transform_calls(), 5);
                assert_eq!(values(&projection), vec![Some(2), Some(4)]);
            })
            .await;
    }

    #[test]
    fn dropping_projection_unsubscribes() {
        let source: Collection<Rc<u32>> = Collection::new();
        let view = source.view();
        let projection = Projection::new(&view, doubled, ProjectionOptions::default());
        assert_eq!(view.subscriber_count(), 1);
        drop(projection);
        assert_eq!(view.subscriber_count(), 0);
        source.push(Rc::new(1));
    }
}
