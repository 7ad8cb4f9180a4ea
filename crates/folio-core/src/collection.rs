//! Observable ordered collections.
//!
//! A [`Collection`] is an ordered `Vec` that announces every mutation as a
//! [`CollectionDiff`] to its subscribers, in registration order, after the
//! mutation has been applied. Diffs are index-based so a consumer can mirror
//! the collection one operation at a time.
//!
//! Ownership is split in two handles:
//!
//! - [`Collection`] is held by the single component allowed to mutate;
//! - [`CollectionView`] is a read-only handle that can be cloned and handed to
//!   consumers, who may read and subscribe but never mutate.
//!
//! Everything is single-threaded (`Rc`/`RefCell`). No borrow is held while
//! subscribers run, so a subscriber may read the collection it observes.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// One mutation of a collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionDiff<T> {
    /// `value` was appended.
    Push { value: T },
    /// The item at `index` was replaced by `value`.
    Replace { index: usize, value: T },
    /// The item at `index` was removed; later items shifted down by one.
    RemoveAt { index: usize },
    /// All items were removed.
    Clear,
}

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

type Subscriber<T> = Rc<dyn Fn(&CollectionDiff<T>)>;

struct Inner<T> {
    items: Vec<T>,
    subscribers: Vec<(SubscriberId, Subscriber<T>)>,
    next_subscriber: u64,
}

/// Mutable owner handle of an observable collection.
pub struct Collection<T> {
    inner: Rc<RefCell<Inner<T>>>,
}

/// Read-only handle of an observable collection.
pub struct CollectionView<T> {
    inner: Rc<RefCell<Inner<T>>>,
}

impl<T> Clone for CollectionView<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> Default for Collection<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Collection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Collection")
            .field("len", &inner.items.len())
            .field("subscribers", &inner.subscribers.len())
            .finish()
    }
}

impl<T> fmt::Debug for CollectionView<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionView")
            .field("len", &self.inner.borrow().items.len())
            .finish()
    }
}

impl<T> Collection<T> {
    /// Create an empty collection with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                items: Vec::new(),
                subscribers: Vec::new(),
                next_subscriber: 0,
            })),
        }
    }

    /// Read-only handle sharing this collection's storage.
    #[must_use]
    pub fn view(&self) -> CollectionView<T> {
        CollectionView {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Clone> Collection<T> {
    /// Append `value`.
    pub fn push(&self, value: T) {
        self.inner.borrow_mut().items.push(value.clone());
        self.notify(&CollectionDiff::Push { value });
    }

    /// Replace the item at `index`, returning the previous item.
    ///
    /// Returns `None` (and emits nothing) when `index` is out of bounds.
    pub fn replace(&self, index: usize, value: T) -> Option<T> {
        let previous = {
            let mut inner = self.inner.borrow_mut();
            let slot = inner.items.get_mut(index)?;
            std::mem::replace(slot, value.clone())
        };
        self.notify(&CollectionDiff::Replace { index, value });
        Some(previous)
    }

    /// Remove the item at `index`, returning it.
    ///
    /// Returns `None` (and emits nothing) when `index` is out of bounds.
    pub fn remove(&self, index: usize) -> Option<T> {
        let removed = {
            let mut inner = self.inner.borrow_mut();
            if index >= inner.items.len() {
                return None;
            }
            inner.items.remove(index)
        };
        self.notify(&CollectionDiff::RemoveAt { index });
        Some(removed)
    }

    /// Remove every item. Emits [`CollectionDiff::Clear`] even when already
    /// empty, so consumers can treat it as a reset marker.
    pub fn clear(&self) {
        self.inner.borrow_mut().items.clear();
        self.notify(&CollectionDiff::Clear);
    }

    /// Position of the first item matching `predicate`.
    pub fn position(&self, predicate: impl Fn(&T) -> bool) -> Option<usize> {
        self.inner.borrow().items.iter().position(predicate)
    }

    fn notify(&self, diff: &CollectionDiff<T>) {
        let subscribers: Vec<Subscriber<T>> = self
            .inner
            .borrow()
            .subscribers
            .iter()
            .map(|(_, subscriber)| Rc::clone(subscriber))
            .collect();
        for subscriber in subscribers {
            subscriber(diff);
        }
    }
}

impl<T: Clone> CollectionView<T> {
    /// Snapshot of the current items.
    #[must_use]
    pub fn items(&self) -> Vec<T> {
        self.inner.borrow().items.clone()
    }

    /// Item at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<T> {
        self.inner.borrow().items.get(index).cloned()
    }

    /// Number of items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.borrow().items.len()
    }

    /// Whether the collection is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.borrow().items.is_empty()
    }

    /// Position of the first item matching `predicate`.
    pub fn position(&self, predicate: impl Fn(&T) -> bool) -> Option<usize> {
        self.inner.borrow().items.iter().position(predicate)
    }

    /// First item matching `predicate`.
    pub fn find(&self, predicate: impl Fn(&T) -> bool) -> Option<T> {
        self.inner.borrow().items.iter().find(|item| predicate(item)).cloned()
    }
}

impl<T> CollectionView<T> {
    /// Register `subscriber`, called after every subsequent mutation.
    pub fn subscribe(&self, subscriber: impl Fn(&CollectionDiff<T>) + 'static) -> SubscriberId {
        let mut inner = self.inner.borrow_mut();
        let id = SubscriberId(inner.next_subscriber);
        inner.next_subscriber += 1;
        inner.subscribers.push((id, Rc::new(subscriber)));
        id
    }

    /// Remove a subscriber. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut inner = self.inner.borrow_mut();
        let before = inner.subscribers.len();
        inner.subscribers.retain(|(existing, _)| *existing != id);
        inner.subscribers.len() != before
    }

    /// Number of registered subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.borrow().subscribers.len()
    }
}
