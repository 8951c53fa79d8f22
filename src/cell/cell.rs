use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::Weak;

use crate::runtime::Shared;

/// Typed handle to a cell owned by a [`StateStore`](crate::StateStore).
///
/// Handles are `Copy` and carry the id of the store that issued them, so a
/// handle passed to a different store is rejected with
/// [`StoreError::UnknownCell`](crate::StoreError::UnknownCell).
pub struct CellHandle<T> {
    pub(crate) store: u64,
    pub(crate) index: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T> CellHandle<T> {
    pub(crate) fn new(store: u64, index: usize) -> Self {
        Self {
            store,
            index,
            _marker: PhantomData,
        }
    }
}

impl<T> Clone for CellHandle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for CellHandle<T> {}

impl<T> PartialEq for CellHandle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.store == other.store && self.index == other.index
    }
}

impl<T> Eq for CellHandle<T> {}

impl<T> Hash for CellHandle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.store.hash(state);
        self.index.hash(state);
    }
}

impl<T> fmt::Debug for CellHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CellHandle")
            .field("store", &self.store)
            .field("index", &self.index)
            .field("type", &std::any::type_name::<T>())
            .finish()
    }
}

/// Token returned by [`StateStore::subscribe`](crate::StateStore::subscribe).
///
/// Call [`unsubscribe`](Subscription::unsubscribe) to stop receiving
/// notifications. Dropping the token leaves the subscriber registered.
pub struct Subscription {
    shared: Weak<Shared>,
    cell: usize,
    id: u64,
}

impl Subscription {
    pub(crate) fn new(shared: Weak<Shared>, cell: usize, id: u64) -> Self {
        Self { shared, cell, id }
    }

    /// Remove the subscriber.
    ///
    /// Returns `true` if this call removed it. Calling it again, or after the
    /// store is gone, is a no-op that returns `false`.
    ///
    /// Called from inside a subscriber, a notification pass already in
    /// progress still calls the removed subscriber; no later pass does.
    /// Called from another thread while a drain is running, it waits for the
    /// drain to end, so no callback runs after it returns.
    pub fn unsubscribe(&self) -> bool {
        let Some(shared) = self.shared.upgrade() else {
            return false;
        };
        let mut ctx = shared.lock_idle();
        ctx.remove_subscriber(self.cell, self.id)
    }

    /// Whether the subscriber is still registered.
    pub fn is_active(&self) -> bool {
        let Some(shared) = self.shared.upgrade() else {
            return false;
        };
        let ctx = shared.lock();
        ctx.has_subscriber(self.cell, self.id)
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("cell", &self.cell)
            .field("id", &self.id)
            .finish()
    }
}
