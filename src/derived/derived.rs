use std::fmt;
use std::marker::PhantomData;

/// Typed handle to a derived value registered with
/// [`StateStore::derive`](crate::StateStore::derive).
pub struct DerivedHandle<T> {
    pub(crate) store: u64,
    pub(crate) index: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T> DerivedHandle<T> {
    pub(crate) fn new(store: u64, index: usize) -> Self {
        Self {
            store,
            index,
            _marker: PhantomData,
        }
    }
}

impl<T> Clone for DerivedHandle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for DerivedHandle<T> {}

impl<T> PartialEq for DerivedHandle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.store == other.store && self.index == other.index
    }
}

impl<T> Eq for DerivedHandle<T> {}

impl<T> fmt::Debug for DerivedHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedHandle")
            .field("store", &self.store)
            .field("index", &self.index)
            .field("type", &std::any::type_name::<T>())
            .finish()
    }
}
