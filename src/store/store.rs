use std::any::type_name;
use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;
use std::thread;

use tracing::{trace, warn};

use crate::cell::{CellHandle, Subscription};
use crate::derived::{Dependencies, DerivedHandle};
use crate::error::{BoxError, Result, StoreError};
use crate::runtime::{
    cloned, Compute, Listener, PendingWrite, QueuedWrite, Shared, StoreContext, Updater, Value,
};
use crate::store::StoreOptions;

/// A store of named, independently typed cells with subscriptions and
/// cached derived values.
///
/// `StateStore` is a cheap handle: clones share the same cells, so a
/// subscriber can capture a clone and call back into the store. The internal
/// lock is never held while subscribers, update functions or derive functions
/// run.
///
/// # Writes and notification
///
/// A write replaces the value, bumps the cell's version and calls every
/// subscriber of the cell with `(old, new)` in registration order, before
/// returning. Writes issued while a notification pass is running (typically
/// from inside a subscriber) are queued and applied after the pass, in call
/// order, by the call that started it. A write or unsubscribe from another
/// thread waits for the running drain to finish instead, then applies itself,
/// so it is never acknowledged before it lands.
///
/// # Examples
///
/// ```
/// use cellstore::StateStore;
/// use std::sync::{Arc, Mutex};
///
/// let store = StateStore::new();
/// let count = store.create_cell("count", 0).unwrap();
///
/// let seen = Arc::new(Mutex::new(Vec::new()));
/// let log = seen.clone();
/// store
///     .subscribe(count, move |old: &i32, new: &i32| log.lock().unwrap().push((*old, *new)))
///     .unwrap();
///
/// store.write(count, 2).unwrap();
/// assert_eq!(*seen.lock().unwrap(), vec![(0, 2)]);
///
/// let doubled = store.derive(count, |c| c * 2).unwrap();
/// assert_eq!(store.read_derived(doubled).unwrap(), 4);
/// ```
#[derive(Clone)]
pub struct StateStore {
    shared: Arc<Shared>,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore {
    /// Create an empty store with default options.
    pub fn new() -> Self {
        Self::with_options(StoreOptions::default())
    }

    /// Create an empty store with the given options.
    pub fn with_options(options: StoreOptions) -> Self {
        Self {
            shared: Arc::new(Shared::new(options)),
        }
    }

    /// Options the store was created with.
    pub fn options(&self) -> StoreOptions {
        self.shared.lock().options().clone()
    }

    /// Number of cells in the store.
    pub fn len(&self) -> usize {
        self.shared.lock().len()
    }

    /// Whether the store has no cells.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Register a new cell.
    ///
    /// Fails with [`StoreError::DuplicateCell`] if a cell with this name
    /// already exists, whatever its type.
    pub fn create_cell<T>(&self, name: impl Into<String>, initial: T) -> Result<CellHandle<T>>
    where
        T: Send + Sync + 'static,
    {
        let mut ctx = self.shared.lock();
        let index = ctx.insert_cell(name.into(), Arc::new(initial))?;
        Ok(CellHandle::new(ctx.id(), index))
    }

    /// Handle of the named cell, creating it with `default` on first access.
    ///
    /// Fails with [`StoreError::TypeMismatch`] if the cell exists and holds
    /// another type. `default` is dropped when the cell already exists.
    pub fn get_or_create<T>(&self, name: impl Into<String>, default: T) -> Result<CellHandle<T>>
    where
        T: Send + Sync + 'static,
    {
        let name = name.into();
        let mut ctx = self.shared.lock();
        let index = match ctx.cell_index(&name) {
            Some(index) => typed_index::<T>(&ctx, name, index)?,
            None => ctx.insert_cell(name, Arc::new(default))?,
        };
        Ok(CellHandle::new(ctx.id(), index))
    }

    /// Handle of an existing cell by name.
    pub fn lookup<T>(&self, name: &str) -> Result<CellHandle<T>>
    where
        T: Send + Sync + 'static,
    {
        let ctx = self.shared.lock();
        let index = ctx
            .cell_index(name)
            .ok_or_else(|| StoreError::CellNotFound {
                name: name.to_string(),
            })?;
        let index = typed_index::<T>(&ctx, name.to_string(), index)?;
        Ok(CellHandle::new(ctx.id(), index))
    }

    /// Current value of a cell.
    pub fn read<T>(&self, cell: CellHandle<T>) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.with(cell, T::clone)
    }

    /// Call `f` with a reference to the current value, without cloning it.
    ///
    /// `f` runs outside the store lock and may call back into the store.
    pub fn with<T, R>(&self, cell: CellHandle<T>, f: impl FnOnce(&T) -> R) -> Result<R>
    where
        T: Send + Sync + 'static,
    {
        let (name, value) = {
            let ctx = self.shared.lock();
            let slot = ctx.cell(cell.store, cell.index)?;
            (slot.name.clone(), Arc::clone(&slot.value))
        };
        match value.downcast_ref::<T>() {
            Some(value) => Ok(f(value)),
            None => Err(StoreError::TypeMismatch {
                name,
                expected: type_name::<T>(),
            }),
        }
    }

    /// Number of writes applied to a cell since it was created.
    pub fn version<T>(&self, cell: CellHandle<T>) -> Result<u64> {
        Ok(self.shared.lock().cell(cell.store, cell.index)?.version)
    }

    /// Name the cell was registered under.
    pub fn name<T>(&self, cell: CellHandle<T>) -> Result<String> {
        Ok(self.shared.lock().cell(cell.store, cell.index)?.name.clone())
    }

    /// Replace the value of a cell and notify its subscribers.
    ///
    /// Called from inside a subscriber, the write is queued and applied once
    /// the running notification pass completes; the call then returns `Ok`
    /// immediately. Called from another thread while a drain is running, it
    /// blocks until that drain ends and then applies the write itself.
    pub fn write<T>(&self, cell: CellHandle<T>, value: T) -> Result<()>
    where
        T: Send + Sync + 'static,
    {
        self.submit(cell.store, cell.index, PendingWrite::Replace(Arc::new(value)))
    }

    /// Replace the value of a cell with `f(current)`.
    ///
    /// `f` sees the value current when the write is applied, which for a
    /// queued write includes every write queued before it.
    pub fn update<T, F>(&self, cell: CellHandle<T>, f: F) -> Result<()>
    where
        T: Send + Sync + 'static,
        F: FnOnce(&T) -> T + Send + 'static,
    {
        let updater: Updater = Box::new(move |current: &Value| {
            let current = current
                .downcast_ref::<T>()
                .expect("cell value type is fixed by its handle");
            Arc::new(f(current)) as Value
        });
        self.submit(cell.store, cell.index, PendingWrite::Update(updater))
    }

    /// Register `callback` to be called with `(old, new)` after every write
    /// to `cell`.
    pub fn subscribe<T, F>(&self, cell: CellHandle<T>, callback: F) -> Result<Subscription>
    where
        T: Send + Sync + 'static,
        F: Fn(&T, &T) + Send + Sync + 'static,
    {
        let listener: Listener = Arc::new(move |old: &Value, new: &Value| {
            if let (Some(old), Some(new)) = (old.downcast_ref::<T>(), new.downcast_ref::<T>()) {
                callback(old, new);
            }
        });
        let id = self
            .shared
            .lock()
            .add_subscriber(cell.store, cell.index, listener)?;
        Ok(Subscription::new(
            Arc::downgrade(&self.shared),
            cell.index,
            id,
        ))
    }

    /// Number of subscribers currently registered on `cell`.
    pub fn subscriber_count<T>(&self, cell: CellHandle<T>) -> Result<usize> {
        self.shared.lock().subscriber_count(cell.store, cell.index)
    }

    /// Register a derived value computed from `deps`.
    ///
    /// `compute` receives clones of the source values and must be pure: the
    /// result is cached until one of the sources is written.
    ///
    /// ```
    /// use cellstore::StateStore;
    ///
    /// let store = StateStore::new();
    /// let a = store.create_cell("a", 2).unwrap();
    /// let b = store.create_cell("b", 3).unwrap();
    /// let sum = store.derive((a, b), |(a, b)| a + b).unwrap();
    /// assert_eq!(store.read_derived(sum).unwrap(), 5);
    /// ```
    pub fn derive<D, U, F>(&self, deps: D, compute: F) -> Result<DerivedHandle<U>>
    where
        D: Dependencies + 'static,
        U: Send + Sync + 'static,
        F: Fn(D::Values) -> U + Send + Sync + 'static,
    {
        self.try_derive(deps, move |values| Ok::<_, Infallible>(compute(values)))
    }

    /// Register a derived value whose computation can fail.
    ///
    /// An error from `compute` is returned by [`read_derived`](Self::read_derived)
    /// as [`StoreError::Compute`] and leaves the previous cached value in place.
    pub fn try_derive<D, U, E, F>(&self, deps: D, compute: F) -> Result<DerivedHandle<U>>
    where
        D: Dependencies + 'static,
        U: Send + Sync + 'static,
        E: Into<BoxError>,
        F: Fn(D::Values) -> std::result::Result<U, E> + Send + Sync + 'static,
    {
        let compute: Compute = Arc::new(move |values: &[Value]| {
            let values = D::extract(values).ok_or_else(|| StoreError::TypeMismatch {
                name: "derived sources".to_string(),
                expected: type_name::<D::Values>(),
            })?;
            match compute(values) {
                Ok(output) => Ok(Arc::new(output) as Value),
                Err(e) => Err(StoreError::Compute(e.into())),
            }
        });

        let mut ctx = self.shared.lock();
        let mut sources = Vec::new();
        for (store, index) in deps.cells() {
            ctx.cell(store, index)?;
            sources.push(index);
        }
        let index = ctx.insert_derived(sources, compute);
        Ok(DerivedHandle::new(ctx.id(), index))
    }

    /// Current derived value, recomputing it first if a source was written
    /// since the cached value was computed.
    pub fn read_derived<U>(&self, derived: DerivedHandle<U>) -> Result<U>
    where
        U: Clone + Send + Sync + 'static,
    {
        let job = {
            let ctx = self.shared.lock();
            if let Some(cached) = ctx.fresh_value(derived.store, derived.index)? {
                trace!(store = ctx.label(), derived = derived.index, "derived cache hit");
                return cloned(&cached).ok_or_else(|| derived_mismatch::<U>(derived.index));
            }
            ctx.recompute(derived.store, derived.index)?
        };

        trace!(derived = derived.index, "recomputing derived value");
        let value = (job.compute)(&job.values)?;
        let output = cloned(&value).ok_or_else(|| derived_mismatch::<U>(derived.index))?;
        self.shared
            .lock()
            .store_derived(derived.index, value, job.versions);
        Ok(output)
    }

    /// Whether the next [`read_derived`](Self::read_derived) would be served
    /// from the cache.
    pub fn is_fresh<U>(&self, derived: DerivedHandle<U>) -> Result<bool> {
        Ok(self
            .shared
            .lock()
            .fresh_value(derived.store, derived.index)?
            .is_some())
    }

    fn submit(&self, store: u64, index: usize, write: PendingWrite) -> Result<()> {
        {
            // Only the driving thread gets past here while a drain runs
            let mut ctx = self.shared.lock_idle();
            ctx.cell(store, index)?;
            if !ctx.enqueue(thread::current().id(), index, write) {
                return Ok(());
            }
        }
        self.drain()
    }

    /// Apply queued writes until the queue is empty, notifying after each one.
    fn drain(&self) -> Result<()> {
        let mut guard = DrainGuard {
            shared: &self.shared,
            finished: false,
        };
        let (limit, label) = {
            let ctx = self.shared.lock();
            (ctx.options().max_cascade.max(1), ctx.options().label.clone())
        };
        let mut applied = 0usize;

        loop {
            let next = self.shared.lock().next_write();
            let Some(QueuedWrite { cell, write }) = next else {
                guard.finished = true;
                self.shared.notify_idle();
                return Ok(());
            };

            if applied >= limit {
                let dropped = self.shared.lock().abort_drain() + 1;
                guard.finished = true;
                self.shared.notify_idle();
                warn!(
                    store = label.as_deref().unwrap_or(""),
                    limit,
                    dropped,
                    "write cascade limit reached, dropping queued writes"
                );
                return Err(StoreError::CascadeLimit { limit });
            }

            let value = match write {
                PendingWrite::Replace(value) => value,
                PendingWrite::Update(f) => {
                    let current = self.shared.lock().current_value(cell);
                    f(&current)
                }
            };

            let (old, listeners) = self.shared.lock().apply(cell, Arc::clone(&value));
            applied += 1;
            for listener in &listeners {
                listener(&old, &value);
            }
        }
    }
}

impl fmt::Debug for StateStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ctx = self.shared.lock();
        f.debug_struct("StateStore")
            .field("id", &ctx.id())
            .field("label", &ctx.options().label)
            .field("cells", &ctx.len())
            .finish()
    }
}

/// Ends the drain if the driver unwinds out of a subscriber, so the store
/// keeps accepting writes.
struct DrainGuard<'a> {
    shared: &'a Shared,
    finished: bool,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            let dropped = self.shared.lock().abort_drain();
            self.shared.notify_idle();
            warn!(dropped, "write drain aborted, queued writes dropped");
        }
    }
}

fn derived_mismatch<U>(index: usize) -> StoreError {
    StoreError::TypeMismatch {
        name: format!("derived #{index}"),
        expected: type_name::<U>(),
    }
}

/// Check that the cell at `index` holds a `T`.
fn typed_index<T: 'static>(ctx: &StoreContext, name: String, index: usize) -> Result<usize> {
    let slot = ctx.cell(ctx.id(), index)?;
    if slot.value.is::<T>() {
        Ok(index)
    } else {
        Err(StoreError::TypeMismatch {
            name,
            expected: type_name::<T>(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Debug, PartialEq)]
    struct Profile {
        name: String,
        visits: u32,
    }

    #[test]
    fn create_read_write() {
        let store = StateStore::new();
        let count = store.create_cell("count", 0).unwrap();

        assert_eq!(store.read(count).unwrap(), 0);
        assert_eq!(store.version(count).unwrap(), 0);

        store.write(count, 1).unwrap();
        assert_eq!(store.read(count).unwrap(), 1);
        assert_eq!(store.version(count).unwrap(), 1);
        assert_eq!(store.name(count).unwrap(), "count");
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let store = StateStore::new();
        store.create_cell("x", 0).unwrap();

        let err = store.create_cell("x", 0).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateCell { ref name } if name == "x"));

        // Different type, same name
        assert!(store.create_cell("x", "text".to_string()).is_err());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn update_sees_current_value() {
        let store = StateStore::new();
        let profile = store
            .create_cell(
                "profile",
                Profile {
                    name: "ada".to_string(),
                    visits: 0,
                },
            )
            .unwrap();

        store
            .update(profile, |p| Profile {
                visits: p.visits + 1,
                ..p.clone()
            })
            .unwrap();

        assert_eq!(store.with(profile, |p| p.visits).unwrap(), 1);
    }

    #[test]
    fn get_or_create_returns_existing_cell() {
        let store = StateStore::new();
        let text = store.get_or_create("text", String::new()).unwrap();
        store.write(text, "hello".to_string()).unwrap();

        let again = store.get_or_create("text", String::new()).unwrap();
        assert_eq!(again, text);
        assert_eq!(store.read(again).unwrap(), "hello");

        let err = store.get_or_create("text", 0_i32).unwrap_err();
        assert!(matches!(err, StoreError::TypeMismatch { .. }));
    }

    #[test]
    fn lookup_by_name() {
        let store = StateStore::new();
        let count = store.create_cell("count", 5_u32).unwrap();

        assert_eq!(store.lookup::<u32>("count").unwrap(), count);
        assert!(matches!(
            store.lookup::<u32>("missing"),
            Err(StoreError::CellNotFound { .. })
        ));
        assert!(matches!(
            store.lookup::<i64>("count"),
            Err(StoreError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn handles_from_another_store_are_unknown() {
        let a = StateStore::new();
        let b = StateStore::new();
        let cell = a.create_cell("x", 1).unwrap();
        b.create_cell("x", 1).unwrap();

        assert!(matches!(b.read(cell), Err(StoreError::UnknownCell)));
        assert!(matches!(b.write(cell, 2), Err(StoreError::UnknownCell)));
        assert!(matches!(
            b.subscribe(cell, |_: &i32, _: &i32| {}),
            Err(StoreError::UnknownCell)
        ));
        assert!(matches!(b.derive(cell, |x| x), Err(StoreError::UnknownCell)));

        let derived = a.derive(cell, |x| x + 1).unwrap();
        assert!(matches!(b.read_derived(derived), Err(StoreError::UnknownDerived)));
    }

    #[test]
    fn subscribers_receive_old_and_new() {
        let store = StateStore::new();
        let count = store.create_cell("count", 1).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let log = seen.clone();
        store
            .subscribe(count, move |old: &i32, new: &i32| log.lock().push((*old, *new)))
            .unwrap();

        store.write(count, 2).unwrap();
        store.update(count, |c| c * 10).unwrap();

        assert_eq!(*seen.lock(), vec![(1, 2), (2, 20)]);
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let store = StateStore::new();
        let count = store.create_cell("count", 0).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        let sub = store
            .subscribe(count, move |_: &i32, _: &i32| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        assert!(sub.is_active());
        assert_eq!(store.subscriber_count(count).unwrap(), 1);

        assert!(sub.unsubscribe());
        assert!(!sub.unsubscribe());
        assert!(!sub.is_active());

        store.write(count, 1).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.subscriber_count(count).unwrap(), 0);
    }

    #[test]
    fn derived_is_cached_until_a_source_changes() {
        let store = StateStore::new();
        let count = store.create_cell("count", 2).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        let doubled = store
            .derive(count, move |c| {
                counter.fetch_add(1, Ordering::SeqCst);
                c * 2
            })
            .unwrap();

        assert!(!store.is_fresh(doubled).unwrap());
        assert_eq!(store.read_derived(doubled).unwrap(), 4);
        assert_eq!(store.read_derived(doubled).unwrap(), 4);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(store.is_fresh(doubled).unwrap());

        store.write(count, 5).unwrap();
        assert!(!store.is_fresh(doubled).unwrap());
        assert_eq!(store.read_derived(doubled).unwrap(), 10);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unrelated_writes_keep_cache_fresh() {
        let store = StateStore::new();
        let a = store.create_cell("a", 1).unwrap();
        let b = store.create_cell("b", 1).unwrap();
        let derived = store.derive(a, |a| a + 1).unwrap();

        store.read_derived(derived).unwrap();
        store.write(b, 100).unwrap();
        assert!(store.is_fresh(derived).unwrap());
    }

    #[test]
    fn failed_compute_keeps_last_value() {
        let store = StateStore::new();
        let divisor = store.create_cell("divisor", 2).unwrap();
        let half = store
            .try_derive(divisor, |d: i32| {
                if d == 0 {
                    Err("division by zero")
                } else {
                    Ok(100 / d)
                }
            })
            .unwrap();

        assert_eq!(store.read_derived(half).unwrap(), 50);

        store.write(divisor, 0).unwrap();
        let err = store.read_derived(half).unwrap_err();
        assert!(matches!(err, StoreError::Compute(_)));
        assert!(!store.is_fresh(half).unwrap());

        // Store still usable, and recovers on the next good value
        store.write(divisor, 4).unwrap();
        assert_eq!(store.read_derived(half).unwrap(), 25);
    }

    #[test]
    fn mistyped_derived_handle_reports_type_mismatch() {
        let store = StateStore::new();
        let count = store.create_cell("count", 3).unwrap();
        let doubled = store.derive(count, |c| c * 2).unwrap();
        let wrong: DerivedHandle<String> = DerivedHandle::new(doubled.store, doubled.index);

        // Both the recompute path and the cached path
        let err = store.read_derived(wrong).unwrap_err();
        assert!(matches!(err, StoreError::TypeMismatch { ref name, .. } if name == "derived #0"));
        assert_eq!(store.read_derived(doubled).unwrap(), 6);
        let err = store.read_derived(wrong).unwrap_err();
        assert!(matches!(err, StoreError::TypeMismatch { .. }));
    }

    #[test]
    fn debug_shows_label() {
        let store = StateStore::with_options(StoreOptions::default().with_label("ui"));
        store.create_cell("x", 0).unwrap();
        let rendered = format!("{store:?}");
        assert!(rendered.contains("\"ui\""));
        assert!(rendered.contains("cells: 1"));
    }
}
