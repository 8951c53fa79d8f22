use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, trace};

use crate::error::{Result, StoreError};
use crate::store::StoreOptions;

/// Type-erased cell value. Handles carry the concrete type.
pub(crate) type Value = Arc<dyn Any + Send + Sync>;

/// Type-erased subscriber, called with `(old, new)`.
pub(crate) type Listener = Arc<dyn Fn(&Value, &Value) + Send + Sync>;

/// Type-erased derive function over the source values, in declaration order.
pub(crate) type Compute = Arc<dyn Fn(&[Value]) -> Result<Value> + Send + Sync>;

/// Functional write, resolved against the value current when it is applied.
pub(crate) type Updater = Box<dyn FnOnce(&Value) -> Value + Send>;

/// Allocate a process-unique store id.
pub(crate) fn next_store_id() -> u64 {
    static NEXT_ID: AtomicU64 = AtomicU64::new(1);
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Clone a concrete value out of its type-erased slot.
pub(crate) fn cloned<T: Clone + 'static>(value: &Value) -> Option<T> {
    value.downcast_ref::<T>().cloned()
}

pub(crate) struct CellSlot {
    pub(crate) name: String,
    pub(crate) value: Value,
    pub(crate) version: u64,
    // Registration order is notification order
    subscribers: Vec<(u64, Listener)>,
}

pub(crate) struct DerivedEntry {
    sources: Vec<usize>,
    // Versions of `sources` seen by the computation that produced `cached`
    observed: Vec<u64>,
    cached: Option<Value>,
    compute: Compute,
}

pub(crate) enum PendingWrite {
    Replace(Value),
    Update(Updater),
}

pub(crate) struct QueuedWrite {
    pub(crate) cell: usize,
    pub(crate) write: PendingWrite,
}

/// What a recompute needs, captured under the lock and run outside it.
pub(crate) struct Recompute {
    pub(crate) values: Vec<Value>,
    pub(crate) versions: Vec<u64>,
    pub(crate) compute: Compute,
}

/// The context behind its lock, plus the signal that a drain has ended.
pub(crate) struct Shared {
    context: Mutex<StoreContext>,
    idle: Condvar,
}

impl Shared {
    pub(crate) fn new(options: StoreOptions) -> Self {
        Self {
            context: Mutex::new(StoreContext::new(options)),
            idle: Condvar::new(),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, StoreContext> {
        self.context.lock()
    }

    /// Lock the context once no other thread is draining.
    ///
    /// The driving thread itself gets the lock straight away, so subscribers
    /// can still write and unsubscribe from inside a notification pass.
    pub(crate) fn lock_idle(&self) -> MutexGuard<'_, StoreContext> {
        let me = thread::current().id();
        let mut ctx = self.context.lock();
        while ctx.driver.is_some_and(|driver| driver != me) {
            self.idle.wait(&mut ctx);
        }
        ctx
    }

    /// Wake threads waiting in [`lock_idle`](Self::lock_idle).
    pub(crate) fn notify_idle(&self) {
        self.idle.notify_all();
    }
}

/// Shared inner state of a [`StateStore`](crate::StateStore).
///
/// Every method here is called with the store's mutex held and none of them
/// call user code. Subscribers, update functions and derive functions are
/// handed back to the caller to run after the lock is released.
pub(crate) struct StoreContext {
    id: u64,
    options: StoreOptions,
    cells: Vec<CellSlot>,
    names: HashMap<String, usize>,
    derived: Vec<DerivedEntry>,
    queue: VecDeque<QueuedWrite>,
    // Thread applying the queue, if a drain is running
    driver: Option<ThreadId>,
    next_subscriber: u64,
}

impl StoreContext {
    pub(crate) fn new(options: StoreOptions) -> Self {
        Self {
            id: next_store_id(),
            options,
            cells: Vec::new(),
            names: HashMap::new(),
            derived: Vec::new(),
            queue: VecDeque::new(),
            driver: None,
            next_subscriber: 0,
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn options(&self) -> &StoreOptions {
        &self.options
    }

    pub(crate) fn len(&self) -> usize {
        self.cells.len()
    }

    pub(crate) fn cell_index(&self, name: &str) -> Option<usize> {
        self.names.get(name).copied()
    }

    /// Register a new cell. Fails if the name is taken.
    pub(crate) fn insert_cell(&mut self, name: String, value: Value) -> Result<usize> {
        if self.names.contains_key(&name) {
            return Err(StoreError::DuplicateCell { name });
        }
        let index = self.cells.len();
        debug!(store = self.label(), cell = %name, index, "created cell");
        self.names.insert(name.clone(), index);
        self.cells.push(CellSlot {
            name,
            value,
            version: 0,
            subscribers: Vec::new(),
        });
        Ok(index)
    }

    /// Resolve a handle's `(store, index)` pair to a slot of this store.
    pub(crate) fn cell(&self, store: u64, index: usize) -> Result<&CellSlot> {
        if store != self.id {
            return Err(StoreError::UnknownCell);
        }
        self.cells.get(index).ok_or(StoreError::UnknownCell)
    }

    fn cell_mut(&mut self, store: u64, index: usize) -> Result<&mut CellSlot> {
        if store != self.id {
            return Err(StoreError::UnknownCell);
        }
        self.cells.get_mut(index).ok_or(StoreError::UnknownCell)
    }

    pub(crate) fn subscriber_count(&self, store: u64, index: usize) -> Result<usize> {
        Ok(self.cell(store, index)?.subscribers.len())
    }

    pub(crate) fn add_subscriber(
        &mut self,
        store: u64,
        index: usize,
        listener: Listener,
    ) -> Result<u64> {
        let id = self.next_subscriber;
        let slot = self.cell_mut(store, index)?;
        slot.subscribers.push((id, listener));
        self.next_subscriber += 1;
        Ok(id)
    }

    pub(crate) fn has_subscriber(&self, index: usize, id: u64) -> bool {
        self.cells
            .get(index)
            .is_some_and(|slot| slot.subscribers.iter().any(|(sub, _)| *sub == id))
    }

    /// Remove a subscriber. Returns `false` if it was already gone.
    pub(crate) fn remove_subscriber(&mut self, index: usize, id: u64) -> bool {
        let Some(slot) = self.cells.get_mut(index) else {
            return false;
        };
        let before = slot.subscribers.len();
        slot.subscribers.retain(|(sub, _)| *sub != id);
        slot.subscribers.len() != before
    }

    /// Queue a write for `index` on behalf of `thread`.
    ///
    /// Returns `true` when no drain is running, in which case `thread` has
    /// just become the drain driver and must apply the queue. Callers from
    /// other threads wait for the drain to end first, see [`Shared::lock_idle`].
    pub(crate) fn enqueue(&mut self, thread: ThreadId, index: usize, write: PendingWrite) -> bool {
        self.queue.push_back(QueuedWrite { cell: index, write });
        if self.driver.is_some() {
            trace!(store = self.label(), queued = self.queue.len(), "deferred write");
            return false;
        }
        self.driver = Some(thread);
        true
    }

    /// Pop the next queued write. Ends the drain when the queue is empty.
    pub(crate) fn next_write(&mut self) -> Option<QueuedWrite> {
        let next = self.queue.pop_front();
        if next.is_none() {
            self.driver = None;
        }
        next
    }

    /// Drop every queued write and end the drain. Returns how many were dropped.
    pub(crate) fn abort_drain(&mut self) -> usize {
        let dropped = self.queue.len();
        self.queue.clear();
        self.driver = None;
        dropped
    }

    /// Value of a cell already validated by [`cell`](Self::cell).
    pub(crate) fn current_value(&self, index: usize) -> Value {
        Arc::clone(&self.cells[index].value)
    }

    /// Replace a cell's value and bump its version.
    ///
    /// Returns the previous value and a snapshot of the subscribers to notify.
    pub(crate) fn apply(&mut self, index: usize, value: Value) -> (Value, Vec<Listener>) {
        let label = self.options.label.as_deref().unwrap_or("");
        let slot = &mut self.cells[index];
        let old = std::mem::replace(&mut slot.value, value);
        slot.version += 1;
        trace!(
            store = label,
            cell = %slot.name,
            version = slot.version,
            subscribers = slot.subscribers.len(),
            "applied write"
        );
        let listeners = slot
            .subscribers
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        (old, listeners)
    }

    pub(crate) fn insert_derived(&mut self, sources: Vec<usize>, compute: Compute) -> usize {
        let index = self.derived.len();
        debug!(store = self.label(), index, sources = ?sources, "registered derived value");
        self.derived.push(DerivedEntry {
            sources,
            observed: Vec::new(),
            cached: None,
            compute,
        });
        index
    }

    fn entry(&self, store: u64, index: usize) -> Result<&DerivedEntry> {
        if store != self.id {
            return Err(StoreError::UnknownDerived);
        }
        self.derived.get(index).ok_or(StoreError::UnknownDerived)
    }

    fn source_versions(&self, entry: &DerivedEntry) -> Vec<u64> {
        entry
            .sources
            .iter()
            .map(|&source| self.cells[source].version)
            .collect()
    }

    /// The cached value, if every source still has the version it was computed from.
    pub(crate) fn fresh_value(&self, store: u64, index: usize) -> Result<Option<Value>> {
        let entry = self.entry(store, index)?;
        let Some(cached) = &entry.cached else {
            return Ok(None);
        };
        if self.source_versions(entry) == entry.observed {
            Ok(Some(Arc::clone(cached)))
        } else {
            Ok(None)
        }
    }

    /// Capture current source values and versions for a recompute.
    pub(crate) fn recompute(&self, store: u64, index: usize) -> Result<Recompute> {
        let entry = self.entry(store, index)?;
        Ok(Recompute {
            values: entry
                .sources
                .iter()
                .map(|&source| Arc::clone(&self.cells[source].value))
                .collect(),
            versions: self.source_versions(entry),
            compute: Arc::clone(&entry.compute),
        })
    }

    /// Record a successful recompute.
    pub(crate) fn store_derived(&mut self, index: usize, value: Value, versions: Vec<u64>) {
        if let Some(entry) = self.derived.get_mut(index) {
            entry.cached = Some(value);
            entry.observed = versions;
        }
    }

    pub(crate) fn label(&self) -> &str {
        self.options.label.as_deref().unwrap_or("")
    }
}
