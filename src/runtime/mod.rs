//! Shared inner state behind every store handle.
//!
//! Holds cell slots, derived entries and the write queue, and knows nothing
//! about the concrete value types. Typed access lives in [`crate::store`].

mod context;

pub(crate) use context::{
    cloned, Compute, Listener, PendingWrite, QueuedWrite, Shared, StoreContext, Updater, Value,
};
