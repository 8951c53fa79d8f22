//! # Cellstore
//!
//! Named state cells with subscriptions and a version-tagged derived-value cache.
//!
//! A [`StateStore`] is the shared state behind a rendering host: the host reads
//! cells while rendering, subscribes to learn when to render again, and writes
//! cells in response to user input.
//!
//! ## Cells
//!
//! - [`StateStore::create_cell`] / [`StateStore::get_or_create`] - register a named value
//! - [`StateStore::read`] / [`StateStore::write`] / [`StateStore::update`] - access it
//! - [`StateStore::subscribe`] - get `(old, new)` after every write
//!
//! Every write bumps the cell's version. Writes made from inside a subscriber
//! are queued and applied after the running notification pass.
//!
//! ## Derived values
//!
//! - [`StateStore::derive`] / [`StateStore::try_derive`] - register a computation over cells
//! - [`StateStore::read_derived`] - cached result, recomputed only when a source version moved
//!
//! ```
//! use cellstore::StateStore;
//!
//! let store = StateStore::new();
//! let count = store.create_cell("count", 0).unwrap();
//! let doubled = store.derive(count, |c| c * 2).unwrap();
//!
//! store.write(count, 3).unwrap();
//! assert_eq!(store.read_derived(doubled).unwrap(), 6);
//! ```

pub mod cell;
pub mod derived;
pub mod error;
mod runtime;
pub mod store;

// Re-export main types for convenience
pub use cell::{CellHandle, Subscription};
pub use derived::{Dependencies, DerivedHandle};
pub use error::{BoxError, Result, StoreError};
pub use store::{StateStore, StoreOptions};
