//! The state store and its configuration.
//!
//! A [`StateStore`] owns named cells of independent types, calls subscribers
//! when a cell is written, and caches derived values against the versions of
//! the cells they were computed from.

mod options;
mod store;

pub use options::{StoreOptions, DEFAULT_MAX_CASCADE};
pub use store::StateStore;
