//! Error types for store operations.

use thiserror::Error;

/// Boxed error returned by fallible derive functions.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors reported by [`StateStore`](crate::StateStore) operations.
///
/// None of these leave the store in a broken state; every operation that fails
/// can be retried or followed by any other operation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A cell with this name is already registered
    #[error("cell already exists: {name}")]
    DuplicateCell { name: String },

    /// The cell handle was not issued by this store
    #[error("unknown cell handle")]
    UnknownCell,

    /// The derived handle was not issued by this store
    #[error("unknown derived handle")]
    UnknownDerived,

    /// No cell is registered under this name
    #[error("cell not found: {name}")]
    CellNotFound { name: String },

    /// The cell exists but holds a different value type
    #[error("cell {name} does not hold a value of type {expected}")]
    TypeMismatch {
        name: String,
        expected: &'static str,
    },

    /// A derive function failed; the cached value was left untouched
    #[error("derived computation failed: {0}")]
    Compute(#[source] BoxError),

    /// Queued writes kept producing more writes past the configured limit
    #[error("write cascade exceeded {limit} applied writes; remaining queued writes dropped")]
    CascadeLimit { limit: usize },
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
