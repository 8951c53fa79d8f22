//! Derived values cached against the versions of their source cells.

mod deps;
mod derived;

pub use deps::Dependencies;
pub use derived::DerivedHandle;
