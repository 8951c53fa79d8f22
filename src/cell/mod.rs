//! Cell handles and subscription tokens.

mod cell;

pub use cell::{CellHandle, Subscription};
