//! Types shared by every crate in the workspace.
//!
//! Currently this is only [`ErrorLocation`], which each error enum carries so
//! that a logged error points at the line that produced it.

pub mod error;

pub use error::error_location::ErrorLocation;
