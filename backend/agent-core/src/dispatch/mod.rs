//! Command dispatch and event construction.
//!
//! The [`Dispatcher`] runs on the external consumer context (the host's own
//! update loop), never on a network thread. It receives one [`Command`] at a
//! time, calls the matching [`CommandExecutor`] operation and may push one
//! [`Event`] built by the [`event_factory`] onto the outbound queue.
//!
//! [`Command`]: crate::proto::Command
//! [`Event`]: crate::proto::Event

pub mod dispatcher;
pub mod event_factory;
pub mod executor;

pub use dispatcher::{DispatchOptions, Dispatcher};
pub use executor::{CommandExecutor, DEFAULT_CHUNK_NAME};
