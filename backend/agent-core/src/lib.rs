//! Remote command/event channel between a controller and a host process.
//!
//! A controller connects over TCP and sends length-prefixed protobuf
//! [`Command`](proto::Command)s. The host drains them from the inbound queue on
//! its own update loop, runs them through a [`dispatch::Dispatcher`] and an
//! external [`dispatch::CommandExecutor`], and the resulting
//! [`Event`](proto::Event)s travel back over the same connection.
//!
//! # Modules
//!
//! - [`transport`] - framing, single-client TCP server, exchange threads
//! - [`queue`] - the two lock-guarded FIFOs
//! - [`dispatch`] - command routing, executor contract, event builders
//! - [`context`] - owns queues and exchange
//! - [`config`] - JSON configuration

pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod proto;
pub mod queue;
pub mod transport;


pub use context::AgentContext;
