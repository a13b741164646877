//! Network transport: framing, the single-client TCP server, and the exchange
//! that turns bytes into [`Command`](crate::proto::Command)s and
//! [`Event`](crate::proto::Event)s into bytes.
//!
//! # Data flow
//!
//! ```text
//! bytes -> frame_codec -> Command -> InboundQueue
//! OutboundQueue -> Event -> frame_codec -> bytes
//! ```

pub mod exchange;
pub mod frame_codec;
pub mod tcp_server;

pub use exchange::{Exchange, ExchangeOptions};
pub use tcp_server::{PeerId, PeerInfo, SendStatus, ServerOptions, ServerState, TcpServer};

use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::error;

const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Joins `handle` if it finishes within `timeout`.
///
/// Returns `false` if the deadline passed; the thread is then left detached.
pub(crate) fn join_with_timeout(handle: JoinHandle<()>, timeout: Duration, name: &str) -> bool {
    let deadline = Instant::now() + timeout;

    while !handle.is_finished() {
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(JOIN_POLL_INTERVAL);
    }

    if handle.join().is_err() {
        error!("Thread '{name}' panicked");
    }
    true
}
