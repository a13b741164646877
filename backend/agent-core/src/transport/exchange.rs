//! Message exchange between the TCP server and the two queues.
//!
//! [`Exchange`] owns a [`TcpServer`] and wires its callbacks:
//!
//! - **Inbound** (network thread): bytes are appended to a receive buffer,
//!   every complete frame is cut out with [`frame_codec::extract_frame`],
//!   decoded into a [`Command`] and pushed onto the [`InboundQueue`]. A frame
//!   that fails to decode is logged and dropped; the stream continues.
//! - **Outbound** (sender thread): every poll interval, while a peer is
//!   connected, the whole [`OutboundQueue`] is swapped out under its lock and
//!   each [`Event`] is encoded, framed and sent. A failed send drops that event
//!   and moves on to the next one.
//!
//! # Send failures
//!
//! - A send that wrote nothing leaves the session usable. After
//!   `max_consecutive_send_failures` of these in a row the peer is disconnected.
//! - A send that wrote part of a frame has already closed the session (see
//!   [`TcpServer::try_send`]).
//!
//! Either way the rest of the drained batch goes back to the front of the
//! outbound queue, and the sender loop waits for the next session.
//!
//! # Sessions
//!
//! The receive buffer is cleared when a peer connects and when it disconnects,
//! so a partial frame from one session never leaks into the next.
//!
//! # Shutdown order
//!
//! [`Exchange::stop`] signals and joins the sender thread, detaches the server
//! callbacks, and only then stops the server.

use crate::config::TransportConfig;
use crate::error::transport::TransportError;
use crate::proto::{Command, Event};
use crate::queue::{InboundQueue, OutboundQueue};
use crate::transport::tcp_server::{PeerId, PeerInfo, SendStatus, ServerOptions, TcpServer};
use crate::transport::{frame_codec, join_with_timeout};

use common::ErrorLocation;

use std::collections::VecDeque;
use std::net::{Ipv4Addr, SocketAddr};
use std::panic::Location;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, info, warn};
use prost::Message as ProstMessage;

/// Name of the outgoing message thread.
const SENDER_THREAD_NAME: &str = "hostlink-sender";

/// Tunables for an [`Exchange`].
#[derive(Debug, Clone)]
pub struct ExchangeOptions {
    pub bind_address: Ipv4Addr,
    /// Sender loop sleep between queue drains.
    pub outgoing_poll_interval: Duration,
    /// Bounded wait for each thread on stop.
    pub stop_timeout: Duration,
    /// Per-write timeout on the peer socket.
    pub write_timeout: Duration,
    /// Largest declared frame length accepted from a peer.
    pub max_frame_bytes: u32,
    /// Consecutive send failures after which the peer is disconnected.
    pub max_consecutive_send_failures: u32,
}

impl Default for ExchangeOptions {
    fn default() -> Self {
        ExchangeOptions::from(&TransportConfig::default())
    }
}

impl From<&TransportConfig> for ExchangeOptions {
    fn from(config: &TransportConfig) -> Self {
        Self {
            bind_address: config.bind_ipv4().unwrap_or(Ipv4Addr::UNSPECIFIED),
            outgoing_poll_interval: Duration::from_millis(config.outgoing_poll_interval_ms),
            stop_timeout: Duration::from_millis(config.stop_timeout_ms),
            write_timeout: Duration::from_millis(config.write_timeout_ms),
            max_frame_bytes: config.max_frame_bytes,
            max_consecutive_send_failures: config.max_consecutive_send_failures,
        }
    }
}

/// State touched by server callbacks (network thread) and the sender thread.
struct ExchangeShared {
    running: AtomicBool,
    receive_buffer: Mutex<Vec<u8>>,
    current_peer: Mutex<Option<PeerInfo>>,
    inbound: Arc<InboundQueue>,
    outbound: Arc<OutboundQueue>,
    max_frame_bytes: u32,
}

impl ExchangeShared {
    fn on_data_received(&self, data: &[u8], server: &Weak<TcpServer>) {
        if !self.running.load(Ordering::SeqCst) || data.is_empty() {
            return;
        }

        let mut oversized = None;
        let frames = {
            let mut buffer = lock(&self.receive_buffer);
            buffer.extend_from_slice(data);

            let mut frames = Vec::new();
            loop {
                if let Some(declared) = frame_codec::declared_len(&buffer)
                    .filter(|declared| *declared > self.max_frame_bytes)
                {
                    oversized = Some(declared);
                    buffer.clear();
                    break;
                }

                match frame_codec::extract_frame(&mut buffer) {
                    Some(frame) => frames.push(frame),
                    None => break,
                }
            }
            frames
        };

        for frame in frames {
            self.on_message_received(&frame);
        }

        if let Some(declared) = oversized {
            let error = TransportError::FrameTooLarge {
                declared: u64::from(declared),
                limit: u64::from(self.max_frame_bytes),
                location: ErrorLocation::from(Location::caller()),
            };
            error!("Exchange: {error}; dropping session");
            if let Some(server) = server.upgrade() {
                server.disconnect_peer();
            }
        }
    }

    fn on_message_received(&self, frame: &[u8]) {
        let command = match Command::decode(frame) {
            Ok(command) => command,
            Err(e) => {
                let error = TransportError::from(e);
                error!("Exchange: Failed to parse incoming command: {error}");
                return;
            }
        };

        debug!(
            "Exchange: Received command with ID '{}', operation_id '{}'",
            command.id, command.operation_id
        );
        self.inbound.push(command);
    }

    fn on_client_connected(&self, peer: PeerInfo) {
        info!("Exchange: Client {} connected from {}", peer.id, peer.addr);
        *lock(&self.current_peer) = Some(peer);
        lock(&self.receive_buffer).clear();
    }

    fn on_client_disconnected(&self, peer: PeerInfo) {
        info!("Exchange: Client {} disconnected", peer.id);
        let mut current = lock(&self.current_peer);
        if current.is_some_and(|active| active.id == peer.id) {
            *current = None;
            lock(&self.receive_buffer).clear();
        }
    }

    fn current_peer(&self) -> Option<PeerInfo> {
        *lock(&self.current_peer)
    }

    fn reset_session(&self) {
        *lock(&self.current_peer) = None;
        lock(&self.receive_buffer).clear();
    }
}

/// Bidirectional command/event exchange over a single-client TCP server.
pub struct Exchange {
    options: ExchangeOptions,
    server: Arc<TcpServer>,
    shared: Arc<ExchangeShared>,
    sender_thread: Option<JoinHandle<()>>,
}

impl Exchange {
    pub fn new(
        options: ExchangeOptions,
        inbound: Arc<InboundQueue>,
        outbound: Arc<OutboundQueue>,
    ) -> Self {
        let server = TcpServer::new(ServerOptions {
            bind_address: options.bind_address,
            stop_timeout: options.stop_timeout,
            write_timeout: options.write_timeout,
        });

        Self {
            shared: Arc::new(ExchangeShared {
                running: AtomicBool::new(false),
                receive_buffer: Mutex::new(Vec::new()),
                current_peer: Mutex::new(None),
                inbound,
                outbound,
                max_frame_bytes: options.max_frame_bytes,
            }),
            server: Arc::new(server),
            options,
            sender_thread: None,
        }
    }

    /// Starts the TCP server on `port` and then the outgoing message thread.
    ///
    /// # Errors
    ///
    /// Returns the server's [`TransportError`] if it cannot start, or
    /// [`TransportError::Spawn`] if the sender thread cannot be created (the
    /// server is stopped again before returning).
    pub fn start(&mut self, port: u16) -> Result<SocketAddr, TransportError> {
        if self.shared.running.load(Ordering::SeqCst) {
            warn!("Exchange: Already running");
            return Err(TransportError::AlreadyRunning {
                message: String::from("Exchange is already running"),
                location: ErrorLocation::from(Location::caller()),
            });
        }

        self.shared.reset_session();
        self.wire_callbacks();

        // Set before the server starts so the first bytes are not discarded
        self.shared.running.store(true, Ordering::SeqCst);

        let local_addr = match self.server.start(port) {
            Ok(addr) => addr,
            Err(e) => {
                error!("Exchange: Failed to start TCP server on port {port}: {e}");
                self.shared.running.store(false, Ordering::SeqCst);
                self.server.clear_callbacks();
                return Err(e);
            }
        };

        let shared = Arc::clone(&self.shared);
        let server = Arc::clone(&self.server);
        let poll_interval = self.options.outgoing_poll_interval;
        let max_failures = self.options.max_consecutive_send_failures;

        let spawned = thread::Builder::new()
            .name(String::from(SENDER_THREAD_NAME))
            .spawn(move || run_sender_loop(&shared, &server, poll_interval, max_failures));

        match spawned {
            Ok(handle) => {
                debug!("Exchange: Started outgoing message thread");
                self.sender_thread = Some(handle);
            }
            Err(e) => {
                error!("Exchange: Failed to start outgoing message thread: {e}");
                self.shared.running.store(false, Ordering::SeqCst);
                self.server.clear_callbacks();
                self.server.stop();
                return Err(TransportError::Spawn {
                    message: format!("Failed to spawn outgoing message thread: {e}"),
                    location: ErrorLocation::from(Location::caller()),
                });
            }
        }

        info!("Exchange: Started on {local_addr}");
        Ok(local_addr)
    }

    /// Stops the sender thread and the server and resets session state.
    ///
    /// Idempotent. Events still queued stay in the outbound queue.
    pub fn stop(&mut self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }

        info!("Exchange: Stopping");

        if let Some(handle) = self.sender_thread.take() {
            debug!("Exchange: Waiting for outgoing message thread to finish");
            if !join_with_timeout(handle, self.options.stop_timeout, SENDER_THREAD_NAME) {
                warn!("Exchange: Outgoing message thread did not stop in time; detached");
            }
        }

        // Detach before stopping so no callback runs against a stopped exchange
        self.server.clear_callbacks();
        self.server.stop();

        self.shared.reset_session();
        info!("Exchange: Stopped");
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst) && self.server.is_running()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.local_addr()
    }

    pub fn current_peer(&self) -> Option<PeerInfo> {
        self.shared.current_peer()
    }

    fn wire_callbacks(&self) {
        let weak_server = Arc::downgrade(&self.server);

        let shared = Arc::clone(&self.shared);
        self.server
            .set_data_callback(move |data| shared.on_data_received(data, &weak_server));

        let shared = Arc::clone(&self.shared);
        self.server
            .set_connected_callback(move |peer| shared.on_client_connected(peer));

        let shared = Arc::clone(&self.shared);
        self.server
            .set_disconnected_callback(move |peer| shared.on_client_disconnected(peer));

        self.server
            .set_error_callback(|error| error!("Exchange: Network error: {error}"));
    }
}

impl Drop for Exchange {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Where the sender loop writes frames. Implemented by [`TcpServer`].
pub(crate) trait FrameSink {
    fn send_frame(&self, frame: &[u8]) -> SendStatus;

    fn disconnect_peer(&self);
}

impl FrameSink for TcpServer {
    fn send_frame(&self, frame: &[u8]) -> SendStatus {
        self.try_send(frame)
    }

    fn disconnect_peer(&self) {
        TcpServer::disconnect_peer(self);
    }
}

/// How one drain of the outbound queue ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BatchOutcome {
    /// Every event was attempted.
    Drained,
    /// The session ended mid-batch; unsent events were requeued.
    SessionClosed,
}

/// Sender thread body.
fn run_sender_loop(
    shared: &ExchangeShared,
    server: &TcpServer,
    poll_interval: Duration,
    max_failures: u32,
) {
    debug!("Exchange: Outgoing message thread started");

    let mut session = None;
    let mut closed_session: Option<PeerId> = None;
    let mut consecutive_failures = 0;

    while shared.running.load(Ordering::SeqCst) {
        if let Some(peer) = shared.current_peer() {
            if session != Some(peer.id) {
                session = Some(peer.id);
                consecutive_failures = 0;
            }

            // The network thread has not noticed the close yet
            if closed_session != Some(peer.id) {
                let outcome = send_pending_events(
                    &shared.outbound,
                    server,
                    &mut consecutive_failures,
                    max_failures,
                );
                if outcome == BatchOutcome::SessionClosed {
                    closed_session = Some(peer.id);
                }
            }
        }

        thread::sleep(poll_interval);
    }

    debug!("Exchange: Outgoing message thread finished");
}

/// Drains the outbound queue once and sends every event in order.
pub(crate) fn send_pending_events(
    outbound: &OutboundQueue,
    sink: &impl FrameSink,
    consecutive_failures: &mut u32,
    max_failures: u32,
) -> BatchOutcome {
    let mut pending = outbound.take_all();

    while let Some(event) = pending.pop_front() {
        let frame = match encode_event(&event) {
            Ok(frame) => frame,
            Err(e) => {
                error!("Exchange: Failed to encode event with ID '{}': {e}", event.id);
                continue;
            }
        };

        match sink.send_frame(&frame) {
            SendStatus::Sent => {
                debug!("Exchange: Sent event with ID '{}'", event.id);
                *consecutive_failures = 0;
            }
            SendStatus::NotConnected => {
                debug!("Exchange: Peer left before event '{}' was sent", event.id);
                pending.push_front(event);
                requeue(outbound, pending);
                return BatchOutcome::SessionClosed;
            }
            SendStatus::Failed => {
                error!("Exchange: Failed to send event with ID '{}'", event.id);
                *consecutive_failures += 1;

                if *consecutive_failures >= max_failures {
                    error!(
                        "Exchange: {} consecutive send failures; disconnecting peer",
                        consecutive_failures
                    );
                    *consecutive_failures = 0;
                    sink.disconnect_peer();
                    requeue(outbound, pending);
                    return BatchOutcome::SessionClosed;
                }
            }
            SendStatus::Abandoned => {
                error!(
                    "Exchange: Event with ID '{}' was cut off mid-frame; session closed",
                    event.id
                );
                *consecutive_failures = 0;
                requeue(outbound, pending);
                return BatchOutcome::SessionClosed;
            }
        }
    }

    BatchOutcome::Drained
}

fn requeue(outbound: &OutboundQueue, unsent: VecDeque<Event>) {
    if !unsent.is_empty() {
        warn!(
            "Exchange: Keeping {} unsent events for the next session",
            unsent.len()
        );
        outbound.requeue_front(unsent);
    }
}

fn encode_event(event: &Event) -> Result<Vec<u8>, TransportError> {
    frame_codec::encode_frame(&event.encode_to_vec())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
