//! Single-client TCP server.
//!
//! The server knows nothing about messages. It:
//!
//! - Binds one IPv4 address and port
//! - Serves exactly one peer at a time on a dedicated network thread
//! - Hands every received chunk of bytes to the data callback
//! - Offers a blocking [`TcpServer::send`] to the current peer
//!
//! A send that fails after part of the buffer went out closes the connection.
//! The peer would otherwise read the remainder of the stream from inside a
//! truncated frame.
//!
//! # Threading
//!
//! The network thread blocks in `accept()` and then in `read()` on the accepted
//! connection. A second connection attempt waits in the listen backlog until the
//! current peer disconnects.
//!
//! [`TcpServer::stop`] may run on any thread. It shuts down the peer socket in
//! both directions (unblocking `read()`) and opens a throw-away loopback
//! connection to the listener (unblocking `accept()`), then waits a bounded time
//! for the network thread to finish.
//!
//! # Callbacks
//!
//! Callbacks run on the network thread (the error callback may also run on the
//! thread calling [`TcpServer::send`]). They are invoked under a read lock, so
//! [`TcpServer::clear_callbacks`] returns only once no callback is running and
//! none can start afterwards.

use crate::error::transport::TransportError;
use crate::transport::join_with_timeout;

use common::ErrorLocation;

use std::io::{Error as IoError, ErrorKind, Read, Write};
use std::net::{Ipv4Addr, Shutdown, SocketAddr, SocketAddrV4, TcpListener, TcpStream};
use std::panic::Location;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, info, warn};

/// Size of the per-read receive buffer.
const RECEIVE_CHUNK_SIZE: usize = 4096;

/// How long `stop()` waits for the loopback wake-up connection.
const WAKE_CONNECT_TIMEOUT: Duration = Duration::from_millis(500);

/// Name of the accept/receive thread.
const NETWORK_THREAD_NAME: &str = "hostlink-network";

/// Identifier of one connection session, unique for the lifetime of a server.
pub type PeerId = u64;

/// The peer of a connection session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerInfo {
    pub id: PeerId,
    pub addr: SocketAddr,
}

pub type DataCallback = Box<dyn Fn(&[u8]) + Send + Sync>;
pub type ConnectedCallback = Box<dyn Fn(PeerInfo) + Send + Sync>;
pub type DisconnectedCallback = Box<dyn Fn(PeerInfo) + Send + Sync>;
pub type ErrorCallback = Box<dyn Fn(&TransportError) + Send + Sync>;

/// Result of one [`TcpServer::try_send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    /// Every byte was written.
    Sent,
    /// No peer is connected; nothing was written.
    NotConnected,
    /// The write failed before any byte went out. The session is intact.
    Failed,
    /// The write failed part-way. The session was closed.
    Abandoned,
}

/// Lifecycle of the server and its current session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Starting,
    /// Blocked in `accept()`, no peer.
    Listening,
    /// A connection was accepted and is being registered as the peer.
    Accepting,
    /// Serving a peer.
    Connected,
    /// The peer is gone, session teardown in progress.
    Disconnecting,
    Stopping,
}

/// Settings fixed at construction.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub bind_address: Ipv4Addr,
    /// Upper bound for joining the network thread in [`TcpServer::stop`].
    pub stop_timeout: Duration,
    /// Write timeout applied to each accepted peer so `send` cannot block forever.
    pub write_timeout: Duration,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            bind_address: Ipv4Addr::UNSPECIFIED,
            stop_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Default)]
struct ServerCallbacks {
    data: Option<DataCallback>,
    connected: Option<ConnectedCallback>,
    disconnected: Option<DisconnectedCallback>,
    error: Option<ErrorCallback>,
}

struct ActivePeer {
    info: PeerInfo,
    stream: Arc<TcpStream>,
}

/// State shared between the owning handle and the network thread.
struct ServerShared {
    running: AtomicBool,
    state: Mutex<ServerState>,
    callbacks: RwLock<ServerCallbacks>,
    peer: Mutex<Option<ActivePeer>>,
    next_peer_id: AtomicU64,
    write_timeout: Duration,
}

impl ServerShared {
    fn set_state(&self, state: ServerState) {
        *lock(&self.state) = state;
    }

    fn report_error(&self, error: TransportError) {
        let callbacks = self.callbacks.read().unwrap_or_else(PoisonError::into_inner);
        match callbacks.error.as_ref() {
            Some(callback) => callback(&error),
            None => error!("TCP server: {error}"),
        }
    }

    fn notify_data(&self, data: &[u8]) {
        let callbacks = self.callbacks.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(callback) = callbacks.data.as_ref() {
            callback(data);
        }
    }

    fn notify_connected(&self, peer: PeerInfo) {
        let callbacks = self.callbacks.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(callback) = callbacks.connected.as_ref() {
            callback(peer);
        }
    }

    fn notify_disconnected(&self, peer: PeerInfo) {
        let callbacks = self.callbacks.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(callback) = callbacks.disconnected.as_ref() {
            callback(peer);
        }
    }

    fn shutdown_peer(&self) -> Option<PeerInfo> {
        let peer = lock(&self.peer);
        let active = peer.as_ref()?;
        if let Err(e) = active.stream.shutdown(Shutdown::Both) {
            debug!("Peer {} shutdown: {e}", active.info.addr);
        }
        Some(active.info)
    }
}

/// Protocol-agnostic TCP server serving one peer at a time.
///
/// All methods take `&self`; the server is meant to be shared behind an `Arc`
/// between the owner and a sender thread.
pub struct TcpServer {
    shared: Arc<ServerShared>,
    options: ServerOptions,
    local_addr: Mutex<Option<SocketAddr>>,
    network_thread: Mutex<Option<JoinHandle<()>>>,
}

impl TcpServer {
    pub fn new(options: ServerOptions) -> Self {
        Self {
            shared: Arc::new(ServerShared {
                running: AtomicBool::new(false),
                state: Mutex::new(ServerState::Stopped),
                callbacks: RwLock::new(ServerCallbacks::default()),
                peer: Mutex::new(None),
                next_peer_id: AtomicU64::new(1),
                write_timeout: options.write_timeout,
            }),
            options,
            local_addr: Mutex::new(None),
            network_thread: Mutex::new(None),
        }
    }

    /// Binds `bind_address:port`, starts listening and spawns the network thread.
    ///
    /// Port `0` binds an ephemeral port; see [`TcpServer::local_addr`].
    ///
    /// # Errors
    ///
    /// - [`TransportError::AlreadyRunning`] - the server is already started
    /// - [`TransportError::Bind`] - the port is in use or not permitted
    /// - [`TransportError::Socket`] - any other OS-level socket failure
    /// - [`TransportError::Spawn`] - the network thread could not be created
    pub fn start(&self, port: u16) -> Result<SocketAddr, TransportError> {
        let mut network_thread = lock(&self.network_thread);
        if network_thread.is_some() {
            return Err(TransportError::AlreadyRunning {
                message: String::from("TCP server is already running"),
                location: ErrorLocation::from(Location::caller()),
            });
        }

        self.shared.set_state(ServerState::Starting);

        let address = SocketAddrV4::new(self.options.bind_address, port);
        let listener = match TcpListener::bind(address) {
            Ok(listener) => listener,
            Err(e) => {
                self.shared.set_state(ServerState::Stopped);
                return Err(TransportError::from_bind(&address.to_string(), e));
            }
        };

        let local_addr = match listener.local_addr() {
            Ok(addr) => addr,
            Err(e) => {
                self.shared.set_state(ServerState::Stopped);
                return Err(TransportError::from(e));
            }
        };

        self.shared.running.store(true, Ordering::SeqCst);

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name(String::from(NETWORK_THREAD_NAME))
            .spawn(move || run_accept_loop(listener, shared));

        match spawned {
            Ok(handle) => {
                *network_thread = Some(handle);
                *lock(&self.local_addr) = Some(local_addr);
                info!("TCP server started on {local_addr}");
                Ok(local_addr)
            }
            Err(e) => {
                self.shared.running.store(false, Ordering::SeqCst);
                self.shared.set_state(ServerState::Stopped);
                Err(TransportError::Spawn {
                    message: format!("Failed to spawn network thread: {e}"),
                    location: ErrorLocation::from(Location::caller()),
                })
            }
        }
    }

    /// Stops the server and waits (bounded) for the network thread.
    ///
    /// Safe to call from any thread and more than once; later calls do nothing.
    pub fn stop(&self) {
        let Some(handle) = lock(&self.network_thread).take() else {
            return;
        };

        let local_addr = lock(&self.local_addr).take();
        info!(
            "Stopping TCP server on {}",
            local_addr.map_or_else(|| String::from("<unknown>"), |addr| addr.to_string())
        );

        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.set_state(ServerState::Stopping);

        // Unblocks read() on the active connection
        self.shared.shutdown_peer();

        // Unblocks accept(); the network thread drops the listener on exit
        if let Some(addr) = local_addr {
            let wake_addr = loopback_for(addr);
            if let Err(e) = TcpStream::connect_timeout(&wake_addr, WAKE_CONNECT_TIMEOUT) {
                debug!("Wake-up connection to {wake_addr} failed: {e}");
            }
        }

        if !join_with_timeout(handle, self.options.stop_timeout, NETWORK_THREAD_NAME) {
            warn!("TCP server thread did not stop in time; detached");
        }

        lock(&self.shared.peer).take();
        self.shared.set_state(ServerState::Stopped);
        info!("TCP server stopped");
    }

    /// Writes all of `data` to the current peer, blocking until done.
    ///
    /// Returns `false` when there is no peer, `data` is empty, or the write fails.
    /// See [`TcpServer::try_send`].
    pub fn send(&self, data: &[u8]) -> bool {
        !data.is_empty() && self.try_send(data) == SendStatus::Sent
    }

    /// Writes all of `data` to the current peer and reports how far it got.
    ///
    /// Write failures are reported through the error callback. A failure after
    /// some bytes were written shuts the connection down and returns
    /// [`SendStatus::Abandoned`].
    pub fn try_send(&self, data: &[u8]) -> SendStatus {
        // Clone the handle so the peer lock is not held during the write
        let (info, stream) = {
            let peer = lock(&self.shared.peer);
            match peer.as_ref() {
                Some(active) => (active.info, Arc::clone(&active.stream)),
                None => return SendStatus::NotConnected,
            }
        };

        let (written, result) = write_fully(&stream, data);
        let Err(e) = result else {
            return SendStatus::Sent;
        };

        self.shared.report_error(TransportError::Send {
            message: format!(
                "send() to {} failed after {written} of {} bytes: {e}",
                info.addr,
                data.len()
            ),
            location: ErrorLocation::from(Location::caller()),
        });

        if written == 0 {
            return SendStatus::Failed;
        }

        warn!(
            "Closing connection to client {} after a partial write",
            info.id
        );
        if let Err(e) = stream.shutdown(Shutdown::Both) {
            debug!("Peer {} shutdown: {e}", info.addr);
        }
        SendStatus::Abandoned
    }

    /// Shuts down the current peer connection, if any.
    ///
    /// The network thread observes the closed socket, fires the disconnected
    /// callback and goes back to accepting.
    pub fn disconnect_peer(&self) -> Option<PeerInfo> {
        let peer = self.shared.shutdown_peer();
        if let Some(info) = peer {
            info!("Forcing disconnect of peer {} ({})", info.id, info.addr);
        }
        peer
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> ServerState {
        *lock(&self.shared.state)
    }

    /// Address actually bound by the last successful `start`, while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *lock(&self.local_addr)
    }

    pub fn current_peer(&self) -> Option<PeerInfo> {
        lock(&self.shared.peer).as_ref().map(|active| active.info)
    }

    pub fn set_data_callback(&self, callback: impl Fn(&[u8]) + Send + Sync + 'static) {
        self.callbacks_mut().data = Some(Box::new(callback));
    }

    pub fn set_connected_callback(&self, callback: impl Fn(PeerInfo) + Send + Sync + 'static) {
        self.callbacks_mut().connected = Some(Box::new(callback));
    }

    pub fn set_disconnected_callback(
        &self,
        callback: impl Fn(PeerInfo) + Send + Sync + 'static,
    ) {
        self.callbacks_mut().disconnected = Some(Box::new(callback));
    }

    pub fn set_error_callback(
        &self,
        callback: impl Fn(&TransportError) + Send + Sync + 'static,
    ) {
        self.callbacks_mut().error = Some(Box::new(callback));
    }

    /// Detaches every callback. Blocks until a callback in progress has returned.
    pub fn clear_callbacks(&self) {
        *self.callbacks_mut() = ServerCallbacks::default();
    }

    fn callbacks_mut(&self) -> std::sync::RwLockWriteGuard<'_, ServerCallbacks> {
        self.shared
            .callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for TcpServer {
    fn default() -> Self {
        Self::new(ServerOptions::default())
    }
}

impl Drop for TcpServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Network thread body: accept one peer, serve it until it leaves, repeat.
fn run_accept_loop(listener: TcpListener, shared: Arc<ServerShared>) {
    info!("TCP server thread started");

    while shared.running.load(Ordering::SeqCst) {
        shared.set_state(ServerState::Listening);

        let (stream, addr) = match listener.accept() {
            Ok(accepted) => accepted,
            Err(e) => {
                if !shared.running.load(Ordering::SeqCst) {
                    break;
                }
                if matches!(
                    e.kind(),
                    ErrorKind::Interrupted | ErrorKind::ConnectionAborted | ErrorKind::WouldBlock
                ) {
                    debug!("Transient accept() failure: {e}");
                    continue;
                }
                shared.report_error(TransportError::Socket {
                    message: format!("accept() failed: {e}"),
                    location: ErrorLocation::from(Location::caller()),
                });
                break;
            }
        };

        // The wake-up connection from stop() lands here
        if !shared.running.load(Ordering::SeqCst) {
            break;
        }

        shared.set_state(ServerState::Accepting);
        serve_peer(stream, addr, &shared);
    }

    shared.running.store(false, Ordering::SeqCst);
    shared.set_state(ServerState::Stopped);
    info!("TCP server thread finished");
}

/// Runs one connection session from registration to teardown.
fn serve_peer(stream: TcpStream, addr: SocketAddr, shared: &ServerShared) {
    let info = PeerInfo {
        id: shared.next_peer_id.fetch_add(1, Ordering::SeqCst),
        addr,
    };

    if let Err(e) = stream.set_write_timeout(Some(shared.write_timeout)) {
        warn!("Failed to set write timeout for {addr}: {e}");
    }

    let stream = Arc::new(stream);
    *lock(&shared.peer) = Some(ActivePeer {
        info,
        stream: Arc::clone(&stream),
    });
    shared.set_state(ServerState::Connected);

    info!("Client {} connected from {addr}", info.id);
    shared.notify_connected(info);

    // stop() may have run between accept() and registering the peer
    if shared.running.load(Ordering::SeqCst) {
        receive_until_closed(&stream, info, shared);
    }

    shared.set_state(ServerState::Disconnecting);
    info!("Client {} disconnected", info.id);
    shared.notify_disconnected(info);

    // Invalidate the handle before the next accept()
    lock(&shared.peer).take();
    if let Err(e) = stream.shutdown(Shutdown::Both) {
        debug!("Closing connection to {addr}: {e}");
    }
}

fn receive_until_closed(stream: &TcpStream, info: PeerInfo, shared: &ServerShared) {
    let mut reader = stream;
    let mut buffer = vec![0u8; RECEIVE_CHUNK_SIZE];

    while shared.running.load(Ordering::SeqCst) {
        match reader.read(&mut buffer) {
            Ok(0) => {
                debug!("Client {} closed connection", info.id);
                break;
            }
            Ok(received) => shared.notify_data(&buffer[..received]),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                if shared.running.load(Ordering::SeqCst) {
                    shared.report_error(TransportError::Socket {
                        message: format!("recv() from {} failed: {e}", info.addr),
                        location: ErrorLocation::from(Location::caller()),
                    });
                }
                break;
            }
        }
    }
}

/// Writes `data` in as many `write` calls as it takes.
///
/// Returns the number of bytes written alongside the outcome, so a failure can
/// be told apart from a partial write.
fn write_fully(stream: &TcpStream, data: &[u8]) -> (usize, Result<(), IoError>) {
    let mut writer = stream;
    let mut written = 0;

    while written < data.len() {
        match writer.write(&data[written..]) {
            Ok(0) => return (written, Err(IoError::from(ErrorKind::WriteZero))),
            Ok(count) => written += count,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return (written, Err(e)),
        }
    }

    (written, writer.flush())
}

/// Address to dial to reach a listener bound to `addr` from this host.
fn loopback_for(addr: SocketAddr) -> SocketAddr {
    if addr.ip().is_unspecified() {
        SocketAddr::from((Ipv4Addr::LOCALHOST, addr.port()))
    } else {
        addr
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
