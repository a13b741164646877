//! Test helpers for exchange integration tests.
//!
//! This module provides utilities for driving an [`Exchange`] from a plain
//! blocking TCP client:
//! - Starting an exchange on an ephemeral loopback port
//! - Writing framed commands and raw bytes
//! - Reading framed events
//! - Polling for asynchronous state changes

use agent_core::proto::command::Payload;
use agent_core::proto::{Command, CommandType, Event, ReadVariablePayload};
use agent_core::queue::{InboundQueue, OutboundQueue};
use agent_core::transport::{Exchange, ExchangeOptions};

use std::io::{ErrorKind, Read, Write};
use std::net::{Ipv4Addr, SocketAddr, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use prost::Message as ProstMessage;

/// Upper bound for any single wait in these tests.
pub const WAIT: Duration = Duration::from_secs(5);

/// An exchange bound to 127.0.0.1 on an ephemeral port, with its queues.
pub struct TestExchange {
    pub exchange: Exchange,
    pub addr: SocketAddr,
    pub inbound: Arc<InboundQueue>,
    pub outbound: Arc<OutboundQueue>,
}

/// Test helper: Options tuned for fast tests.
pub fn test_options() -> ExchangeOptions {
    ExchangeOptions {
        bind_address: Ipv4Addr::LOCALHOST,
        outgoing_poll_interval: Duration::from_millis(5),
        stop_timeout: Duration::from_secs(2),
        ..ExchangeOptions::default()
    }
}

/// Test helper: Start an exchange with `options` on port 0.
pub fn start_exchange(options: ExchangeOptions) -> TestExchange {
    let inbound = Arc::new(InboundQueue::new());
    let outbound = Arc::new(OutboundQueue::new());
    let mut exchange = Exchange::new(options, Arc::clone(&inbound), Arc::clone(&outbound));
    let addr = exchange.start(0).expect("Exchange should start");

    TestExchange {
        exchange,
        addr,
        inbound,
        outbound,
    }
}

/// Test helper: Connect and wait until the exchange has registered the peer.
pub fn connect(test: &TestExchange) -> TcpStream {
    let previous = test.exchange.current_peer().map(|peer| peer.id);
    let stream = TcpStream::connect(test.addr).expect("Failed to connect to exchange");
    stream
        .set_read_timeout(Some(WAIT))
        .expect("Failed to set read timeout");

    assert!(
        wait_until(|| test
            .exchange
            .current_peer()
            .is_some_and(|peer| Some(peer.id) != previous)),
        "Exchange never registered the client"
    );
    stream
}

/// Test helper: Close the client and wait until the exchange has seen it go.
pub fn disconnect(test: &TestExchange, stream: TcpStream) {
    drop(stream);
    assert!(
        wait_until(|| test.exchange.current_peer().is_none()),
        "Exchange never noticed the disconnect"
    );
}

/// Test helper: Length-prefix `payload`.
pub fn frame(payload: &[u8]) -> Vec<u8> {
    let mut framed = (payload.len() as u32).to_be_bytes().to_vec();
    framed.extend_from_slice(payload);
    framed
}

/// Test helper: Encode and frame a command.
pub fn framed_command(command: &Command) -> Vec<u8> {
    frame(&command.encode_to_vec())
}

/// Test helper: Build a READ_VARIABLE command.
pub fn read_variable_command(id: &str, operation_id: &str, name: &str) -> Command {
    Command {
        id: id.to_string(),
        operation_id: operation_id.to_string(),
        r#type: CommandType::ReadVariable as i32,
        payload: Some(Payload::ReadVariable(ReadVariablePayload {
            variable_name: name.to_string(),
        })),
    }
}

/// Test helper: Send one framed command.
pub fn send_command(stream: &mut TcpStream, command: &Command) {
    stream
        .write_all(&framed_command(command))
        .expect("Failed to send command");
}

/// Test helper: Read one framed event.
pub fn receive_event(stream: &mut TcpStream) -> Event {
    let mut header = [0u8; 4];
    stream
        .read_exact(&mut header)
        .expect("Failed to read frame header");
    let mut payload = vec![0u8; u32::from_be_bytes(header) as usize];
    stream
        .read_exact(&mut payload)
        .expect("Failed to read frame payload");
    Event::decode(payload.as_slice()).expect("Failed to decode event")
}

/// Test helper: `true` once the server has closed the connection.
pub fn is_connection_closed(stream: &mut TcpStream) -> bool {
    let mut byte = [0u8; 1];
    match stream.read(&mut byte) {
        Ok(0) => true,
        Ok(_) => false,
        Err(e) => matches!(
            e.kind(),
            ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe
        ),
    }
}

/// Test helper: Wait until `inbound` holds `count` commands.
pub fn wait_for_commands(inbound: &InboundQueue, count: usize) -> Vec<Command> {
    assert!(
        wait_until(|| inbound.len() >= count),
        "Expected {count} commands, got {}",
        inbound.len()
    );
    inbound.take_all().into_iter().collect()
}

/// Test helper: Poll `condition` every 5 ms for up to [`WAIT`].
pub fn wait_until(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}
