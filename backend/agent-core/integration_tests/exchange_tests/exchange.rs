use crate::exchange_tests::helpers::{
    WAIT, connect, disconnect, frame, framed_command, is_connection_closed,
    read_variable_command, receive_event, send_command, start_exchange, test_options,
    wait_for_commands, wait_until,
};

use agent_core::dispatch::{CommandExecutor, DispatchOptions, Dispatcher, event_factory};
use agent_core::error::dispatch::ExecutorError;
use agent_core::proto::event::Payload;
use agent_core::proto::{
    EventType, ExecuteCodePayload, PositionalActionPayload, ReadVariablePayload,
};
use agent_core::transport::ExchangeOptions;

use std::io::{Read, Write};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Executor whose every variable holds the same value.
struct FixedValueExecutor(&'static str);

impl CommandExecutor for FixedValueExecutor {
    fn execute_code(&mut self, _payload: &ExecuteCodePayload) -> Result<(), ExecutorError> {
        Ok(())
    }

    fn read_variable(&mut self, _payload: &ReadVariablePayload) -> Result<String, ExecutorError> {
        Ok(self.0.to_string())
    }

    fn perform_positional_action(
        &mut self,
        _payload: &PositionalActionPayload,
    ) -> Result<(), ExecutorError> {
        Ok(())
    }
}

/// **VALUE**: Verifies the full request/response path over a real socket.
///
/// **WHY THIS MATTERS**: This is the one thing the system exists to do: a controller
/// sends READ_VARIABLE and gets the value back, framed, on the same connection.
///
/// **BUG THIS CATCHES**: Would catch if:
/// - Inbound frames are not decoded onto the inbound queue
/// - The sender loop never drains the outbound queue
/// - Events are sent without a length prefix
/// - `operation_id` is not carried from command to event
#[test]
fn given_read_variable_command_when_host_services_it_then_client_receives_result() {
    // GIVEN: A running exchange and a dispatcher that reads "42"
    let test = start_exchange(test_options());
    let mut dispatcher = Dispatcher::new(
        FixedValueExecutor("42"),
        Arc::clone(&test.outbound),
        DispatchOptions::default(),
    );
    let mut client = connect(&test);

    // WHEN: The client sends c1/op1 READ_VARIABLE x and the host services it
    send_command(&mut client, &read_variable_command("c1", "op1", "x"));
    assert!(wait_until(|| !test.inbound.is_empty()));
    assert!(dispatcher.service_one(&test.inbound));

    // THEN: The client receives one VARIABLE_READ_RESULT for op1 with "42"
    let event = receive_event(&mut client);
    assert_eq!(event.operation_id, "op1");
    assert_eq!(event.r#type, EventType::VariableReadResult as i32);
    assert!(!event.id.is_empty());
    match event.payload {
        Some(Payload::VariableReadResult(result)) => assert_eq!(result.result, "42"),
        other => panic!("Unexpected payload: {other:?}"),
    }
}

/// **VALUE**: Verifies decoding is independent of how the client chunks its writes.
///
/// **WHY THIS MATTERS**: Real controllers write headers and bodies separately, and the
/// kernel may coalesce or split them.
///
/// **BUG THIS CATCHES**: Would catch assuming one `read()` equals one frame.
#[test]
fn given_commands_split_across_writes_when_received_then_all_decoded_in_order() {
    // GIVEN: Three framed commands in one byte stream
    let test = start_exchange(test_options());
    let mut client = connect(&test);
    let stream: Vec<u8> = ["a", "b", "c"]
        .iter()
        .flat_map(|id| framed_command(&read_variable_command(id, id, "v")))
        .collect();

    // WHEN: Writing it in 3-byte pieces with pauses
    for piece in stream.chunks(3) {
        client.write_all(piece).expect("Client write");
        client.flush().expect("Client flush");
        thread::sleep(Duration::from_millis(1));
    }

    // THEN: Exactly three commands in order
    let commands = wait_for_commands(&test.inbound, 3);
    let ids: Vec<&str> = commands.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
}

/// **VALUE**: Verifies that a partial frame does not survive into the next session.
///
/// **WHY THIS MATTERS**: A controller that crashes mid-write reconnects and starts a
/// fresh stream. Stale bytes prepended to it would corrupt every later frame.
///
/// **BUG THIS CATCHES**: Would catch a receive buffer that is not reset on disconnect
/// or connect.
#[test]
fn given_partial_frame_when_client_reconnects_then_stale_bytes_discarded() {
    // GIVEN: A client that sent half a frame and vanished
    let test = start_exchange(test_options());
    let mut first = connect(&test);
    let partial = framed_command(&read_variable_command("stale", "stale", "x"));
    first
        .write_all(&partial[..partial.len() / 2])
        .expect("Client write");
    thread::sleep(Duration::from_millis(20));
    disconnect(&test, first);

    // WHEN: A new client sends one full frame
    let mut second = connect(&test);
    send_command(&mut second, &read_variable_command("fresh", "fresh", "y"));

    // THEN: Only the fresh command is decoded
    let commands = wait_for_commands(&test.inbound, 1);
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0].id, "fresh");
    thread::sleep(Duration::from_millis(20));
    assert!(test.inbound.is_empty());
}

/// **VALUE**: Verifies that a malformed frame is dropped and the stream continues.
///
/// **WHY THIS MATTERS**: Framing is intact even when the payload is garbage, so the
/// connection should keep serving the next frames.
///
/// **BUG THIS CATCHES**: Would catch disconnecting, or stopping decoding, after one
/// bad payload.
#[test]
fn given_malformed_frame_when_received_then_dropped_and_next_frame_decoded() {
    // GIVEN: A connected client
    let test = start_exchange(test_options());
    let mut client = connect(&test);

    // WHEN: It sends an undecodable frame followed by a valid one
    let mut bytes = frame(&[0xFF, 0xFF, 0xFF]);
    bytes.extend(framed_command(&read_variable_command("good", "op", "x")));
    client.write_all(&bytes).expect("Client write");

    // THEN: Only the valid command arrives and the peer is still connected
    let commands = wait_for_commands(&test.inbound, 1);
    assert_eq!(commands[0].id, "good");
    assert!(test.exchange.current_peer().is_some());
}

/// **VALUE**: Verifies that a frame over the size limit disconnects the peer.
///
/// **WHY THIS MATTERS**: Without a limit, a corrupt header would make the host buffer
/// up to 4 GiB waiting for a frame that never completes.
///
/// **BUG THIS CATCHES**: Would catch buffering oversized frames, or stopping the whole
/// server instead of only the session.
#[test]
fn given_oversized_frame_when_received_then_peer_disconnected_and_server_keeps_listening() {
    // GIVEN: An exchange accepting at most 64-byte frames
    let test = start_exchange(ExchangeOptions {
        max_frame_bytes: 64,
        ..test_options()
    });
    let mut client = connect(&test);

    // WHEN: The client declares a 1000-byte frame
    client
        .write_all(&1000u32.to_be_bytes())
        .expect("Client write");

    // THEN: The connection is closed, nothing is queued, a new client is served
    assert!(is_connection_closed(&mut client));
    assert!(wait_until(|| test.exchange.current_peer().is_none()));
    assert!(test.inbound.is_empty());
    assert!(test.exchange.is_running());

    let mut again = connect(&test);
    send_command(&mut again, &read_variable_command("after", "op", "x"));
    assert_eq!(wait_for_commands(&test.inbound, 1)[0].id, "after");
}

/// **VALUE**: Verifies that events queued while no client is connected are delivered
/// once one connects.
///
/// **WHY THIS MATTERS**: The sender only drains while a peer is present. Results
/// produced during a reconnect gap must not be lost.
///
/// **BUG THIS CATCHES**: Would catch draining (and dropping) the queue with no peer.
#[test]
fn given_events_queued_before_connect_when_client_connects_then_delivered_in_order() {
    // GIVEN: Two events queued with nobody connected
    let test = start_exchange(test_options());
    test.outbound.push(event_factory::operation_succeeded("first"));
    test.outbound.push(event_factory::operation_failed("second", "nope"));
    thread::sleep(Duration::from_millis(30));
    assert_eq!(test.outbound.len(), 2);

    // WHEN: A client connects
    let mut client = connect(&test);

    // THEN: Both events arrive in order
    assert_eq!(receive_event(&mut client).operation_id, "first");
    assert_eq!(receive_event(&mut client).operation_id, "second");
    assert!(wait_until(|| test.outbound.is_empty()));
}

/// **VALUE**: Verifies stop is idempotent, bounded and leaves the exchange restartable.
///
/// **WHY THIS MATTERS**: Hosts stop on unload and start again on reload within one
/// process.
///
/// **BUG THIS CATCHES**: Would catch threads left running after stop, or a second stop
/// blocking forever.
#[test]
fn given_connected_exchange_when_stopped_twice_then_stopped_and_restartable() {
    // GIVEN: A running exchange with a connected client
    let mut test = start_exchange(test_options());
    let mut client = connect(&test);

    // WHEN: Stopping twice
    let started = Instant::now();
    test.exchange.stop();
    test.exchange.stop();

    // THEN: Stopped quickly, client sees the close
    assert!(started.elapsed() < WAIT);
    assert!(!test.exchange.is_running());
    assert!(test.exchange.local_addr().is_none());
    assert!(test.exchange.current_peer().is_none());
    assert!(is_connection_closed(&mut client));

    // WHEN: Starting again
    let addr = test.exchange.start(0).expect("Restart should succeed");

    // THEN: Running on a fresh port
    assert!(test.exchange.is_running());
    assert_eq!(test.exchange.local_addr(), Some(addr));
}

/// **VALUE**: Verifies that starting a running exchange is rejected.
///
/// **BUG THIS CATCHES**: Would catch spawning a second sender thread.
#[test]
fn given_running_exchange_when_started_again_then_error() {
    // GIVEN: A running exchange
    let mut test = start_exchange(test_options());

    // WHEN: Starting again
    let result = test.exchange.start(0);

    // THEN: Error, still running on the original address
    assert!(result.is_err());
    assert!(test.exchange.is_running());
    assert_eq!(test.exchange.local_addr(), Some(test.addr));
}

/// **VALUE**: Verifies that an event cut off mid-frame costs only that event and
/// its session: the events behind it reach the next session intact.
///
/// **WHY THIS MATTERS**: A controller that stops reading long enough for a write to
/// time out must not leave the exchange writing into a stream the controller can
/// never resynchronize on.
///
/// **BUG THIS CATCHES**: Would catch if:
/// - The session stays open after a partial write
/// - Events behind the failed one are sent into the closed session and lost
/// - The next session starts in the middle of a frame
#[test]
fn given_stalled_client_when_event_cut_off_mid_frame_then_next_session_gets_later_events() {
    // GIVEN: A short write timeout and a client that does not read
    let test = start_exchange(ExchangeOptions {
        write_timeout: Duration::from_millis(200),
        ..test_options()
    });
    let mut stalled = connect(&test);

    // WHEN: An event too large for the socket buffers is queued ahead of a small one
    let huge_value = "x".repeat(32 * 1024 * 1024);
    test.outbound
        .push(event_factory::variable_read_result("huge", huge_value));
    test.outbound
        .push(event_factory::variable_read_result("after", "ok"));

    // THEN: The exchange closes the stalled session on its own
    assert!(
        wait_until(|| test.exchange.current_peer().is_none()),
        "Session was not closed after the partial write"
    );

    // AND: The stalled client holds a truncated frame, then end of stream
    let mut received = Vec::new();
    stalled
        .read_to_end(&mut received)
        .expect("Connection should close cleanly");
    assert!(received.len() > 4);
    let declared = u32::from_be_bytes([received[0], received[1], received[2], received[3]]);
    assert!(received.len() - 4 < declared as usize);

    // AND: The small event was kept and arrives whole on the next session
    let mut client = connect(&test);
    let event = receive_event(&mut client);
    assert_eq!(event.operation_id, "after");
    match event.payload {
        Some(Payload::VariableReadResult(result)) => assert_eq!(result.result, "ok"),
        other => panic!("Expected VariableReadResult, got {other:?}"),
    }
    assert!(wait_until(|| test.outbound.is_empty()));
}
