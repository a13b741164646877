use crate::exchange_tests::helpers::{
    WAIT, is_connection_closed, read_variable_command, receive_event, send_command, wait_until,
};

use agent_core::AgentContext;
use agent_core::config::AgentConfig;
use agent_core::dispatch::CommandExecutor;
use agent_core::error::CoreError;
use agent_core::error::dispatch::ExecutorError;
use agent_core::proto::event::Payload;
use agent_core::proto::{ExecuteCodePayload, PositionalActionPayload, ReadVariablePayload};

use std::net::TcpStream;

/// Executor that rejects every read and accepts everything else.
struct RejectingReader;

impl CommandExecutor for RejectingReader {
    fn execute_code(&mut self, _payload: &ExecuteCodePayload) -> Result<(), ExecutorError> {
        Ok(())
    }

    fn read_variable(&mut self, payload: &ReadVariablePayload) -> Result<String, ExecutorError> {
        Err(ExecutorError::rejected(format!(
            "'{}' is not defined",
            payload.variable_name
        )))
    }

    fn perform_positional_action(
        &mut self,
        _payload: &PositionalActionPayload,
    ) -> Result<(), ExecutorError> {
        Ok(())
    }
}

fn loopback_config(acknowledge_operations: bool) -> AgentConfig {
    let mut config = AgentConfig::default();
    config.transport.port = 0;
    config.transport.bind_address = String::from("127.0.0.1");
    config.dispatch.acknowledge_operations = acknowledge_operations;
    config
}

/// **VALUE**: Verifies the context wires config, queues, exchange and dispatcher together.
///
/// **WHY THIS MATTERS**: Hosts only touch `AgentContext`. The acknowledgement switch in
/// config must reach the dispatcher it builds.
///
/// **BUG THIS CATCHES**: Would catch a dispatcher publishing to a queue the sender
/// never drains, or ignoring `dispatch.acknowledge_operations`.
#[test]
fn given_context_with_acks_when_read_rejected_then_client_receives_operation_failed() {
    // GIVEN: A started context with acks on
    let mut context = AgentContext::new(loopback_config(true));
    let addr = context.start().expect("Context should start");
    let mut dispatcher = context.dispatcher(RejectingReader);

    let mut client = TcpStream::connect(addr).expect("Connect");
    client.set_read_timeout(Some(WAIT)).expect("Read timeout");
    assert!(wait_until(|| context.current_peer().is_some()));

    // WHEN: Reading an undefined variable
    send_command(&mut client, &read_variable_command("c9", "op9", "ghost"));
    assert!(wait_until(|| !context.inbound().is_empty()));
    assert!(dispatcher.service_one(context.inbound()));

    // THEN: OperationFailed with the executor's reason
    let event = receive_event(&mut client);
    assert_eq!(event.operation_id, "op9");
    match event.payload {
        Some(Payload::OperationFailed(failed)) => {
            assert_eq!(failed.reason, "'ghost' is not defined")
        }
        other => panic!("Unexpected payload: {other:?}"),
    }
}

/// **VALUE**: Verifies that an invalid config is refused before any socket is opened.
///
/// **BUG THIS CATCHES**: Would catch starting with a zero poll interval (busy spin).
#[test]
fn given_invalid_config_when_starting_then_config_error_and_not_running() {
    // GIVEN: A config with a zero poll interval
    let mut config = loopback_config(false);
    config.transport.outgoing_poll_interval_ms = 0;
    let mut context = AgentContext::new(config);

    // WHEN: Starting
    let result = context.start();

    // THEN: Config error, not running
    assert!(matches!(result, Err(CoreError::Config(_))));
    assert!(!context.is_running());
    assert!(context.local_addr().is_none());
}

/// **VALUE**: Verifies that shutdown is idempotent and closes the client connection.
///
/// **BUG THIS CATCHES**: Would catch a second shutdown (e.g. explicit + drop) hanging.
#[test]
fn given_started_context_when_shut_down_twice_then_client_closed() {
    // GIVEN: A started context with a client
    let mut context = AgentContext::new(loopback_config(false));
    let addr = context.start().expect("Context should start");
    let mut client = TcpStream::connect(addr).expect("Connect");
    client.set_read_timeout(Some(WAIT)).expect("Read timeout");
    assert!(wait_until(|| context.current_peer().is_some()));

    // WHEN: Shutting down twice
    context.shutdown();
    context.shutdown();

    // THEN: Not running, client sees the close
    assert!(!context.is_running());
    assert!(is_connection_closed(&mut client));
}
