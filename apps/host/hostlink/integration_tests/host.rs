use hostlink::executor::LoopbackExecutor;
use hostlink::host_loop::HostLoop;

use agent_core::AgentContext;
use agent_core::config::AgentConfig;
use agent_core::proto::command::Payload;
use agent_core::proto::event::Payload as EventPayload;
use agent_core::proto::{
    Command, CommandType, Event, EventType, ExecuteCodePayload, ReadVariablePayload,
};

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::{Duration, Instant};

use prost::Message as ProstMessage;

fn send(stream: &mut TcpStream, command: &Command) {
    let payload = command.encode_to_vec();
    let mut frame = (payload.len() as u32).to_be_bytes().to_vec();
    frame.extend(payload);
    stream.write_all(&frame).expect("Failed to send command");
}

fn receive(stream: &mut TcpStream) -> Event {
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).expect("Failed to read header");
    let mut payload = vec![0u8; u32::from_be_bytes(header) as usize];
    stream.read_exact(&mut payload).expect("Failed to read payload");
    Event::decode(payload.as_slice()).expect("Failed to decode event")
}

/// **VALUE**: Verifies the stand-alone host end to end: set a variable, read it back.
///
/// **WHY THIS MATTERS**: This is what a controller sees when it talks to the shipped
/// binary: commands are serviced on the host loop, not the network thread, and
/// results come back on the same socket.
///
/// **BUG THIS CATCHES**: Would catch if:
/// - The host loop never services the inbound queue
/// - Acks configured in `AgentConfig` do not reach the dispatcher
/// - Commands are reordered between EXECUTE_CODE and READ_VARIABLE
#[test]
fn given_running_host_when_controller_sets_and_reads_variable_then_value_returned() {
    // GIVEN: A host on an ephemeral loopback port with acks on
    let mut config = AgentConfig::default();
    config.transport.port = 0;
    config.transport.bind_address = String::from("127.0.0.1");
    config.dispatch.acknowledge_operations = true;
    config.host.tick_interval_ms = 1;

    let mut context = AgentContext::new(config);
    let addr = context.start().expect("Context should start");
    let mut dispatcher = context.dispatcher(LoopbackExecutor::new());
    let inbound = Arc::clone(context.inbound());

    let host_loop = HostLoop::new(Duration::from_millis(1));
    let stop = host_loop.stop_handle();
    let runner = thread::spawn(move || host_loop.run(&mut dispatcher, &inbound));

    let mut client = TcpStream::connect(addr).expect("Connect");
    client
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("Read timeout");
    let deadline = Instant::now() + Duration::from_secs(5);
    while context.current_peer().is_none() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }

    // WHEN: The controller assigns x and then reads it
    send(
        &mut client,
        &Command {
            id: String::from("c1"),
            operation_id: String::from("set-x"),
            r#type: CommandType::ExecuteCode as i32,
            payload: Some(Payload::ExecuteCode(ExecuteCodePayload {
                code: String::from("x = 42"),
                chunk_name: String::new(),
            })),
        },
    );
    send(
        &mut client,
        &Command {
            id: String::from("c2"),
            operation_id: String::from("get-x"),
            r#type: CommandType::ReadVariable as i32,
            payload: Some(Payload::ReadVariable(ReadVariablePayload {
                variable_name: String::from("x"),
            })),
        },
    );

    // THEN: An ack for the assignment, then the value
    let ack = receive(&mut client);
    assert_eq!(ack.operation_id, "set-x");
    assert_eq!(ack.r#type, EventType::OperationSucceeded as i32);

    let result = receive(&mut client);
    assert_eq!(result.operation_id, "get-x");
    match result.payload {
        Some(EventPayload::VariableReadResult(read)) => assert_eq!(read.result, "42"),
        other => panic!("Unexpected payload: {other:?}"),
    }

    stop.store(true, Ordering::SeqCst);
    assert_eq!(runner.join().expect("Host loop should finish"), 2);
    context.shutdown();
}
