// Unit tests for Dispatcher routing, validation and acknowledgement policy

use super::{Outcome, ScriptedExecutor};

use crate::dispatch::{DEFAULT_CHUNK_NAME, DispatchOptions, Dispatcher};
use crate::error::dispatch::ExecutorError;
use crate::proto::command::Payload;
use crate::proto::event::Payload as EventPayload;
use crate::proto::{
    Command, CommandType, EventType, ExecuteCodePayload, Position, PositionalActionKind,
    PositionalActionPayload, ReadVariablePayload,
};
use crate::queue::{InboundQueue, OutboundQueue};

use std::sync::Arc;

fn dispatcher_with(
    executor: ScriptedExecutor,
    acknowledge_operations: bool,
) -> (Dispatcher<ScriptedExecutor>, Arc<OutboundQueue>) {
    let outbound = Arc::new(OutboundQueue::new());
    let dispatcher = Dispatcher::new(
        executor,
        Arc::clone(&outbound),
        DispatchOptions {
            acknowledge_operations,
        },
    );
    (dispatcher, outbound)
}

fn command(id: &str, operation_id: &str, command_type: CommandType, payload: Option<Payload>) -> Command {
    Command {
        id: id.to_string(),
        operation_id: operation_id.to_string(),
        r#type: command_type as i32,
        payload,
    }
}

fn read_variable(name: &str) -> Command {
    command(
        "c1",
        "op1",
        CommandType::ReadVariable,
        Some(Payload::ReadVariable(ReadVariablePayload {
            variable_name: name.to_string(),
        })),
    )
}

fn execute_code(code: &str, chunk_name: &str) -> Command {
    command(
        "c2",
        "op2",
        CommandType::ExecuteCode,
        Some(Payload::ExecuteCode(ExecuteCodePayload {
            code: code.to_string(),
            chunk_name: chunk_name.to_string(),
        })),
    )
}

fn positional(target_address: u64, position: Option<Position>) -> Command {
    command(
        "c3",
        "op3",
        CommandType::PositionalAction,
        Some(Payload::PositionalAction(PositionalActionPayload {
            target_address,
            position,
            action: PositionalActionKind::Move as i32,
            precision: 0.5,
        })),
    )
}

fn origin() -> Option<Position> {
    Some(Position {
        x: 1.0,
        y: 2.0,
        z: 3.0,
    })
}

// ============================================
// READ_VARIABLE
// ============================================

/// **VALUE**: Verifies the read path end to end: one event carrying the value and
/// the command's operation id.
///
/// **WHY THIS MATTERS**: The controller correlates responses by `operation_id`. A
/// missing or wrong id leaves it waiting forever.
///
/// **BUG THIS CATCHES**: Would catch copying the command `id` instead of the
/// `operation_id`, or pushing more than one event.
#[test]
fn given_read_variable_when_dispatched_then_exactly_one_result_event() {
    // GIVEN: An executor that reads "42"
    let mut executor = ScriptedExecutor::new();
    executor.read = Outcome::Return(String::from("42"));
    let (mut dispatcher, outbound) = dispatcher_with(executor, false);

    // WHEN: Dispatching a read of "x"
    dispatcher.dispatch(read_variable("x"));

    // THEN: One VARIABLE_READ_RESULT event with op1 and "42"
    assert_eq!(outbound.len(), 1);
    let event = outbound.pop().expect("One event");
    assert_eq!(event.operation_id, "op1");
    assert_eq!(event.r#type, EventType::VariableReadResult as i32);
    assert!(!event.id.is_empty());
    assert_ne!(event.id, "c1");
    match event.payload {
        Some(EventPayload::VariableReadResult(result)) => assert_eq!(result.result, "42"),
        other => panic!("Unexpected payload: {other:?}"),
    }
    assert_eq!(dispatcher.executor().reads, vec![String::from("x")]);
}

/// **VALUE**: Verifies that a rejected read is silent when acknowledgements are off.
///
/// **BUG THIS CATCHES**: Would catch emitting a result event with an empty value on
/// failure.
#[test]
fn given_rejected_read_without_acks_when_dispatched_then_no_event() {
    // GIVEN: An executor rejecting every read
    let mut executor = ScriptedExecutor::new();
    executor.read = Outcome::Fail(ExecutorError::rejected("no such variable"));
    let (mut dispatcher, outbound) = dispatcher_with(executor, false);

    // WHEN: Dispatching a read
    dispatcher.dispatch(read_variable("missing"));

    // THEN: No event
    assert!(outbound.is_empty());
}

/// **VALUE**: Verifies that a rejected read becomes OperationFailed when acknowledgements are on.
///
/// **WHY THIS MATTERS**: With acks, the controller gets a definite answer for every
/// operation the host could evaluate.
///
/// **BUG THIS CATCHES**: Would catch dropping the rejection reason.
#[test]
fn given_rejected_read_with_acks_when_dispatched_then_operation_failed_event() {
    // GIVEN: Acks on and a rejecting executor
    let mut executor = ScriptedExecutor::new();
    executor.read = Outcome::Fail(ExecutorError::rejected("no such variable"));
    let (mut dispatcher, outbound) = dispatcher_with(executor, true);

    // WHEN: Dispatching a read
    dispatcher.dispatch(read_variable("missing"));

    // THEN: OperationFailed with the reason
    let event = outbound.pop().expect("One event");
    assert!(outbound.is_empty());
    assert_eq!(event.operation_id, "op1");
    assert_eq!(event.r#type, EventType::OperationFailed as i32);
    match event.payload {
        Some(EventPayload::OperationFailed(failed)) => {
            assert_eq!(failed.reason, "no such variable")
        }
        other => panic!("Unexpected payload: {other:?}"),
    }
}

/// **VALUE**: Verifies that an empty variable name is rejected before reaching the executor.
///
/// **BUG THIS CATCHES**: Would catch handing an empty lookup key to the runtime.
#[test]
fn given_empty_variable_name_when_dispatched_then_executor_not_called() {
    // GIVEN: A dispatcher with acks on
    let (mut dispatcher, outbound) = dispatcher_with(ScriptedExecutor::new(), true);

    // WHEN: Dispatching a read with an empty name
    dispatcher.dispatch(read_variable(""));

    // THEN: Nothing happens
    assert_eq!(dispatcher.executor().calls(), 0);
    assert!(outbound.is_empty());
}

// ============================================
// EXECUTE_CODE
// ============================================

/// **VALUE**: Verifies that a missing payload is ignored without calling the executor.
///
/// **WHY THIS MATTERS**: A malformed command from the controller must never crash the
/// host or trigger an action with default values.
///
/// **BUG THIS CATCHES**: Would catch executing an empty string when the payload is absent.
#[test]
fn given_execute_code_without_payload_when_dispatched_then_no_call_and_no_event() {
    // GIVEN: EXECUTE_CODE with no payload
    let (mut dispatcher, outbound) = dispatcher_with(ScriptedExecutor::new(), true);
    let bare = command("c2", "op2", CommandType::ExecuteCode, None);

    // WHEN: Dispatching it
    dispatcher.dispatch(bare);

    // THEN: Executor untouched, no event
    assert_eq!(dispatcher.executor().calls(), 0);
    assert!(outbound.is_empty());
}

/// **VALUE**: Verifies that a payload for a different command kind is treated as missing.
///
/// **BUG THIS CATCHES**: Would catch routing on the payload variant instead of `type`.
#[test]
fn given_mismatched_payload_when_dispatched_then_ignored() {
    // GIVEN: EXECUTE_CODE carrying a read-variable payload
    let (mut dispatcher, outbound) = dispatcher_with(ScriptedExecutor::new(), true);
    let mut mismatched = read_variable("x");
    mismatched.r#type = CommandType::ExecuteCode as i32;

    // WHEN: Dispatching it
    dispatcher.dispatch(mismatched);

    // THEN: Nothing runs
    assert_eq!(dispatcher.executor().calls(), 0);
    assert!(outbound.is_empty());
}

/// **VALUE**: Verifies that successful code execution produces no event by default.
///
/// **WHY THIS MATTERS**: EXECUTE_CODE is fire-and-forget unless acks are enabled.
///
/// **BUG THIS CATCHES**: Would catch unsolicited events confusing existing controllers.
#[test]
fn given_execute_code_without_acks_when_dispatched_then_runs_and_no_event() {
    // GIVEN: A default dispatcher
    let (mut dispatcher, outbound) = dispatcher_with(ScriptedExecutor::new(), false);

    // WHEN: Executing code
    dispatcher.dispatch(execute_code("print(1)", "init"));

    // THEN: Executor ran the code with the given chunk name
    let executed = &dispatcher.executor().executed;
    assert_eq!(executed.len(), 1);
    assert_eq!(executed[0].code, "print(1)");
    assert_eq!(executed[0].chunk_name, "init");
    assert!(outbound.is_empty());
}

/// **VALUE**: Verifies the default chunk name when the command leaves it empty.
///
/// **BUG THIS CATCHES**: Would catch passing an empty chunk name to the runtime.
#[test]
fn given_empty_chunk_name_when_executing_then_default_chunk_name_used() {
    // GIVEN: A default dispatcher
    let (mut dispatcher, _outbound) = dispatcher_with(ScriptedExecutor::new(), false);

    // WHEN: Executing code with no chunk name
    dispatcher.dispatch(execute_code("x = 1", ""));

    // THEN: The default is filled in
    assert_eq!(
        dispatcher.executor().executed[0].chunk_name,
        DEFAULT_CHUNK_NAME
    );
}

/// **VALUE**: Verifies that empty code is rejected.
///
/// **BUG THIS CATCHES**: Would catch running an empty chunk and acknowledging it.
#[test]
fn given_empty_code_when_dispatched_then_executor_not_called() {
    // GIVEN: Acks on
    let (mut dispatcher, outbound) = dispatcher_with(ScriptedExecutor::new(), true);

    // WHEN: Executing empty code
    dispatcher.dispatch(execute_code("", "chunk"));

    // THEN: Nothing runs
    assert_eq!(dispatcher.executor().calls(), 0);
    assert!(outbound.is_empty());
}

/// **VALUE**: Verifies acknowledgement of successful and rejected execution.
///
/// **WHY THIS MATTERS**: Controllers that enable acks wait on exactly one answer per
/// operation.
///
/// **BUG THIS CATCHES**: Would catch acking with the wrong event type.
#[test]
fn given_acks_when_executing_then_success_and_failure_events() {
    // GIVEN: Acks on, first call succeeds
    let (mut dispatcher, outbound) = dispatcher_with(ScriptedExecutor::new(), true);

    // WHEN: Executing successfully
    dispatcher.dispatch(execute_code("ok()", ""));

    // THEN: OperationSucceeded
    let event = outbound.pop().expect("Success event");
    assert_eq!(event.operation_id, "op2");
    assert_eq!(event.r#type, EventType::OperationSucceeded as i32);
    assert!(matches!(
        event.payload,
        Some(EventPayload::OperationSucceeded(_))
    ));

    // WHEN: The runtime rejects the next chunk
    dispatcher.executor_mut().execute = Outcome::Fail(ExecutorError::rejected("syntax error"));
    dispatcher.dispatch(execute_code("bad(", ""));

    // THEN: OperationFailed with the reason
    let event = outbound.pop().expect("Failure event");
    assert_eq!(event.r#type, EventType::OperationFailed as i32);
    assert!(matches!(
        event.payload,
        Some(EventPayload::OperationFailed(ref failed)) if failed.reason == "syntax error"
    ));
    assert!(outbound.is_empty());
}

/// **VALUE**: Verifies that an executor fault produces no event even with acks on.
///
/// **WHY THIS MATTERS**: A fault means the operation could not be evaluated at all.
/// It is logged on the host side; the controller relies on its own timeout.
///
/// **BUG THIS CATCHES**: Would catch reporting a fault as a normal failure.
#[test]
fn given_executor_fault_when_dispatched_then_no_event() {
    // GIVEN: Acks on and a faulting executor
    let mut executor = ScriptedExecutor::new();
    executor.execute = Outcome::Fail(ExecutorError::fault("runtime unavailable"));
    let (mut dispatcher, outbound) = dispatcher_with(executor, true);

    // WHEN: Executing code
    dispatcher.dispatch(execute_code("x()", ""));

    // THEN: Called once, no event
    assert_eq!(dispatcher.executor().executed.len(), 1);
    assert!(outbound.is_empty());
}

/// **VALUE**: Verifies that an executor panic is contained and the dispatcher keeps working.
///
/// **WHY THIS MATTERS**: The dispatcher runs inside the host's update loop. A panic
/// escaping it would take the host down.
///
/// **BUG THIS CATCHES**: Would catch a missing `catch_unwind` at the executor boundary.
#[test]
fn given_executor_panic_when_dispatched_then_contained_and_next_command_served() {
    // GIVEN: An executor that panics on execute
    let mut executor = ScriptedExecutor::new();
    executor.execute = Outcome::Panic;
    executor.read = Outcome::Return(String::from("still alive"));
    let (mut dispatcher, outbound) = dispatcher_with(executor, true);

    // WHEN: Executing code, then reading a variable
    dispatcher.dispatch(execute_code("boom()", ""));
    dispatcher.dispatch(read_variable("x"));

    // THEN: No event for the panic, a normal event for the read
    let event = outbound.pop().expect("Read result");
    assert_eq!(event.operation_id, "op1");
    assert!(outbound.is_empty());
}

// ============================================
// POSITIONAL_ACTION
// ============================================

/// **VALUE**: Verifies that a valid positional action reaches the executor unchanged.
///
/// **BUG THIS CATCHES**: Would catch dropping the position or the action kind.
#[test]
fn given_valid_positional_action_when_dispatched_then_executor_receives_payload() {
    // GIVEN: A default dispatcher
    let (mut dispatcher, outbound) = dispatcher_with(ScriptedExecutor::new(), false);

    // WHEN: Dispatching a move
    dispatcher.dispatch(positional(0xDEAD_BEEF, origin()));

    // THEN: One call with the same payload
    let actions = &dispatcher.executor().actions;
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0].target_address, 0xDEAD_BEEF);
    assert_eq!(actions[0].position, origin());
    assert_eq!(actions[0].action(), PositionalActionKind::Move);
    assert!(outbound.is_empty());
}

/// **VALUE**: Verifies validation of the target address and position.
///
/// **WHY THIS MATTERS**: A zero address would be dereferenced by the host.
///
/// **BUG THIS CATCHES**: Would catch forwarding a null target to the executor.
#[test]
fn given_invalid_positional_action_when_dispatched_then_executor_not_called() {
    // GIVEN: Acks on
    let (mut dispatcher, outbound) = dispatcher_with(ScriptedExecutor::new(), true);

    // WHEN: Dispatching a zero target and a missing position
    dispatcher.dispatch(positional(0, origin()));
    dispatcher.dispatch(positional(42, None));

    // THEN: Neither reaches the executor
    assert_eq!(dispatcher.executor().calls(), 0);
    assert!(outbound.is_empty());
}

// ============================================
// ROUTING
// ============================================

/// **VALUE**: Verifies that unknown and unspecified discriminants are ignored.
///
/// **WHY THIS MATTERS**: A newer controller may send types this host does not know.
///
/// **BUG THIS CATCHES**: Would catch falling through to a default handler.
#[test]
fn given_unknown_command_type_when_dispatched_then_ignored() {
    // GIVEN: Commands with type 99 and UNSPECIFIED
    let (mut dispatcher, outbound) = dispatcher_with(ScriptedExecutor::new(), true);
    let mut unknown = read_variable("x");
    unknown.r#type = 99;
    let mut unspecified = read_variable("x");
    unspecified.r#type = CommandType::Unspecified as i32;

    // WHEN: Dispatching both
    dispatcher.dispatch(unknown);
    dispatcher.dispatch(unspecified);

    // THEN: No calls and no events
    assert_eq!(dispatcher.executor().calls(), 0);
    assert!(outbound.is_empty());
}

/// **VALUE**: Verifies that `service_one` pops one command per call in FIFO order.
///
/// **WHY THIS MATTERS**: The host drives the dispatcher one command per tick.
///
/// **BUG THIS CATCHES**: Would catch draining the whole queue in one call.
#[test]
fn given_inbound_commands_when_servicing_then_one_per_call_in_order() {
    // GIVEN: Two reads queued
    let mut executor = ScriptedExecutor::new();
    executor.read = Outcome::Return(String::from("v"));
    let (mut dispatcher, outbound) = dispatcher_with(executor, false);
    let inbound = InboundQueue::new();
    inbound.push(read_variable("first"));
    inbound.push(read_variable("second"));

    // WHEN: Servicing three times
    let results = [
        dispatcher.service_one(&inbound),
        dispatcher.service_one(&inbound),
        dispatcher.service_one(&inbound),
    ];

    // THEN: Two commands served, then empty
    assert_eq!(results, [true, true, false]);
    assert_eq!(
        dispatcher.executor().reads,
        vec![String::from("first"), String::from("second")]
    );
    assert_eq!(outbound.len(), 2);
}

/// **VALUE**: Verifies that every event gets its own fresh id.
///
/// **BUG THIS CATCHES**: Would catch reusing one id for all events.
#[test]
fn given_repeated_reads_when_dispatched_then_event_ids_differ() {
    // GIVEN: A dispatcher
    let (mut dispatcher, outbound) = dispatcher_with(ScriptedExecutor::new(), false);

    // WHEN: Dispatching the same read twice
    dispatcher.dispatch(read_variable("x"));
    dispatcher.dispatch(read_variable("x"));

    // THEN: Same operation id, different event ids
    let first = outbound.pop().expect("First event");
    let second = outbound.pop().expect("Second event");
    assert_eq!(first.operation_id, second.operation_id);
    assert_ne!(first.id, second.id);
}
