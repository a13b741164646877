//! Routes a decoded [`Command`] to its handler.
//!
//! # Contract
//!
//! - Exactly one handler per [`CommandType`]
//! - Unknown discriminants, missing or mismatched payloads and invalid payloads
//!   are logged and ignored
//! - Executor faults and panics are caught here, logged, and produce no event
//! - An event is pushed only after it is fully built
//!
//! Nothing in this module returns an error to the caller of
//! [`Dispatcher::dispatch`]; the controller observes a missing response.
//!
//! # Consumer cycle
//!
//! The host calls into the dispatcher from its own update loop. Either pop a
//! command from the [`InboundQueue`] and pass it to [`Dispatcher::dispatch`], or
//! call [`Dispatcher::service_one`], which does both.

use crate::dispatch::event_factory;
use crate::dispatch::executor::{CommandExecutor, DEFAULT_CHUNK_NAME};
use crate::error::dispatch::{DispatchError, ExecutorError};
use crate::proto::command::Payload;
use crate::proto::{Command, CommandType, Event};
use crate::queue::{InboundQueue, OutboundQueue};

use common::ErrorLocation;

use std::any::Any;
use std::panic::{AssertUnwindSafe, Location, catch_unwind};
use std::sync::Arc;

use log::{debug, error, info, warn};

/// Behaviour switches for a [`Dispatcher`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOptions {
    /// Emit OperationSucceeded/OperationFailed for execute-code and
    /// positional-action commands, and OperationFailed for rejected reads.
    pub acknowledge_operations: bool,
}

/// Result of one handler: an event to publish, or nothing.
type HandlerResult = Result<Option<Event>, DispatchError>;

pub struct Dispatcher<E> {
    executor: E,
    outbound: Arc<OutboundQueue>,
    options: DispatchOptions,
}

impl<E: CommandExecutor> Dispatcher<E> {
    pub fn new(executor: E, outbound: Arc<OutboundQueue>, options: DispatchOptions) -> Self {
        Self {
            executor,
            outbound,
            options,
        }
    }

    /// Processes one command that has already been removed from the inbound queue.
    pub fn dispatch(&mut self, command: Command) {
        debug!(
            "Dispatcher: Processing command with ID '{}', operation_id '{}', type {}",
            command.id, command.operation_id, command.r#type
        );

        let result = match CommandType::try_from(command.r#type) {
            Ok(CommandType::ExecuteCode) => self.handle_execute_code(&command),
            Ok(CommandType::ReadVariable) => self.handle_read_variable(&command),
            Ok(CommandType::PositionalAction) => self.handle_positional_action(&command),
            Ok(CommandType::Unspecified) | Err(_) => Err(DispatchError::UnknownCommandType {
                value: command.r#type,
                command_id: command.id.clone(),
                location: ErrorLocation::from(Location::caller()),
            }),
        };

        match result {
            Ok(Some(event)) => {
                debug!(
                    "Dispatcher: Created event with ID '{}', operation_id '{}' for command ID '{}'",
                    event.id, event.operation_id, command.id
                );
                self.outbound.push(event);
            }
            Ok(None) => {}
            Err(
                e @ (DispatchError::UnknownCommandType { .. }
                | DispatchError::MissingPayload { .. }
                | DispatchError::InvalidPayload { .. }),
            ) => warn!("Dispatcher: Ignoring command: {e}"),
            Err(e) => error!("Dispatcher: {e}"),
        }
    }

    /// Pops one command from `inbound` and dispatches it.
    ///
    /// The queue lock is released before dispatching. Returns `false` if the
    /// queue was empty.
    pub fn service_one(&mut self, inbound: &InboundQueue) -> bool {
        match inbound.pop() {
            Some(command) => {
                self.dispatch(command);
                true
            }
            None => false,
        }
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn executor_mut(&mut self) -> &mut E {
        &mut self.executor
    }

    fn handle_execute_code(&mut self, command: &Command) -> HandlerResult {
        let Some(Payload::ExecuteCode(payload)) = command.payload.as_ref() else {
            return Err(missing_payload("EXECUTE_CODE", command));
        };

        if payload.code.is_empty() {
            return Err(invalid_payload("empty code", command));
        }

        let mut payload = payload.clone();
        if payload.chunk_name.is_empty() {
            payload.chunk_name = String::from(DEFAULT_CHUNK_NAME);
        }

        info!("Dispatcher: Executing code for command ID {}", command.id);
        let outcome = self.call_executor(command, |executor| executor.execute_code(&payload))?;
        self.acknowledge(command, outcome)
    }

    fn handle_read_variable(&mut self, command: &Command) -> HandlerResult {
        let Some(Payload::ReadVariable(payload)) = command.payload.as_ref() else {
            return Err(missing_payload("READ_VARIABLE", command));
        };

        if payload.variable_name.is_empty() {
            return Err(invalid_payload("empty variable name", command));
        }

        info!(
            "Dispatcher: Reading variable '{}' for command ID {}",
            payload.variable_name, command.id
        );

        match self.call_executor(command, |executor| executor.read_variable(payload))? {
            Ok(value) => Ok(Some(event_factory::variable_read_result(
                command.operation_id.as_str(),
                value,
            ))),
            Err(e) => self.reject_or_fail(command, e),
        }
    }

    fn handle_positional_action(&mut self, command: &Command) -> HandlerResult {
        let Some(Payload::PositionalAction(payload)) = command.payload.as_ref() else {
            return Err(missing_payload("POSITIONAL_ACTION", command));
        };

        if payload.target_address == 0 {
            return Err(invalid_payload("target_address is 0", command));
        }

        if payload.position.is_none() {
            return Err(invalid_payload("missing position", command));
        }

        info!(
            "Dispatcher: Performing positional action {:?} for command ID {}",
            payload.action(),
            command.id
        );
        let outcome =
            self.call_executor(command, |executor| executor.perform_positional_action(payload))?;
        self.acknowledge(command, outcome)
    }

    /// Maps the outcome of a fire-and-forget operation to an optional event.
    fn acknowledge(&self, command: &Command, outcome: Result<(), ExecutorError>) -> HandlerResult {
        match outcome {
            Ok(()) => {
                info!("Dispatcher: Command ID {} succeeded", command.id);
                Ok(self
                    .options
                    .acknowledge_operations
                    .then(|| event_factory::operation_succeeded(command.operation_id.as_str())))
            }
            Err(e) => self.reject_or_fail(command, e),
        }
    }

    /// A rejection becomes an OperationFailed event when acknowledgements are on.
    /// Everything else becomes a logged [`DispatchError::Executor`].
    fn reject_or_fail(&self, command: &Command, error: ExecutorError) -> HandlerResult {
        match error {
            ExecutorError::Rejected { reason } if self.options.acknowledge_operations => {
                warn!("Dispatcher: Command ID {} rejected: {reason}", command.id);
                Ok(Some(event_factory::operation_failed(
                    command.operation_id.as_str(),
                    reason,
                )))
            }
            other => Err(DispatchError::Executor {
                message: other.to_string(),
                command_id: command.id.clone(),
                location: ErrorLocation::from(Location::caller()),
            }),
        }
    }

    /// Runs one executor call, turning a panic into [`DispatchError::Panicked`].
    fn call_executor<T>(
        &mut self,
        command: &Command,
        call: impl FnOnce(&mut E) -> Result<T, ExecutorError>,
    ) -> Result<Result<T, ExecutorError>, DispatchError> {
        let executor = &mut self.executor;
        catch_unwind(AssertUnwindSafe(|| call(executor))).map_err(|panic| {
            DispatchError::Panicked {
                message: panic_message(panic.as_ref()),
                command_id: command.id.clone(),
                location: ErrorLocation::from(Location::caller()),
            }
        })
    }
}

#[track_caller]
fn missing_payload(command_type: &'static str, command: &Command) -> DispatchError {
    DispatchError::MissingPayload {
        command_type,
        command_id: command.id.clone(),
        location: ErrorLocation::from(Location::caller()),
    }
}

#[track_caller]
fn invalid_payload(message: &str, command: &Command) -> DispatchError {
    DispatchError::InvalidPayload {
        message: message.to_string(),
        command_id: command.id.clone(),
        location: ErrorLocation::from(Location::caller()),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        String::from("non-string panic payload")
    }
}
