//! Contract between the dispatcher and whatever performs the actual actions.
//!
//! Implementations live outside this crate (for example inside a process that
//! exposes a scripting runtime). They are called synchronously, one call at a
//! time, from within [`Dispatcher::dispatch`](crate::dispatch::Dispatcher::dispatch).

use crate::error::dispatch::ExecutorError;
use crate::proto::{ExecuteCodePayload, PositionalActionPayload, ReadVariablePayload};

/// Chunk name reported to the execution context when a command leaves it empty.
pub const DEFAULT_CHUNK_NAME: &str = "source";

/// One operation per command kind.
///
/// Payloads handed to these methods have already been validated: code and
/// variable names are non-empty, positional actions carry a position and a
/// non-zero target address.
pub trait CommandExecutor {
    /// Runs `payload.code`. Fire-and-forget: success carries no value.
    fn execute_code(&mut self, payload: &ExecuteCodePayload) -> Result<(), ExecutorError>;

    /// Reads a variable and returns its textual value.
    fn read_variable(&mut self, payload: &ReadVariablePayload) -> Result<String, ExecutorError>;

    /// Performs an action at a position. Fire-and-forget.
    fn perform_positional_action(
        &mut self,
        payload: &PositionalActionPayload,
    ) -> Result<(), ExecutorError>;
}

impl<E: CommandExecutor + ?Sized> CommandExecutor for Box<E> {
    fn execute_code(&mut self, payload: &ExecuteCodePayload) -> Result<(), ExecutorError> {
        (**self).execute_code(payload)
    }

    fn read_variable(&mut self, payload: &ReadVariablePayload) -> Result<String, ExecutorError> {
        (**self).read_variable(payload)
    }

    fn perform_positional_action(
        &mut self,
        payload: &PositionalActionPayload,
    ) -> Result<(), ExecutorError> {
        (**self).perform_positional_action(payload)
    }
}
