use common::ErrorLocation;

use thiserror::Error as ThisError;

/// Reason a command produced no event.
///
/// Built and logged inside the dispatcher; it never leaves `dispatch`.
#[derive(Debug, ThisError)]
pub enum DispatchError {
    #[error("Unknown Command Type Error: {value} for command {command_id} {location}")]
    UnknownCommandType {
        value: i32,
        command_id: String,
        location: ErrorLocation,
    },

    #[error("Missing Payload Error: {command_type} command {command_id} {location}")]
    MissingPayload {
        command_type: &'static str,
        command_id: String,
        location: ErrorLocation,
    },

    #[error("Invalid Payload Error: {message} for command {command_id} {location}")]
    InvalidPayload {
        message: String,
        command_id: String,
        location: ErrorLocation,
    },

    #[error("Executor Error: {message} for command {command_id} {location}")]
    Executor {
        message: String,
        command_id: String,
        location: ErrorLocation,
    },

    #[error("Handler Panicked Error: {message} for command {command_id} {location}")]
    Panicked {
        message: String,
        command_id: String,
        location: ErrorLocation,
    },
}

/// Failure reported by a [`CommandExecutor`](crate::dispatch::CommandExecutor).
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum ExecutorError {
    /// The action ran and the execution context reported failure.
    #[error("Rejected: {reason}")]
    Rejected { reason: String },

    /// The action could not complete at all.
    #[error("Fault: {message}")]
    Fault { message: String },
}

impl ExecutorError {
    pub fn rejected(reason: impl Into<String>) -> Self {
        ExecutorError::Rejected {
            reason: reason.into(),
        }
    }

    pub fn fault(message: impl Into<String>) -> Self {
        ExecutorError::Fault {
            message: message.into(),
        }
    }
}
