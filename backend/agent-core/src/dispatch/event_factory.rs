//! Builders for outbound [`Event`] envelopes.
//!
//! Every event gets a fresh random (v4) UUID as its `id`. No uniqueness check is
//! performed. `operation_id` is copied from the triggering command.

use crate::proto::event::Payload;
use crate::proto::{
    Event, EventType, OperationFailedPayload, OperationSucceededPayload,
    VariableReadResultPayload,
};

use uuid::Uuid;

/// Generates a new event identifier in canonical hyphenated form.
pub fn generate_event_id() -> String {
    Uuid::new_v4().to_string()
}

/// Builds a complete event with a fresh id.
pub fn build_event(
    operation_id: impl Into<String>,
    event_type: EventType,
    payload: Option<Payload>,
) -> Event {
    Event {
        id: generate_event_id(),
        operation_id: operation_id.into(),
        r#type: event_type as i32,
        payload,
    }
}

pub fn variable_read_result(operation_id: impl Into<String>, result: impl Into<String>) -> Event {
    build_event(
        operation_id,
        EventType::VariableReadResult,
        Some(Payload::VariableReadResult(VariableReadResultPayload {
            result: result.into(),
        })),
    )
}

pub fn operation_succeeded(operation_id: impl Into<String>) -> Event {
    build_event(
        operation_id,
        EventType::OperationSucceeded,
        Some(Payload::OperationSucceeded(OperationSucceededPayload {})),
    )
}

pub fn operation_failed(operation_id: impl Into<String>, reason: impl Into<String>) -> Event {
    build_event(
        operation_id,
        EventType::OperationFailed,
        Some(Payload::OperationFailed(OperationFailedPayload {
            reason: reason.into(),
        })),
    )
}
