// Unit tests for event construction

use crate::dispatch::event_factory::{
    build_event, generate_event_id, operation_failed, operation_succeeded, variable_read_result,
};
use crate::proto::EventType;
use crate::proto::event::Payload;

use std::collections::HashSet;

use uuid::Uuid;

/// **VALUE**: Verifies that event ids are canonical random UUIDs.
///
/// **WHY THIS MATTERS**: Controllers store event ids as UUIDs. A non-canonical form
/// fails their parsing.
///
/// **BUG THIS CATCHES**: Would catch simple (unhyphenated) formatting or a nil UUID.
#[test]
fn given_generated_id_when_parsed_then_hyphenated_v4_uuid() {
    // GIVEN/WHEN: A fresh id
    let id = generate_event_id();

    // THEN: 36-char hyphenated v4 UUID
    assert_eq!(id.len(), 36);
    let parsed = Uuid::parse_str(&id).expect("Should parse as UUID");
    assert_eq!(parsed.get_version_num(), 4);
    assert_eq!(parsed.hyphenated().to_string(), id);
}

/// **VALUE**: Verifies there are no collisions across many generated ids.
///
/// **BUG THIS CATCHES**: Would catch a fixed seed or a cached id.
#[test]
fn given_many_generated_ids_when_collected_then_all_unique() {
    // GIVEN/WHEN: 10k ids
    let ids: HashSet<String> = (0..10_000).map(|_| generate_event_id()).collect();

    // THEN: All distinct
    assert_eq!(ids.len(), 10_000);
}

/// **VALUE**: Verifies that each builder sets type, payload and operation id consistently.
///
/// **WHY THIS MATTERS**: The controller switches on `type` and then reads the payload.
/// A mismatch between the two is a protocol error.
///
/// **BUG THIS CATCHES**: Would catch a builder tagging the wrong EventType.
#[test]
fn given_builders_when_called_then_type_matches_payload() {
    // GIVEN/WHEN: One event of each kind
    let read = variable_read_result("op-r", "value");
    let ok = operation_succeeded("op-s");
    let failed = operation_failed("op-f", "reason");

    // THEN: Types, payloads and operation ids line up
    assert_eq!(read.r#type, EventType::VariableReadResult as i32);
    assert_eq!(read.operation_id, "op-r");
    assert!(matches!(read.payload, Some(Payload::VariableReadResult(ref p)) if p.result == "value"));

    assert_eq!(ok.r#type, EventType::OperationSucceeded as i32);
    assert_eq!(ok.operation_id, "op-s");
    assert!(matches!(ok.payload, Some(Payload::OperationSucceeded(_))));

    assert_eq!(failed.r#type, EventType::OperationFailed as i32);
    assert_eq!(failed.operation_id, "op-f");
    assert!(matches!(failed.payload, Some(Payload::OperationFailed(ref p)) if p.reason == "reason"));
}

/// **VALUE**: Verifies that an empty operation id is carried through as-is.
///
/// **BUG THIS CATCHES**: Would catch substituting a generated id for an empty one.
#[test]
fn given_empty_operation_id_when_building_then_preserved() {
    // GIVEN/WHEN: An event for a command with no operation id
    let event = build_event("", EventType::OperationSucceeded, None);

    // THEN: Empty operation id, fresh event id
    assert_eq!(event.operation_id, "");
    assert!(!event.id.is_empty());
    assert!(event.payload.is_none());
}
