// Wire envelopes (package: hostlink.v1)
// Contains: Command, Event, their payloads, CommandType, EventType, Position, etc.
include!(concat!(env!("OUT_DIR"), "/hostlink.v1.rs"));
