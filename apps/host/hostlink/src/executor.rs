//! In-process [`CommandExecutor`] used when the host runs stand-alone.
//!
//! It stands in for a scripting runtime with a flat variable table:
//!
//! - EXECUTE_CODE accepts one `name = value` assignment per line. Blank lines and
//!   `--` comments are skipped. A chunk is applied only if every line parses.
//! - READ_VARIABLE returns the stored value, or an empty string if unset.
//! - POSITIONAL_ACTION records the last action per target.

use agent_core::dispatch::CommandExecutor;
use agent_core::error::dispatch::ExecutorError;
use agent_core::proto::{
    ExecuteCodePayload, Position, PositionalActionKind, PositionalActionPayload,
    ReadVariablePayload,
};

use std::collections::HashMap;

use log::debug;

const COMMENT_PREFIX: &str = "--";

/// The last positional action performed on a target.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedAction {
    pub action: PositionalActionKind,
    pub position: Position,
    pub precision: f32,
}

#[derive(Debug, Default)]
pub struct LoopbackExecutor {
    variables: HashMap<String, String>,
    actions: HashMap<u64, RecordedAction>,
}

impl LoopbackExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn variable(&self, name: &str) -> Option<&str> {
        self.variables.get(name).map(String::as_str)
    }

    pub fn last_action(&self, target_address: u64) -> Option<&RecordedAction> {
        self.actions.get(&target_address)
    }
}

impl CommandExecutor for LoopbackExecutor {
    fn execute_code(&mut self, payload: &ExecuteCodePayload) -> Result<(), ExecutorError> {
        let assignments = parse_chunk(&payload.code, &payload.chunk_name)?;

        for (name, value) in assignments {
            debug!("Loopback: {name} = {value:?}");
            self.variables.insert(name, value);
        }
        Ok(())
    }

    fn read_variable(&mut self, payload: &ReadVariablePayload) -> Result<String, ExecutorError> {
        Ok(self
            .variables
            .get(&payload.variable_name)
            .cloned()
            .unwrap_or_default())
    }

    fn perform_positional_action(
        &mut self,
        payload: &PositionalActionPayload,
    ) -> Result<(), ExecutorError> {
        let action = payload.action();
        if action == PositionalActionKind::Unspecified {
            return Err(ExecutorError::rejected("action kind is unspecified"));
        }

        // Validated upstream; a missing position here is a caller bug
        let Some(position) = payload.position.clone() else {
            return Err(ExecutorError::fault("positional action without position"));
        };

        self.actions.insert(
            payload.target_address,
            RecordedAction {
                action,
                position,
                precision: payload.precision,
            },
        );
        Ok(())
    }
}

/// Parses every line of `code` before anything is applied.
fn parse_chunk(code: &str, chunk_name: &str) -> Result<Vec<(String, String)>, ExecutorError> {
    let mut assignments = Vec::new();

    for (index, line) in code.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with(COMMENT_PREFIX) {
            continue;
        }

        let parsed = line
            .split_once('=')
            .map(|(name, value)| (name.trim(), unquote(value.trim())))
            .filter(|(name, _)| is_identifier(name));

        match parsed {
            Some((name, value)) => assignments.push((name.to_string(), value.to_string())),
            None => {
                return Err(ExecutorError::rejected(format!(
                    "{chunk_name}:{}: expected `name = value`, got `{line}`",
                    index + 1
                )));
            }
        }
    }

    Ok(assignments)
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn unquote(value: &str) -> &str {
    ['"', '\'']
        .iter()
        .find_map(|quote| {
            value
                .strip_prefix(*quote)
                .and_then(|rest| rest.strip_suffix(*quote))
        })
        .unwrap_or(value)
}
