mod dispatcher;
mod event_factory;

use crate::dispatch::CommandExecutor;
use crate::error::dispatch::ExecutorError;
use crate::proto::{ExecuteCodePayload, PositionalActionPayload, ReadVariablePayload};

/// What a [`ScriptedExecutor`] call does.
#[derive(Clone)]
pub(super) enum Outcome<T> {
    Return(T),
    Fail(ExecutorError),
    Panic,
}

/// Executor returning preset outcomes and recording every call.
pub(super) struct ScriptedExecutor {
    pub execute: Outcome<()>,
    pub read: Outcome<String>,
    pub positional: Outcome<()>,
    pub executed: Vec<ExecuteCodePayload>,
    pub reads: Vec<String>,
    pub actions: Vec<PositionalActionPayload>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self {
            execute: Outcome::Return(()),
            read: Outcome::Return(String::new()),
            positional: Outcome::Return(()),
            executed: Vec::new(),
            reads: Vec::new(),
            actions: Vec::new(),
        }
    }

    pub fn calls(&self) -> usize {
        self.executed.len() + self.reads.len() + self.actions.len()
    }
}

fn resolve<T: Clone>(outcome: &Outcome<T>) -> Result<T, ExecutorError> {
    match outcome {
        Outcome::Return(value) => Ok(value.clone()),
        Outcome::Fail(error) => Err(error.clone()),
        Outcome::Panic => panic!("scripted executor panic"),
    }
}

impl CommandExecutor for ScriptedExecutor {
    fn execute_code(&mut self, payload: &ExecuteCodePayload) -> Result<(), ExecutorError> {
        self.executed.push(payload.clone());
        resolve(&self.execute)
    }

    fn read_variable(&mut self, payload: &ReadVariablePayload) -> Result<String, ExecutorError> {
        self.reads.push(payload.variable_name.clone());
        resolve(&self.read)
    }

    fn perform_positional_action(
        &mut self,
        payload: &PositionalActionPayload,
    ) -> Result<(), ExecutorError> {
        self.actions.push(payload.clone());
        resolve(&self.positional)
    }
}
