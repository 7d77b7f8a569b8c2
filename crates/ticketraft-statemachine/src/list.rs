//! Command list

use crate::command::Command;
use crate::machine::StateMachine;

/// Keeps every applied command in order. Always valid.
#[derive(Clone, Debug, Default)]
pub struct CommandList {
    commands: Vec<Command>,
}

impl CommandList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

impl StateMachine for CommandList {
    type State = Vec<Command>;

    fn apply(&mut self, command: &Command) {
        self.commands.push(command.clone());
    }

    fn state(&self) -> Vec<Command> {
        self.commands.clone()
    }

    fn reset(&mut self) {
        self.commands.clear();
    }

    fn fork(&self) -> Self {
        self.clone()
    }

    fn is_state_valid(&self) -> bool {
        true
    }
}
