use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use crate::hal::traits::ToolRunner;

/// Tool runner answering from canned outputs.
///
/// Commands are keyed by the program followed by its arguments, joined with single spaces.
/// Anything not scripted behaves like a failed invocation.
#[derive(Default)]
pub struct ScriptedToolRunner {
    outputs: Mutex<HashMap<String, String>>,
    files: Mutex<HashMap<String, String>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedToolRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output(self, command: &str, stdout: &str) -> Self {
        self.set_output(command, stdout);
        self
    }

    pub fn with_file(self, path: &str, contents: &str) -> Self {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_string(), contents.to_string());
        self
    }

    pub fn set_output(&self, command: &str, stdout: &str) {
        self.outputs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(command.to_string(), stdout.to_string());
    }

    pub fn remove_output(&self, command: &str) {
        self.outputs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(command);
    }

    /// Every command run so far, in order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl ToolRunner for ScriptedToolRunner {
    async fn run(&self, program: &str, args: &[&str]) -> Option<String> {
        let mut command = program.to_string();
        for arg in args {
            command.push(' ');
            command.push_str(arg);
        }
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(command.clone());
        self.outputs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&command)
            .cloned()
    }

    async fn read_file(&self, path: &str) -> Option<String> {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
    }
}
