/*!
 * Scripted Command Runner
 * Canned platform output for tests, with a call log
 */

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::command::{CommandOutput, CommandRunner};
use crate::error::CommandError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub command: String,
    pub args: Vec<String>,
}

/// Replies are queued per command name. The last reply in a queue keeps
/// answering once everything before it has been consumed. A command with
/// no queue behaves like a missing script.
#[derive(Default)]
pub struct ScriptedRunner {
    replies: Mutex<HashMap<String, VecDeque<CommandOutput>>>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, command: &str, output: CommandOutput) -> &Self {
        self.replies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(command.to_string())
            .or_default()
            .push_back(output);
        self
    }

    pub fn ok(&self, command: &str, stdout: &str) -> &Self {
        self.push(command, stdout_only(stdout))
    }

    pub fn fail(&self, command: &str, stderr: &str) -> &Self {
        self.push(
            command,
            CommandOutput {
                stdout: Vec::new(),
                stderr: stderr.as_bytes().to_vec(),
                exit_failed: true,
            },
        )
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn count(&self, command: &str) -> usize {
        self.calls().iter().filter(|c| c.command == command).count()
    }
}

pub fn stdout_only(stdout: &str) -> CommandOutput {
    CommandOutput {
        stdout: stdout.as_bytes().to_vec(),
        stderr: Vec::new(),
        exit_failed: false,
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, command: &str, args: &[String]) -> Result<CommandOutput, CommandError> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).push(Call {
            command: command.to_string(),
            args: args.to_vec(),
        });

        let mut replies = self.replies.lock().unwrap_or_else(|e| e.into_inner());
        let queue = replies.get_mut(command).filter(|q| !q.is_empty());
        match queue {
            Some(q) if q.len() > 1 => Ok(q.pop_front().unwrap_or_default()),
            Some(q) => Ok(q.front().cloned().unwrap_or_default()),
            None => Err(CommandError::MissingBinary {
                command: command.to_string(),
                path: "<scripted>".to_string(),
            }),
        }
    }
}
