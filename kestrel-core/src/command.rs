/*!
 * Platform Command Boundary
 * Logical command names in, raw output streams out
 */

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;

use crate::error::CommandError;

/// Logical names of the platform scripts.
pub mod names {
    pub const GET_INTERFACES: &str = "get_interfaces";
    pub const STATUS: &str = "status";
    pub const NETWORK: &str = "network";
    pub const IW_LINK: &str = "iw_link";
    pub const SET: &str = "set";
    pub const SCAN: &str = "iw_scan";
    pub const WPA_PASSPHRASE: &str = "wpa_passphrase";
    pub const WPA_SUPPLICANT: &str = "wpa_supplicant";
    pub const RESET: &str = "reset";
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_failed: bool,
}

impl CommandOutput {
    pub fn stdout(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// A non-empty error stream marks the run as failed, whatever the
    /// exit code said. The platform scripts rely on this convention.
    pub fn failed(&self) -> bool {
        !self.stderr.is_empty()
    }
}

/// Executes a platform command by logical name.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &str, args: &[String]) -> Result<CommandOutput, CommandError>;
}

/// Runs `<shell> <script_dir>/<command> args...`.
pub struct ScriptRunner {
    shell: String,
    script_dir: PathBuf,
    timeout: Duration,
}

impl ScriptRunner {
    pub fn new(script_dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            shell: "bash".to_string(),
            script_dir: script_dir.into(),
            timeout,
        }
    }
}

#[async_trait]
impl CommandRunner for ScriptRunner {
    async fn run(&self, command: &str, args: &[String]) -> Result<CommandOutput, CommandError> {
        let script = self.script_dir.join(command);
        if !script.is_file() {
            return Err(CommandError::MissingBinary {
                command: command.to_string(),
                path: script.display().to_string(),
            });
        }

        tracing::debug!("running {} with {} args", command, args.len());

        let child = Command::new(&self.shell)
            .arg(&script)
            .args(args)
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, child).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CommandError::MissingBinary {
                    command: command.to_string(),
                    path: self.shell.clone(),
                });
            }
            Ok(Err(e)) => {
                return Err(CommandError::Spawn {
                    command: command.to_string(),
                    source: e,
                });
            }
            Err(_) => {
                return Err(CommandError::Timeout {
                    command: command.to_string(),
                    timeout: self.timeout,
                });
            }
        };

        Ok(CommandOutput {
            stdout: output.stdout,
            stderr: output.stderr,
            exit_failed: !output.status.success(),
        })
    }
}
