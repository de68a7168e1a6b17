/*!
 * Error Taxonomy
 * Registry, runner and controller failures
 */

use std::time::Duration;
use thiserror::Error;

/// Failure to execute a platform command at all.
///
/// A command that runs and writes to its error stream is not a
/// `CommandError`; that outcome is carried by [`crate::CommandOutput`].
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("command '{command}' not found at {path}")]
    MissingBinary { command: String, path: String },

    #[error("command '{command}' timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("'{0}' is not a valid interface name")]
    InvalidName(String),

    #[error("interface {0} was not found on this host")]
    NotFound(String),

    #[error("interface {0} is already taken")]
    AlreadyTaken(String),

    #[error("lease on {0} has been released")]
    Released(String),
}

/// Terminal failure of a connection attempt.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConnectError {
    #[error("invalid connect request: {0}")]
    InvalidRequest(String),

    #[error("interface {interface} is down and could not be brought up")]
    InterfaceDown { interface: String },

    #[error("scan failed: {reason}")]
    ScanError { reason: String },

    #[error("could not build supplicant configuration: {reason}")]
    ConfigError { reason: String },

    #[error("no network confirmation after {attempts} attempts")]
    ConnectTimeout { attempts: u32 },

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl ConnectError {
    /// Stable machine-readable name, used on the IPC surface.
    pub fn kind(&self) -> &'static str {
        match self {
            ConnectError::InvalidRequest(_) => "InvalidRequest",
            ConnectError::InterfaceDown { .. } => "InterfaceDown",
            ConnectError::ScanError { .. } => "ScanError",
            ConnectError::ConfigError { .. } => "ConfigError",
            ConnectError::ConnectTimeout { .. } => "ConnectTimeout",
            ConnectError::Registry(e) => e.kind(),
        }
    }
}

impl RegistryError {
    pub fn kind(&self) -> &'static str {
        match self {
            RegistryError::InvalidName(_) => "InvalidName",
            RegistryError::NotFound(_) => "NotFound",
            RegistryError::AlreadyTaken(_) => "AlreadyTaken",
            RegistryError::Released(_) => "Released",
        }
    }
}

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("no wifi backend for platform '{0}'")]
    Unsupported(String),
}
