/*!
 * KESTREL Core
 * Wireless interface leasing, status probing and connection control
 * Onyx Digital Intelligence Development LLC
 */

pub mod command;
pub mod config;
pub mod controller;
pub mod error;
pub mod probe;
pub mod registry;
pub mod station;
pub mod status;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use command::{CommandOutput, CommandRunner, ScriptRunner};
pub use config::WifiSettings;
pub use controller::{
    ConfirmPolicy, ConnectOutcome, ConnectRequest, ConnectState, ConnectionController,
    CONFIRM_ATTEMPTS, CONFIRM_DELAY,
};
pub use error::{CommandError, ConnectError, PlatformError, RegistryError};
pub use probe::{host_backend, HostBackend, LinuxStatusProbe, StatusProbe};
pub use registry::{InterfaceLease, InterfaceName, InterfaceRegistry};
pub use station::{SharedSnapshot, Station};
pub use status::{ConnectionSnapshot, InterfaceStatus, LinkInfo, NetworkStatus, ScanResult};
