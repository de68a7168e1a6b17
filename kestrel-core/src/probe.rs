/*!
 * Status Probing
 * Administrative and network status for a leased interface
 */

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::command::{names, CommandRunner, ScriptRunner};
use crate::config::WifiSettings;
use crate::error::PlatformError;
use crate::registry::InterfaceLease;
use crate::status::{
    parse_device_states, parse_interface_status, parse_link_info, ConnectionSnapshot,
    InterfaceStatus, LinkInfo, NetworkStatus,
};

/// Read-only status derivation plus the link up/down switch.
///
/// Probe failures never surface as errors; they become `Unknown`.
#[async_trait]
pub trait StatusProbe: Send + Sync {
    async fn interface_status(&self, lease: &InterfaceLease) -> InterfaceStatus;

    async fn network_status(&self, lease: &InterfaceLease) -> (NetworkStatus, Option<LinkInfo>);

    /// Sets the link up or down and reports whether the command was accepted.
    async fn set_link(&self, lease: &InterfaceLease, up: bool) -> bool;

    /// Resets every wireless interface on the host.
    async fn reset_all(&self) -> bool;

    fn settle_delay(&self) -> Duration {
        Duration::ZERO
    }

    async fn refresh(&self, lease: &InterfaceLease) -> ConnectionSnapshot {
        if !lease.is_live() {
            warn!("Refresh requested on released lease for {}", lease.name());
            return ConnectionSnapshot::unknown();
        }

        let interface = self.interface_status(lease).await;
        match self.network_status(lease).await {
            (NetworkStatus::Online, Some(link)) => ConnectionSnapshot::connected(interface, link),
            (network, _) => ConnectionSnapshot::disconnected(interface, network),
        }
    }

    /// Returns true only if the interface probes `Online` afterwards.
    async fn bring_up(&self, lease: &InterfaceLease) -> bool {
        if !self.set_link(lease, true).await {
            warn!("Set-up command for {} reported an error", lease.name());
        }
        tokio::time::sleep(self.settle_delay()).await;
        self.interface_status(lease).await == InterfaceStatus::Online
    }

    async fn bring_down(&self, lease: &InterfaceLease) -> bool {
        self.set_link(lease, false).await;
        tokio::time::sleep(self.settle_delay()).await;
        self.interface_status(lease).await == InterfaceStatus::Offline
    }
}

/// Probe backed by the Linux script set (`ip`, `iw`, sysfs flags).
pub struct LinuxStatusProbe {
    runner: Arc<dyn CommandRunner>,
    settle_delay: Duration,
}

impl LinuxStatusProbe {
    pub fn new(runner: Arc<dyn CommandRunner>, settle_delay: Duration) -> Self {
        Self {
            runner,
            settle_delay,
        }
    }

    async fn link_info(&self, lease: &InterfaceLease) -> Option<LinkInfo> {
        let args = [lease.name().to_string()];
        match self.runner.run(names::IW_LINK, &args).await {
            Ok(output) if !output.failed() => {
                let link = parse_link_info(&output.stdout());
                if link.is_none() {
                    warn!("Could not parse link info for {}: {:?}", lease.name(), output.stdout());
                }
                link
            }
            Ok(output) => {
                error!("Link info for {} failed: {}", lease.name(), output.stderr().trim());
                None
            }
            Err(e) => {
                error!("Link info for {} unavailable: {}", lease.name(), e);
                None
            }
        }
    }
}

#[async_trait]
impl StatusProbe for LinuxStatusProbe {
    async fn interface_status(&self, lease: &InterfaceLease) -> InterfaceStatus {
        info!("Checking interface {} status", lease.name());
        let args = [lease.name().to_string()];
        let output = match self.runner.run(names::STATUS, &args).await {
            Ok(output) => output,
            Err(e) => {
                error!("Interface {} status is unknown: {}", lease.name(), e);
                return InterfaceStatus::Unknown;
            }
        };

        let status = parse_interface_status(&output);
        match status {
            InterfaceStatus::Online => info!("Interface {} is set to 'up'", lease.name()),
            InterfaceStatus::Offline => warn!("Interface {} is set to 'down'", lease.name()),
            InterfaceStatus::Unknown => error!(
                "Interface {} status is unknown: {}",
                lease.name(),
                output.stderr().trim()
            ),
        }
        status
    }

    async fn network_status(&self, lease: &InterfaceLease) -> (NetworkStatus, Option<LinkInfo>) {
        info!("Checking interface {} network connections", lease.name());
        let output = match self.runner.run(names::NETWORK, &[]).await {
            Ok(output) if !output.failed() => output,
            Ok(output) => {
                error!("Device listing failed: {}", output.stderr().trim());
                return (NetworkStatus::Unknown, None);
            }
            Err(e) => {
                error!("Device listing unavailable: {}", e);
                return (NetworkStatus::Unknown, None);
            }
        };

        let states = parse_device_states(&output.stdout());
        debug!("Device states: {:?}", states);

        match states.get(lease.name().as_str()).map(String::as_str) {
            None => {
                error!("Interface {} network status is unknown", lease.name());
                (NetworkStatus::Unknown, None)
            }
            Some("up") => match self.link_info(lease).await {
                Some(link) => {
                    info!(
                        "Interface {} is connected to {} at {} GHz",
                        lease.name(),
                        link.ssid,
                        link.frequency_ghz
                    );
                    (NetworkStatus::Online, Some(link))
                }
                None => (NetworkStatus::Unknown, None),
            },
            Some(_) => {
                warn!("Interface {} is not connected to a network", lease.name());
                (NetworkStatus::Offline, None)
            }
        }
    }

    async fn set_link(&self, lease: &InterfaceLease, up: bool) -> bool {
        let setting = if up { "up" } else { "down" };
        debug!("Setting interface {} to {}", lease.name(), setting);
        let args = [lease.name().to_string(), setting.to_string()];
        match self.runner.run(names::SET, &args).await {
            Ok(output) => !output.failed(),
            Err(e) => {
                error!("Could not set {} {}: {}", lease.name(), setting, e);
                false
            }
        }
    }

    async fn reset_all(&self) -> bool {
        warn!("Resetting all wireless interfaces");
        match self.runner.run(names::RESET, &[]).await {
            Ok(output) => !output.failed(),
            Err(e) => {
                error!("Interface reset unavailable: {}", e);
                false
            }
        }
    }

    fn settle_delay(&self) -> Duration {
        self.settle_delay
    }
}

/// Runner and probe for the host platform, chosen once at startup.
#[derive(Clone)]
pub struct HostBackend {
    pub runner: Arc<dyn CommandRunner>,
    pub probe: Arc<dyn StatusProbe>,
}

pub fn host_backend(settings: &WifiSettings) -> Result<HostBackend, PlatformError> {
    backend_for(std::env::consts::OS, settings)
}

pub fn backend_for(platform: &str, settings: &WifiSettings) -> Result<HostBackend, PlatformError> {
    match platform {
        "linux" => {
            let runner: Arc<dyn CommandRunner> = Arc::new(ScriptRunner::new(
                settings.platform_script_dir(platform),
                settings.command_timeout(),
            ));
            let probe = Arc::new(LinuxStatusProbe::new(runner.clone(), settings.settle_delay()));
            Ok(HostBackend { runner, probe })
        }
        other => Err(PlatformError::Unsupported(other.to_string())),
    }
}
