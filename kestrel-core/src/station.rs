/*!
 * Station Session
 * A held lease together with its current snapshot and scan result
 */

use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use crate::controller::{ConnectRequest, ConnectionController};
use crate::error::ConnectError;
use crate::registry::{InterfaceLease, InterfaceName};
use crate::status::{ConnectionSnapshot, ScanResult};

/// Readable copy of a station's latest snapshot.
///
/// Reading never waits on the station itself, so a long connection attempt
/// does not block status queries.
#[derive(Clone)]
pub struct SharedSnapshot(Arc<RwLock<ConnectionSnapshot>>);

impl SharedSnapshot {
    pub async fn get(&self) -> ConnectionSnapshot {
        self.0.read().await.clone()
    }

    async fn replace(&self, snapshot: ConnectionSnapshot) {
        *self.0.write().await = snapshot;
    }
}

pub struct Station {
    lease: InterfaceLease,
    controller: Arc<ConnectionController>,
    snapshot: SharedSnapshot,
    scan: ScanResult,
}

impl Station {
    pub fn new(lease: InterfaceLease, controller: Arc<ConnectionController>) -> Self {
        Self {
            lease,
            controller,
            snapshot: SharedSnapshot(Arc::new(RwLock::new(ConnectionSnapshot::unknown()))),
            scan: ScanResult::default(),
        }
    }

    pub fn name(&self) -> &InterfaceName {
        self.lease.name()
    }

    pub fn lease(&self) -> &InterfaceLease {
        &self.lease
    }

    pub fn shared_snapshot(&self) -> SharedSnapshot {
        self.snapshot.clone()
    }

    pub async fn snapshot(&self) -> ConnectionSnapshot {
        self.snapshot.get().await
    }

    pub fn last_scan(&self) -> &ScanResult {
        &self.scan
    }

    pub async fn refresh(&mut self) -> ConnectionSnapshot {
        let snapshot = self.controller.probe().refresh(&self.lease).await;
        self.snapshot.replace(snapshot.clone()).await;
        snapshot
    }

    pub async fn scan(&mut self) -> Result<&ScanResult, ConnectError> {
        self.scan = self.controller.scan(&self.lease).await?;
        Ok(&self.scan)
    }

    /// Runs one attempt. The stored snapshot changes only if the attempt
    /// got as far as probing the interface.
    pub async fn connect(
        &mut self,
        request: &ConnectRequest,
    ) -> Result<ConnectionSnapshot, ConnectError> {
        let outcome = self.controller.connect(&self.lease, request).await;
        if let Some(scan) = outcome.scan.clone() {
            self.scan = scan;
        }
        if let Some(snapshot) = outcome.snapshot.clone() {
            self.snapshot.replace(snapshot).await;
        }
        outcome.into_result()
    }

    pub async fn bring_up(&mut self) -> bool {
        let up = self.controller.probe().bring_up(&self.lease).await;
        self.refresh().await;
        up
    }

    pub async fn bring_down(&mut self) -> bool {
        let down = self.controller.probe().bring_down(&self.lease).await;
        self.refresh().await;
        down
    }

    pub fn release(self) {
        info!("Releasing station on {}", self.name());
        self.lease.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::names;
    use crate::controller::ConfirmPolicy;
    use crate::probe::LinuxStatusProbe;
    use crate::registry::InterfaceRegistry;
    use crate::status::{InterfaceStatus, NetworkStatus};
    use crate::testing::ScriptedRunner;
    use std::time::Duration;

    async fn station() -> (Arc<ScriptedRunner>, InterfaceRegistry, Station) {
        let runner = Arc::new(ScriptedRunner::new());
        runner.ok(names::GET_INTERFACES, "wlan0\n");
        let registry = InterfaceRegistry::new(runner.clone());
        let lease = registry.acquire("wlan0").await.unwrap();
        let probe = Arc::new(LinuxStatusProbe::new(runner.clone(), Duration::ZERO));
        let controller =
            ConnectionController::new(runner.clone(), probe).with_policy(ConfirmPolicy {
                attempts: 2,
                delay: Duration::ZERO,
            });
        (runner, registry, Station::new(lease, Arc::new(controller)))
    }

    #[tokio::test]
    async fn snapshot_starts_unknown_and_is_replaced() {
        let (runner, _registry, mut station) = station().await;
        assert_eq!(station.snapshot().await.interface_status(), InterfaceStatus::Unknown);

        runner
            .ok(names::STATUS, "0x1003\n")
            .ok(names::NETWORK, "wlan0: up\n")
            .ok(names::NETWORK, "wlan0: dormant\n")
            .ok(names::IW_LINK, "SSID: cafe\nfreq: 2437\n");
        station.refresh().await;
        assert_eq!(station.snapshot().await.ssid(), Some("cafe"));

        let snap = station.refresh().await;
        assert_eq!(snap.network_status(), NetworkStatus::Offline);
        assert!(snap.ssid().is_none());
    }

    #[tokio::test]
    async fn scan_replaces_previous_result() {
        let (runner, _registry, mut station) = station().await;
        runner
            .ok(names::SCAN, "freq: 2412\nSSID: alpha\n")
            .ok(names::SCAN, "freq: 5180\nSSID: beta\n");

        assert!(station.scan().await.unwrap().contains("alpha"));
        let second = station.scan().await.unwrap();
        assert!(second.contains("beta"));
        assert!(!second.contains("alpha"));
    }

    #[tokio::test]
    async fn failed_scan_keeps_error() {
        let (runner, _registry, mut station) = station().await;
        runner.fail(names::SCAN, "device busy");
        assert!(matches!(
            station.scan().await,
            Err(ConnectError::ScanError { .. })
        ));
    }

    #[tokio::test]
    async fn connect_failure_updates_snapshot() {
        let (runner, _registry, mut station) = station().await;
        runner
            .ok(names::STATUS, "0x1003\n")
            .ok(names::NETWORK, "wlan0: dormant\n")
            .ok(names::SCAN, "freq: 2412\nSSID: alpha\n")
            .ok(names::WPA_PASSPHRASE, "network={\n\tssid=\"alpha\"\n\t#psk=\"pw\"\n\tpsk=00\n}\n")
            .ok(names::WPA_SUPPLICANT, "");

        let err = station
            .connect(&ConnectRequest::new("alpha", "password1"))
            .await
            .unwrap_err();
        assert_eq!(err, ConnectError::ConnectTimeout { attempts: 2 });
        assert_eq!(station.snapshot().await.network_status(), NetworkStatus::Offline);
        assert!(station.last_scan().contains("alpha"));
    }

    #[tokio::test]
    async fn bring_down_refreshes_snapshot() {
        let (runner, _registry, mut station) = station().await;
        runner
            .ok(names::SET, "")
            .ok(names::STATUS, "0x1002\n")
            .ok(names::NETWORK, "wlan0: down\n");

        assert!(station.bring_down().await);
        assert_eq!(station.snapshot().await.interface_status(), InterfaceStatus::Offline);
        let set_call = runner.calls().into_iter().find(|c| c.command == names::SET).unwrap();
        assert_eq!(set_call.args, vec!["wlan0".to_string(), "down".to_string()]);
    }

    #[tokio::test]
    async fn rejected_request_keeps_last_snapshot() {
        let (runner, _registry, mut station) = station().await;
        runner
            .ok(names::STATUS, "0x1003\n")
            .ok(names::NETWORK, "wlan0: up\n")
            .ok(names::IW_LINK, "SSID: cafe\nfreq: 2437\n");
        station.refresh().await;
        let before = runner.calls().len();

        let err = station.connect(&ConnectRequest::new("", "pw")).await.unwrap_err();
        assert!(matches!(err, ConnectError::InvalidRequest(_)));
        assert_eq!(runner.calls().len(), before);

        let snap = station.snapshot().await;
        assert_eq!(snap.interface_status(), InterfaceStatus::Online);
        assert_eq!(snap.ssid(), Some("cafe"));
    }

    #[tokio::test]
    async fn shared_snapshot_follows_refresh() {
        let (runner, _registry, mut station) = station().await;
        let shared = station.shared_snapshot();
        runner
            .ok(names::STATUS, "0x1002\n")
            .ok(names::NETWORK, "wlan0: down\n");

        station.refresh().await;
        assert_eq!(shared.get().await.interface_status(), InterfaceStatus::Offline);
    }

    #[tokio::test]
    async fn release_returns_interface() {
        let (_runner, registry, station) = station().await;
        assert!(registry.is_leased("wlan0"));
        station.release();
        assert!(!registry.is_leased("wlan0"));
        assert!(registry.acquire("wlan0").await.is_ok());
    }
}
