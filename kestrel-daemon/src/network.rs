/*!
 * Wireless Interface Management
 * Claimed stations keyed by interface name
 */

use kestrel_core::{
    ConnectError, ConnectRequest, ConnectionController, ConnectionSnapshot, HostBackend,
    InterfaceRegistry, RegistryError, ScanResult, SharedSnapshot, Station, WifiSettings,
};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("interface {0} is not claimed")]
    NotClaimed(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Connect(#[from] ConnectError),
}

impl ManagerError {
    pub fn kind(&self) -> &'static str {
        match self {
            ManagerError::NotClaimed(_) => "NotClaimed",
            ManagerError::Registry(e) => e.kind(),
            ManagerError::Connect(e) => e.kind(),
        }
    }
}

/// A claimed station plus a lock-free view of its last snapshot.
#[derive(Clone)]
struct Claimed {
    station: Arc<Mutex<Station>>,
    snapshot: SharedSnapshot,
}

pub struct NetworkManager {
    registry: InterfaceRegistry,
    controller: Arc<ConnectionController>,
    default_country: String,
    stations: RwLock<HashMap<String, Claimed>>,
}

impl NetworkManager {
    pub fn new(backend: HostBackend, settings: &WifiSettings) -> Self {
        let controller = ConnectionController::from_settings(
            backend.runner.clone(),
            backend.probe.clone(),
            settings,
        );
        Self::with_controller(InterfaceRegistry::new(backend.runner), controller, settings)
    }

    pub fn with_controller(
        registry: InterfaceRegistry,
        controller: ConnectionController,
        settings: &WifiSettings,
    ) -> Self {
        Self {
            registry,
            controller: Arc::new(controller),
            default_country: settings.default_country.clone(),
            stations: RwLock::new(HashMap::new()),
        }
    }

    pub async fn interfaces(&self) -> (Vec<String>, Vec<String>) {
        let discovered = self
            .registry
            .discover()
            .await
            .iter()
            .map(|n| n.to_string())
            .collect();
        let leased = self.registry.leased().iter().map(|n| n.to_string()).collect();
        (discovered, leased)
    }

    pub async fn claim(&self, interface: &str) -> Result<Uuid, ManagerError> {
        let lease = self.registry.acquire(interface).await?;
        let holder = lease.holder();
        let station = Station::new(lease, self.controller.clone());
        let claimed = Claimed {
            snapshot: station.shared_snapshot(),
            station: Arc::new(Mutex::new(station)),
        };
        self.stations.write().await.insert(interface.to_string(), claimed);
        tracing::info!("Interface {} claimed", interface);
        Ok(holder)
    }

    pub async fn release(&self, interface: &str) -> Result<(), ManagerError> {
        let claimed = self
            .stations
            .write()
            .await
            .remove(interface)
            .ok_or_else(|| ManagerError::NotClaimed(interface.to_string()))?;

        // waits for any attempt in flight on this interface
        let station = claimed.station.lock().await;
        station.lease().release();
        tracing::info!("Interface {} released", station.name());
        Ok(())
    }

    /// Last stored snapshot. Does not wait for an attempt in flight.
    pub async fn snapshot(&self, interface: &str) -> Result<ConnectionSnapshot, ManagerError> {
        let claimed = self.claimed(interface).await?;
        Ok(claimed.snapshot.get().await)
    }

    pub async fn refresh(&self, interface: &str) -> Result<ConnectionSnapshot, ManagerError> {
        let station = self.station(interface).await?;
        let mut station = station.lock().await;
        Ok(station.refresh().await)
    }

    pub async fn scan(&self, interface: &str) -> Result<ScanResult, ManagerError> {
        let station = self.station(interface).await?;
        let mut station = station.lock().await;
        Ok(station.scan().await?.clone())
    }

    pub async fn connect(
        &self,
        interface: &str,
        ssid: String,
        passphrase: String,
        country: Option<String>,
        hidden: bool,
    ) -> Result<ConnectionSnapshot, ManagerError> {
        let request = ConnectRequest::new(ssid, passphrase)
            .country(country.unwrap_or_else(|| self.default_country.clone()))
            .hidden(hidden);

        let station = self.station(interface).await?;
        let mut station = station.lock().await;
        Ok(station.connect(&request).await?)
    }

    pub async fn bring_up(&self, interface: &str) -> Result<bool, ManagerError> {
        let station = self.station(interface).await?;
        let mut station = station.lock().await;
        Ok(station.bring_up().await)
    }

    /// Releases every claimed interface.
    pub async fn shutdown(&self) {
        let stations: Vec<_> = self.stations.write().await.drain().collect();
        for (name, claimed) in stations {
            claimed.station.lock().await.lease().release();
            tracing::info!("Released {} on shutdown", name);
        }
    }

    async fn claimed(&self, interface: &str) -> Result<Claimed, ManagerError> {
        self.stations
            .read()
            .await
            .get(interface)
            .cloned()
            .ok_or_else(|| ManagerError::NotClaimed(interface.to_string()))
    }

    async fn station(&self, interface: &str) -> Result<Arc<Mutex<Station>>, ManagerError> {
        Ok(self.claimed(interface).await?.station)
    }
}
