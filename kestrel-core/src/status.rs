/*!
 * Interface and Network Status
 * Typed statuses, snapshots and the parsers that produce them
 */

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::command::CommandOutput;

/// Flags value the status script prints for an interface that is up.
pub const INTERFACE_UP_SENTINEL: &str = "0x1003";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterfaceStatus {
    Online,
    Offline,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkStatus {
    Online,
    Offline,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkInfo {
    pub ssid: String,
    pub frequency_ghz: f64,
}

/// Immutable status record for one interface.
///
/// The network is `Online` exactly when link details are present. The
/// constructors and the checked deserializer are the only ways to build one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawSnapshot")]
pub struct ConnectionSnapshot {
    interface_status: InterfaceStatus,
    network_status: NetworkStatus,
    link: Option<LinkInfo>,
    taken_at: DateTime<Utc>,
}

impl ConnectionSnapshot {
    pub fn unknown() -> Self {
        Self::disconnected(InterfaceStatus::Unknown, NetworkStatus::Unknown)
    }

    /// Snapshot without an association. An `Online` network status is
    /// downgraded to `Unknown` since there is no link to report.
    pub fn disconnected(interface_status: InterfaceStatus, network_status: NetworkStatus) -> Self {
        let network_status = match network_status {
            NetworkStatus::Online => NetworkStatus::Unknown,
            other => other,
        };
        Self {
            interface_status,
            network_status,
            link: None,
            taken_at: Utc::now(),
        }
    }

    pub fn connected(interface_status: InterfaceStatus, link: LinkInfo) -> Self {
        Self {
            interface_status,
            network_status: NetworkStatus::Online,
            link: Some(link),
            taken_at: Utc::now(),
        }
    }

    pub fn interface_status(&self) -> InterfaceStatus {
        self.interface_status
    }

    pub fn network_status(&self) -> NetworkStatus {
        self.network_status
    }

    pub fn ssid(&self) -> Option<&str> {
        self.link.as_ref().map(|l| l.ssid.as_str())
    }

    pub fn frequency_ghz(&self) -> Option<f64> {
        self.link.as_ref().map(|l| l.frequency_ghz)
    }

    pub fn taken_at(&self) -> DateTime<Utc> {
        self.taken_at
    }

    pub fn is_connected(&self) -> bool {
        self.network_status == NetworkStatus::Online
    }
}

#[derive(Deserialize)]
struct RawSnapshot {
    interface_status: InterfaceStatus,
    network_status: NetworkStatus,
    link: Option<LinkInfo>,
    taken_at: DateTime<Utc>,
}

impl TryFrom<RawSnapshot> for ConnectionSnapshot {
    type Error = String;

    fn try_from(raw: RawSnapshot) -> Result<Self, Self::Error> {
        let online = raw.network_status == NetworkStatus::Online;
        if online != raw.link.is_some() {
            return Err(format!(
                "network status {:?} does not match link presence",
                raw.network_status
            ));
        }
        Ok(Self {
            interface_status: raw.interface_status,
            network_status: raw.network_status,
            link: raw.link,
            taken_at: raw.taken_at,
        })
    }
}

/// Networks seen by the last scan, SSID to frequency in GHz.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    networks: BTreeMap<String, f64>,
}

impl ScanResult {
    pub fn contains(&self, ssid: &str) -> bool {
        self.networks.contains_key(ssid)
    }

    pub fn frequency_ghz(&self, ssid: &str) -> Option<f64> {
        self.networks.get(ssid).copied()
    }

    pub fn len(&self) -> usize {
        self.networks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.networks.is_empty()
    }

    pub fn networks(&self) -> &BTreeMap<String, f64> {
        &self.networks
    }
}

impl FromIterator<(String, f64)> for ScanResult {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        Self {
            networks: iter.into_iter().collect(),
        }
    }
}

pub fn mhz_to_ghz(mhz: f64) -> f64 {
    mhz / 1000.0
}

/// Administrative status from the `status` script.
pub fn parse_interface_status(output: &CommandOutput) -> InterfaceStatus {
    if output.failed() {
        return InterfaceStatus::Unknown;
    }
    if output.stdout().replace('\n', "") == INTERFACE_UP_SENTINEL {
        InterfaceStatus::Online
    } else {
        InterfaceStatus::Offline
    }
}

/// `name: state` per line, split at the first colon.
pub fn parse_device_states(raw: &str) -> HashMap<String, String> {
    raw.lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let (name, state) = line.split_once(':')?;
            Some((name.trim().to_string(), state.trim().to_string()))
        })
        .collect()
}

pub fn parse_link_info(raw: &str) -> Option<LinkInfo> {
    let mut ssid = None;
    let mut freq = None;

    for line in raw.lines() {
        let line = line.trim();
        if let Some(v) = line.strip_prefix("SSID:") {
            ssid = Some(v.trim().to_string());
        } else if let Some(v) = line.strip_prefix("freq:") {
            freq = v.trim().parse::<f64>().ok();
        }
    }

    Some(LinkInfo {
        ssid: ssid.filter(|s| !s.is_empty())?,
        frequency_ghz: mhz_to_ghz(freq?),
    })
}

/// Parses `freq:`/`SSID:` line pairs from the scan script.
///
/// A frequency only attaches to the SSID line directly after it.
pub fn parse_scan_output(raw: &str) -> ScanResult {
    let mut networks = BTreeMap::new();
    let mut pending: Option<f64> = None;

    for line in raw.lines() {
        let line = line.trim();
        if let Some(v) = line.strip_prefix("freq:") {
            pending = v.trim().parse::<f64>().ok().map(mhz_to_ghz);
        } else if let Some(v) = line.strip_prefix("SSID:") {
            let ssid = v.trim();
            if let Some(freq) = pending.take() {
                if !ssid.is_empty() {
                    networks.insert(ssid.to_string(), freq);
                }
            }
        } else {
            pending = None;
        }
    }

    ScanResult { networks }
}
