/*!
 * IPC Protocol
 * One JSON object per line, tagged by "type"
 */

use kestrel_core::ConnectionSnapshot;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    ListInterfaces,
    Claim {
        interface: String,
    },
    Release {
        interface: String,
    },
    GetSnapshot {
        interface: String,
    },
    Refresh {
        interface: String,
    },
    Scan {
        interface: String,
    },
    Connect {
        interface: String,
        ssid: String,
        passphrase: String,
        #[serde(default)]
        country: Option<String>,
        #[serde(default)]
        hidden: bool,
    },
    BringUp {
        interface: String,
    },
    Shutdown,
}

impl Request {
    /// Name for logging; request bodies may carry a passphrase.
    pub fn name(&self) -> &'static str {
        match self {
            Request::ListInterfaces => "ListInterfaces",
            Request::Claim { .. } => "Claim",
            Request::Release { .. } => "Release",
            Request::GetSnapshot { .. } => "GetSnapshot",
            Request::Refresh { .. } => "Refresh",
            Request::Scan { .. } => "Scan",
            Request::Connect { .. } => "Connect",
            Request::BringUp { .. } => "BringUp",
            Request::Shutdown => "Shutdown",
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Response {
    Interfaces {
        discovered: Vec<String>,
        leased: Vec<String>,
    },
    Claimed {
        interface: String,
        holder: Uuid,
    },
    Released {
        interface: String,
    },
    Snapshot {
        interface: String,
        snapshot: ConnectionSnapshot,
    },
    ScanResult {
        interface: String,
        networks: BTreeMap<String, f64>,
    },
    Connected {
        interface: String,
        snapshot: ConnectionSnapshot,
    },
    Ack {
        message: String,
    },
    Error {
        kind: String,
        message: String,
    },
}

impl Response {
    pub fn error(kind: &str, message: impl Into<String>) -> Self {
        Response::Error {
            kind: kind.to_string(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_request_defaults_optional_fields() {
        let raw = r#"{"type":"Connect","interface":"wlan0","ssid":"home","passphrase":"hunter22"}"#;
        match serde_json::from_str::<Request>(raw).unwrap() {
            Request::Connect { country, hidden, .. } => {
                assert_eq!(country, None);
                assert!(!hidden);
            }
            other => panic!("unexpected request {}", other.name()),
        }
    }

    #[test]
    fn unit_requests_are_bare_tags() {
        let json = serde_json::to_string(&Request::ListInterfaces).unwrap();
        assert_eq!(json, r#"{"type":"ListInterfaces"}"#);
    }

    #[test]
    fn error_response_shape() {
        let json = serde_json::to_value(Response::error("NotFound", "no such interface")).unwrap();
        assert_eq!(json["type"], "Error");
        assert_eq!(json["kind"], "NotFound");
    }
}
