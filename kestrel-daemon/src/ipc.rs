/*!
 * IPC Server for KESTREL Daemon
 * JSON protocol over Unix socket
 */

use anyhow::Result;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Notify;

use crate::network::NetworkManager;
use crate::protocol::{Request, Response};

pub struct IpcServer {
    listener: UnixListener,
    network_manager: Arc<NetworkManager>,
    shutdown: Arc<Notify>,
}

impl IpcServer {
    pub fn new(listener: UnixListener, network_manager: Arc<NetworkManager>) -> Self {
        Self {
            listener,
            network_manager,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Handle that stops the accept loop when notified.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    pub async fn run(self) -> Result<()> {
        tracing::info!("IPC server listening for connections...");

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        tracing::debug!("New client connected");
                        let network_manager = self.network_manager.clone();
                        let shutdown = self.shutdown.clone();

                        tokio::spawn(async move {
                            if let Err(e) = handle_client(stream, network_manager, shutdown).await {
                                tracing::error!("Client error: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!("Failed to accept connection: {}", e);
                    }
                },
                _ = self.shutdown.notified() => {
                    tracing::info!("IPC server shutting down");
                    break;
                }
            }
        }

        Ok(())
    }
}

async fn handle_client(
    stream: UnixStream,
    network_manager: Arc<NetworkManager>,
    shutdown: Arc<Notify>,
) -> Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();

    while reader.read_line(&mut line).await? > 0 {
        let raw = line.trim();
        if raw.is_empty() {
            line.clear();
            continue;
        }

        let (response, stop) = match serde_json::from_str::<Request>(raw) {
            Ok(request) => {
                tracing::debug!("Received request: {}", request.name());
                let stop = matches!(request, Request::Shutdown);
                (dispatch(&network_manager, request).await, stop)
            }
            Err(e) => (Response::error("BadRequest", e.to_string()), false),
        };

        let mut payload = serde_json::to_vec(&response)?;
        payload.push(b'\n');
        write_half.write_all(&payload).await?;

        if stop {
            shutdown.notify_one();
            break;
        }
        line.clear();
    }

    Ok(())
}

pub async fn dispatch(manager: &NetworkManager, request: Request) -> Response {
    let result = match request {
        Request::ListInterfaces => {
            let (discovered, leased) = manager.interfaces().await;
            Ok(Response::Interfaces { discovered, leased })
        }
        Request::Claim { interface } => manager
            .claim(&interface)
            .await
            .map(|holder| Response::Claimed { interface, holder }),
        Request::Release { interface } => manager
            .release(&interface)
            .await
            .map(|()| Response::Released { interface }),
        Request::GetSnapshot { interface } => manager
            .snapshot(&interface)
            .await
            .map(|snapshot| Response::Snapshot { interface, snapshot }),
        Request::Refresh { interface } => manager
            .refresh(&interface)
            .await
            .map(|snapshot| Response::Snapshot { interface, snapshot }),
        Request::Scan { interface } => manager.scan(&interface).await.map(|scan| {
            Response::ScanResult {
                interface,
                networks: scan.networks().clone(),
            }
        }),
        Request::Connect {
            interface,
            ssid,
            passphrase,
            country,
            hidden,
        } => manager
            .connect(&interface, ssid, passphrase, country, hidden)
            .await
            .map(|snapshot| Response::Connected { interface, snapshot }),
        Request::BringUp { interface } => manager.bring_up(&interface).await.map(|up| {
            Response::Ack {
                message: if up {
                    format!("{} is up", interface)
                } else {
                    format!("{} could not be brought up", interface)
                },
            }
        }),
        Request::Shutdown => Ok(Response::Ack {
            message: "shutting down".to_string(),
        }),
    };

    result.unwrap_or_else(|e| Response::error(e.kind(), e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_core::command::names;
    use kestrel_core::testing::ScriptedRunner;
    use kestrel_core::{
        ConfirmPolicy, ConnectionController, InterfaceRegistry, LinuxStatusProbe, WifiSettings,
    };
    use std::time::Duration;

    fn manager(runner: Arc<ScriptedRunner>) -> NetworkManager {
        let probe = Arc::new(LinuxStatusProbe::new(runner.clone(), Duration::ZERO));
        let controller =
            ConnectionController::new(runner.clone(), probe).with_policy(ConfirmPolicy {
                attempts: 3,
                delay: Duration::ZERO,
            });
        NetworkManager::with_controller(
            InterfaceRegistry::new(runner),
            controller,
            &WifiSettings::default(),
        )
    }

    fn claim(name: &str) -> Request {
        Request::Claim {
            interface: name.to_string(),
        }
    }

    fn error_kind(response: &Response) -> Option<&str> {
        match response {
            Response::Error { kind, .. } => Some(kind.as_str()),
            _ => None,
        }
    }

    #[tokio::test]
    async fn claim_twice_is_already_taken() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.ok(names::GET_INTERFACES, "wlan0\n");
        let manager = manager(runner);

        assert!(matches!(dispatch(&manager, claim("wlan0")).await, Response::Claimed { .. }));
        let second = dispatch(&manager, claim("wlan0")).await;
        assert_eq!(error_kind(&second), Some("AlreadyTaken"));
        let missing = dispatch(&manager, claim("wlan7")).await;
        assert_eq!(error_kind(&missing), Some("NotFound"));

        let released = dispatch(
            &manager,
            Request::Release {
                interface: "wlan0".to_string(),
            },
        )
        .await;
        assert!(matches!(released, Response::Released { .. }));
        assert!(matches!(dispatch(&manager, claim("wlan0")).await, Response::Claimed { .. }));
    }

    #[tokio::test]
    async fn unclaimed_interface_is_rejected() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.ok(names::GET_INTERFACES, "wlan0\n");
        let manager = manager(runner.clone());

        let response = dispatch(
            &manager,
            Request::Scan {
                interface: "wlan0".to_string(),
            },
        )
        .await;
        assert_eq!(error_kind(&response), Some("NotClaimed"));
        assert_eq!(runner.count(names::SCAN), 0);
    }

    #[tokio::test]
    async fn connect_uses_default_country() {
        let runner = Arc::new(ScriptedRunner::new());
        runner
            .ok(names::GET_INTERFACES, "wlan0\n")
            .ok(names::STATUS, "0x1003\n")
            .ok(names::NETWORK, "wlan0: up\n")
            .ok(names::IW_LINK, "SSID: home\nfreq: 2412\n")
            .ok(names::SCAN, "freq: 2412\nSSID: home\n")
            .ok(
                names::WPA_PASSPHRASE,
                "network={\n\tssid=\"home\"\n\t#psk=\"hunter22\"\n\tpsk=aa\n}\n",
            )
            .ok(names::WPA_SUPPLICANT, "");
        let manager = manager(runner.clone());
        dispatch(&manager, claim("wlan0")).await;

        let response = dispatch(
            &manager,
            Request::Connect {
                interface: "wlan0".to_string(),
                ssid: "home".to_string(),
                passphrase: "hunter22".to_string(),
                country: None,
                hidden: false,
            },
        )
        .await;

        match response {
            Response::Connected { snapshot, .. } => assert_eq!(snapshot.ssid(), Some("home")),
            other => panic!("expected Connected, got {:?}", other),
        }
        let submit = runner
            .calls()
            .into_iter()
            .find(|c| c.command == names::WPA_SUPPLICANT)
            .unwrap();
        assert!(submit.args[1].starts_with("country=US\n\n"));
    }

    #[tokio::test]
    async fn scan_failure_maps_to_error_kind() {
        let runner = Arc::new(ScriptedRunner::new());
        runner
            .ok(names::GET_INTERFACES, "wlan0\n")
            .fail(names::SCAN, "Operation not permitted");
        let manager = manager(runner);
        dispatch(&manager, claim("wlan0")).await;

        let response = dispatch(
            &manager,
            Request::Scan {
                interface: "wlan0".to_string(),
            },
        )
        .await;
        assert_eq!(error_kind(&response), Some("ScanError"));
    }

    #[tokio::test]
    async fn socket_round_trip_and_shutdown() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.ok(names::GET_INTERFACES, "wlan0\n");
        let manager = Arc::new(manager(runner));

        let path = std::env::temp_dir().join(format!("kestrel-{}.sock", uuid::Uuid::new_v4()));
        let listener = UnixListener::bind(&path).unwrap();
        let server = tokio::spawn(IpcServer::new(listener, manager.clone()).run());

        let client = crate::client::KestrelClient::new(path.to_string_lossy().to_string());
        let claimed = client.send_request(claim("wlan0")).await.unwrap();
        assert!(matches!(claimed, Response::Claimed { ref interface, .. } if interface == "wlan0"));

        let stop = client.send_request(Request::Shutdown).await.unwrap();
        assert!(matches!(stop, Response::Ack { .. }));
        server.await.unwrap().unwrap();
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn shutdown_releases_everything() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.ok(names::GET_INTERFACES, "wlan0\nwlan1\n");
        let manager = manager(runner);
        dispatch(&manager, claim("wlan0")).await;
        dispatch(&manager, claim("wlan1")).await;

        manager.shutdown().await;
        match dispatch(&manager, Request::ListInterfaces).await {
            Response::Interfaces { discovered, leased } => {
                assert_eq!(discovered, vec!["wlan0", "wlan1"]);
                assert!(leased.is_empty());
            }
            other => panic!("expected Interfaces, got {:?}", other),
        }
    }
}
