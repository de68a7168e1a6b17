/*!
 * Connection Controller
 * Validate, scan, configure, connect and confirm against a target network
 */

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::command::{names, CommandRunner};
use crate::config::WifiSettings;
use crate::error::{ConnectError, RegistryError};
use crate::probe::StatusProbe;
use crate::registry::InterfaceLease;
use crate::status::{parse_scan_output, ConnectionSnapshot, InterfaceStatus, ScanResult};

/// Confirmation probes before a connection attempt times out.
pub const CONFIRM_ATTEMPTS: u32 = 5;
/// Wait before each confirmation probe.
pub const CONFIRM_DELAY: Duration = Duration::from_secs(5);

const MAX_SSID_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for ConfirmPolicy {
    fn default() -> Self {
        Self {
            attempts: CONFIRM_ATTEMPTS,
            delay: CONFIRM_DELAY,
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub ssid: String,
    pub passphrase: String,
    pub country: String,
    pub hidden: bool,
}

impl ConnectRequest {
    pub fn new(ssid: impl Into<String>, passphrase: impl Into<String>) -> Self {
        Self {
            ssid: ssid.into(),
            passphrase: passphrase.into(),
            country: "US".to_string(),
            hidden: false,
        }
    }

    pub fn country(mut self, country: impl Into<String>) -> Self {
        self.country = country.into().to_ascii_uppercase();
        self
    }

    pub fn hidden(mut self, hidden: bool) -> Self {
        self.hidden = hidden;
        self
    }

    pub fn validate(&self) -> Result<(), ConnectError> {
        if self.ssid.is_empty() {
            return Err(ConnectError::InvalidRequest("ssid must not be empty".to_string()));
        }
        if self.ssid.len() > MAX_SSID_LEN {
            return Err(ConnectError::InvalidRequest(format!(
                "ssid is longer than {} bytes",
                MAX_SSID_LEN
            )));
        }
        if !is_country_code(&self.country) {
            return Err(ConnectError::InvalidRequest(format!(
                "'{}' is not a two-letter country code",
                self.country
            )));
        }
        Ok(())
    }
}

/// Two uppercase ISO 3166 letters, or `00` for the world regulatory domain.
fn is_country_code(code: &str) -> bool {
    code == "00" || (code.len() == 2 && code.chars().all(|c| c.is_ascii_uppercase()))
}

impl fmt::Debug for ConnectRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectRequest")
            .field("ssid", &self.ssid)
            .field("passphrase", &"<redacted>")
            .field("country", &self.country)
            .field("hidden", &self.hidden)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectState {
    Idle,
    Validating,
    Scanning,
    Configuring,
    Connecting { payload: String },
    Confirming { attempt: u32 },
    Connected(ConnectionSnapshot),
    Failed(ConnectError),
}

/// Result of the work done in a state, fed back into [`ConnectState::next`].
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Requested,
    Validated,
    InterfaceDown { interface: String },
    Scanned,
    ScanFailed(String),
    Configured(String),
    ConfigFailed(String),
    Submitted,
    Probed(ConnectionSnapshot),
}

impl ConnectState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectState::Connected(_) | ConnectState::Failed(_))
    }

    /// The single transition function. Pairs that cannot occur leave the
    /// state unchanged.
    pub fn next(self, event: Event, policy: &ConfirmPolicy) -> ConnectState {
        use ConnectState::*;

        match (self, event) {
            (Idle, Event::Requested) => Validating,
            (Validating, Event::Validated) => Scanning,
            (Validating, Event::InterfaceDown { interface }) => {
                Failed(ConnectError::InterfaceDown { interface })
            }
            (Scanning, Event::Scanned) => Configuring,
            (Scanning, Event::ScanFailed(reason)) => Failed(ConnectError::ScanError { reason }),
            (Configuring, Event::Configured(payload)) => Connecting { payload },
            (Configuring, Event::ConfigFailed(reason)) => {
                Failed(ConnectError::ConfigError { reason })
            }
            (Connecting { .. }, Event::Submitted) => Confirming { attempt: 1 },
            (Confirming { attempt }, Event::Probed(snapshot)) => {
                if snapshot.is_connected() {
                    Connected(snapshot)
                } else if attempt >= policy.attempts {
                    Failed(ConnectError::ConnectTimeout { attempts: attempt })
                } else {
                    Confirming {
                        attempt: attempt + 1,
                    }
                }
            }
            (state, event) => {
                warn!("Ignoring {:?} in state {:?}", event, state);
                state
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConnectOutcome {
    /// Always terminal.
    pub state: ConnectState,
    /// Latest probe result; `None` if the attempt stopped before probing.
    pub snapshot: Option<ConnectionSnapshot>,
    pub scan: Option<ScanResult>,
    /// Confirmation probes performed.
    pub probes: u32,
}

impl ConnectOutcome {
    pub fn into_result(self) -> Result<ConnectionSnapshot, ConnectError> {
        match self.state {
            ConnectState::Connected(snapshot) => Ok(snapshot),
            ConnectState::Failed(e) => Err(e),
            other => Err(ConnectError::InvalidRequest(format!(
                "attempt stopped in non-terminal state {:?}",
                other
            ))),
        }
    }
}

/// Drives one connection attempt per call.
///
/// Dropping the future returned by [`connect`](Self::connect) abandons the
/// attempt at its next suspension point; during confirmation that is at
/// most one probe delay away.
pub struct ConnectionController {
    runner: Arc<dyn CommandRunner>,
    probe: Arc<dyn StatusProbe>,
    policy: ConfirmPolicy,
    reset_fallback: bool,
}

impl ConnectionController {
    pub fn new(runner: Arc<dyn CommandRunner>, probe: Arc<dyn StatusProbe>) -> Self {
        Self {
            runner,
            probe,
            policy: ConfirmPolicy::default(),
            reset_fallback: false,
        }
    }

    pub fn from_settings(
        runner: Arc<dyn CommandRunner>,
        probe: Arc<dyn StatusProbe>,
        settings: &WifiSettings,
    ) -> Self {
        Self::new(runner, probe).with_reset_fallback(settings.reset_fallback)
    }

    pub fn with_policy(mut self, policy: ConfirmPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_reset_fallback(mut self, enabled: bool) -> Self {
        self.reset_fallback = enabled;
        self
    }

    pub fn probe(&self) -> &Arc<dyn StatusProbe> {
        &self.probe
    }

    pub async fn connect(
        &self,
        lease: &InterfaceLease,
        request: &ConnectRequest,
    ) -> ConnectOutcome {
        info!("Trying to connect {} to network {}", lease.name(), request.ssid);

        let mut outcome = ConnectOutcome {
            state: ConnectState::Idle,
            snapshot: None,
            scan: None,
            probes: 0,
        };

        if let Err(e) = request.validate() {
            error!("Rejected connect request: {}", e);
            outcome.state = ConnectState::Failed(e);
            return outcome;
        }
        if !lease.is_live() {
            outcome.state = ConnectState::Failed(
                RegistryError::Released(lease.name().to_string()).into(),
            );
            return outcome;
        }

        let mut state = ConnectState::Idle.next(Event::Requested, &self.policy);
        while !state.is_terminal() {
            let event = match &state {
                ConnectState::Validating => self.validate(lease, &mut outcome).await,
                ConnectState::Scanning => match self.scan(lease).await {
                    Ok(scan) => {
                        if scan.contains(&request.ssid) {
                            info!("ssid {} found in network list", request.ssid);
                        } else {
                            warn!(
                                "ssid {} not found in scan, might be a hidden network",
                                request.ssid
                            );
                        }
                        outcome.scan = Some(scan);
                        Event::Scanned
                    }
                    Err(e) => Event::ScanFailed(e.to_string()),
                },
                ConnectState::Configuring => match self.wpa_config(request).await {
                    Ok(payload) => Event::Configured(payload),
                    Err(reason) => Event::ConfigFailed(reason),
                },
                ConnectState::Connecting { payload } => {
                    self.submit(lease, payload).await;
                    Event::Submitted
                }
                ConnectState::Confirming { attempt } => {
                    tokio::time::sleep(self.policy.delay).await;
                    info!("{}/{} tries for network confirmation", attempt, self.policy.attempts);
                    outcome.probes += 1;
                    let snapshot = self.probe.refresh(lease).await;
                    outcome.snapshot = Some(snapshot.clone());
                    Event::Probed(snapshot)
                }
                _ => break,
            };
            state = state.next(event, &self.policy);
        }

        match &state {
            ConnectState::Connected(snapshot) => info!(
                "Connected {} to {} at {:?} GHz",
                lease.name(),
                request.ssid,
                snapshot.frequency_ghz()
            ),
            ConnectState::Failed(e) => error!("Failed connecting to {}: {}", request.ssid, e),
            _ => {}
        }

        outcome.state = state;
        outcome
    }

    /// Runs the platform scan and returns a freshly built result.
    pub async fn scan(&self, lease: &InterfaceLease) -> Result<ScanResult, ConnectError> {
        info!("Scanning for networks on {}", lease.name());
        let args = [lease.name().to_string()];
        let output = self
            .runner
            .run(names::SCAN, &args)
            .await
            .map_err(|e| ConnectError::ScanError { reason: e.to_string() })?;

        if output.failed() {
            return Err(ConnectError::ScanError {
                reason: output.stderr().trim().to_string(),
            });
        }

        let scan = parse_scan_output(&output.stdout());
        if scan.is_empty() {
            warn!("No ssids found on {}", lease.name());
        } else {
            debug!("Found {} networks on {}", scan.len(), lease.name());
        }
        Ok(scan)
    }

    async fn validate(&self, lease: &InterfaceLease, outcome: &mut ConnectOutcome) -> Event {
        let snapshot = self.probe.refresh(lease).await;
        if let Some(ssid) = snapshot.ssid() {
            warn!("Currently connected to network {}", ssid);
        }
        let interface_status = snapshot.interface_status();
        outcome.snapshot = Some(snapshot);

        let down = Event::InterfaceDown {
            interface: lease.name().to_string(),
        };
        match interface_status {
            InterfaceStatus::Online => Event::Validated,
            InterfaceStatus::Unknown => {
                error!("Interface {} status is unknown", lease.name());
                down
            }
            InterfaceStatus::Offline => {
                warn!("Interface {} is down. Trying to set to up", lease.name());
                if self.probe.bring_up(lease).await {
                    info!("Interface {} successfully brought up", lease.name());
                    return Event::Validated;
                }
                if self.reset_fallback {
                    warn!(
                        "Interface {} could not be brought up. Trying to reset all interfaces",
                        lease.name()
                    );
                    self.probe.reset_all().await;
                    if self.probe.bring_up(lease).await {
                        info!("Interface {} brought up after reset", lease.name());
                        return Event::Validated;
                    }
                }
                error!("Interface {} could not be brought up", lease.name());
                down
            }
        }
    }

    async fn wpa_config(&self, request: &ConnectRequest) -> Result<String, String> {
        let args = [request.ssid.clone(), request.passphrase.clone()];
        let output = self
            .runner
            .run(names::WPA_PASSPHRASE, &args)
            .await
            .map_err(|e| e.to_string())?;
        if output.failed() {
            return Err(output.stderr().trim().to_string());
        }

        info!("Country Code : {}", request.country);
        if request.hidden {
            info!("Hidden network setting requested");
        }
        let payload = render_wpa_config(&output.stdout(), &request.country, request.hidden);
        debug!("config : \n{}", payload);
        Ok(payload)
    }

    /// Fire and forget; the confirmation loop judges the outcome.
    async fn submit(&self, lease: &InterfaceLease, payload: &str) {
        let args = [lease.name().to_string(), payload.to_string()];
        match self.runner.run(names::WPA_SUPPLICANT, &args).await {
            Ok(output) if output.failed() => {
                error!("Supplicant reported: {}", output.stderr().trim())
            }
            Ok(output) if output.exit_failed => {
                warn!("Supplicant exited with failure on {}", lease.name())
            }
            Ok(_) => debug!("Supplicant configuration loaded on {}", lease.name()),
            Err(e) => error!("Could not load supplicant configuration: {}", e),
        }
    }
}

/// Turns `wpa_passphrase` output into the payload handed to the supplicant.
///
/// Drops the cleartext `#psk` comment line, prepends the country directive
/// and, for hidden networks, replaces the last two characters with a
/// `scan_ssid` line and a closing brace.
pub fn render_wpa_config(raw: &str, country: &str, hidden: bool) -> String {
    let mut config = format!("country={}\n\n{}", country, strip_psk_comment(raw));
    if hidden {
        config.pop();
        config.pop();
        config.push_str("\n    scan_ssid = 1\n}");
    }
    config
}

/// Removes from the first `#` through the end of its line plus one more
/// character (the indentation of the following line).
fn strip_psk_comment(raw: &str) -> String {
    let Some(hash) = raw.find('#') else {
        return raw.to_string();
    };
    let head = &raw[..hash];
    let tail = match raw[hash..].find('\n') {
        Some(nl) => {
            let mut rest = raw[hash + nl + 1..].chars();
            rest.next();
            rest.as_str()
        }
        None => "",
    };
    format!("{}{}", head, tail)
}
