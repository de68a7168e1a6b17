use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WifiSettings {
    /// Directory holding one subdirectory of scripts per platform
    pub script_dir: PathBuf,
    pub default_country: String,
    pub settle_delay_ms: u64,
    pub command_timeout_secs: u64,
    /// Reset all interfaces and retry once when bring-up fails
    pub reset_fallback: bool,
}

impl Default for WifiSettings {
    fn default() -> Self {
        Self {
            script_dir: PathBuf::from("/usr/share/kestrel/scripts"),
            default_country: "US".to_string(),
            settle_delay_ms: 1000,
            command_timeout_secs: 30,
            reset_fallback: false,
        }
    }
}

impl WifiSettings {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn platform_script_dir(&self, platform: &str) -> PathBuf {
        self.script_dir.join(platform)
    }
}
