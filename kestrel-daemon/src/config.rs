use anyhow::Result;
use kestrel_core::WifiSettings;
use serde::{Deserialize, Serialize};
use std::fs;

#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub socket_path: String,
    pub wifi: WifiSettings,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: "/run/kestrel/kestrel.sock".to_string(),
            wifi: WifiSettings::default(),
        }
    }
}

impl DaemonConfig {
    pub fn load(path: &str) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(content) => Ok(toml::from_str(&content)?),
            Err(_) => {
                // Create default config if not found
                let config = Self::default();
                let _ = fs::write(path, toml::to_string_pretty(&config)?);
                Ok(config)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config: DaemonConfig = toml::from_str(
            r#"
            [wifi]
            default_country = "DE"
            reset_fallback = true
            "#,
        )
        .unwrap();
        assert_eq!(config.socket_path, "/run/kestrel/kestrel.sock");
        assert_eq!(config.wifi.default_country, "DE");
        assert!(config.wifi.reset_fallback);
        assert_eq!(config.wifi.command_timeout_secs, 30);
    }

    #[test]
    fn missing_file_writes_defaults() {
        let path = std::env::temp_dir().join(format!("kestreld-{}.toml", uuid::Uuid::new_v4()));
        let path = path.to_string_lossy().to_string();

        let config = DaemonConfig::load(&path).unwrap();
        assert_eq!(config.wifi.default_country, "US");

        let written = fs::read_to_string(&path).unwrap();
        let reloaded: DaemonConfig = toml::from_str(&written).unwrap();
        assert_eq!(reloaded.socket_path, config.socket_path);
        let _ = fs::remove_file(&path);
    }
}
