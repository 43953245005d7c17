//! Configuration file handling for ewater

use anyhow::{Context, Result};
use ewater_firmware::{FlashConfig, OtaConfig};
use ewater_link::{MqttConfig, SerialConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Contents of `config.toml`
///
/// ```toml
/// api_secret = "..."
///
/// [serial]
/// dispatch_delay_ms = 200
///
/// [mqtt]
/// host = "broker.lan"
/// port = 1883
///
/// [flash]
/// baud = 460800
///
/// [ota]
/// advertise_host = "192.168.1.10"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Key for signing pub/sub messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_color: Option<bool>,
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub flash: FlashConfig,
    #[serde(default)]
    pub ota: OtaConfig,
}

/// Connection flags given on the command line
#[derive(Debug, Clone, Default)]
pub struct ArgOverrides {
    pub broker: Option<String>,
    pub mqtt_port: Option<u16>,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
    pub api_secret: Option<String>,
    pub no_color: bool,
}

impl Config {
    /// Load configuration from the default config file
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Get the default config file path
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?
            .join("ewater");

        Ok(config_dir.join("config.toml"))
    }

    /// Merge CLI arguments over config file values
    pub fn merge_with_args(&self, args: &ArgOverrides) -> MergedConfig {
        let mut mqtt = self.mqtt.clone();
        if let Some(host) = &args.broker {
            mqtt.host = host.clone();
        }
        if let Some(port) = args.mqtt_port {
            mqtt.port = port;
        }
        if args.mqtt_username.is_some() {
            mqtt.username = args.mqtt_username.clone();
        }
        if args.mqtt_password.is_some() {
            mqtt.password = args.mqtt_password.clone();
        }

        MergedConfig {
            serial: self.serial.clone(),
            mqtt,
            flash: self.flash.clone(),
            ota: self.ota.clone(),
            api_secret: args
                .api_secret
                .clone()
                .or_else(|| self.api_secret.clone())
                .filter(|s| !s.is_empty()),
            no_color: args.no_color || self.no_color.unwrap_or(false),
        }
    }
}

/// Fully resolved configuration after merging CLI args
#[derive(Debug, Clone)]
pub struct MergedConfig {
    pub serial: SerialConfig,
    pub mqtt: MqttConfig,
    pub flash: FlashConfig,
    pub ota: OtaConfig,
    pub api_secret: Option<String>,
    pub no_color: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            api_secret = "k"

            [mqtt]
            host = "broker.lan"
            "#,
        )
        .unwrap();

        assert_eq!(config.mqtt.host, "broker.lan");
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.serial.dispatch_delay_ms, 200);
        assert_eq!(config.flash.baud, 460_800);
        assert_eq!(config.api_secret.as_deref(), Some("k"));
    }

    #[test]
    fn test_args_override_file() {
        let config: Config = toml::from_str(
            r#"
            api_secret = "from-file"
            no_color = true

            [mqtt]
            host = "broker.lan"
            username = "ops"
            "#,
        )
        .unwrap();

        let merged = config.merge_with_args(&ArgOverrides {
            broker: Some("10.0.0.2".to_string()),
            mqtt_port: Some(8883),
            api_secret: Some("from-args".to_string()),
            ..ArgOverrides::default()
        });

        assert_eq!(merged.mqtt.host, "10.0.0.2");
        assert_eq!(merged.mqtt.port, 8883);
        assert_eq!(merged.mqtt.username.as_deref(), Some("ops"));
        assert_eq!(merged.api_secret.as_deref(), Some("from-args"));
        assert!(merged.no_color);
    }

    #[test]
    fn test_empty_secret_is_none() {
        let merged = Config::default().merge_with_args(&ArgOverrides {
            api_secret: Some(String::new()),
            ..ArgOverrides::default()
        });
        assert_eq!(merged.api_secret, None);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[flash]\nbaud = 921600\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.flash.baud, 921_600);
    }
}
