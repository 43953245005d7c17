//! Output formatting for ewater (table, json)

use clap::ValueEnum;
use colored::Colorize;
use ewater_core::{format_number, ConfigField, DeviceConfigSnapshot, FieldValue, SecretState};
use serde::Serialize;
use tabled::{Table, Tabled};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// ASCII table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Context for output rendering
pub struct OutputContext {
    pub format: OutputFormat,
    pub quiet: bool,
}

impl OutputContext {
    pub fn new(format: OutputFormat, no_color: bool, quiet: bool) -> Self {
        if no_color {
            colored::control::set_override(false);
        }
        Self { format, quiet }
    }

    /// Print a success message (unless in quiet mode)
    pub fn success(&self, msg: &str) {
        if !self.quiet {
            println!("{}", msg.green());
        }
    }

    /// Print an info message (unless in quiet mode)
    pub fn info(&self, msg: &str) {
        if !self.quiet {
            println!("{}", msg);
        }
    }

    pub fn warn(&self, msg: &str) {
        eprintln!("{}", msg.yellow());
    }

    pub fn error(&self, msg: &str) {
        eprintln!("{}", msg.red());
    }

    /// Print rows in the configured format
    pub fn print<T: Tabled + Serialize>(&self, data: &[T]) {
        match self.format {
            OutputFormat::Table => {
                if data.is_empty() {
                    if !self.quiet {
                        println!("No data");
                    }
                } else {
                    println!("{}", Table::new(data));
                }
            }
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::to_string_pretty(data).unwrap_or_else(|_| "[]".to_string())
                );
            }
        }
    }

    /// Print key-value pairs
    pub fn print_kv(&self, pairs: &[(&str, String)]) {
        match self.format {
            OutputFormat::Table => {
                for (key, value) in pairs {
                    println!("{}: {}", key.bold(), value);
                }
            }
            OutputFormat::Json => {
                let map: serde_json::Map<String, serde_json::Value> = pairs
                    .iter()
                    .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.clone())))
                    .collect();
                println!(
                    "{}",
                    serde_json::to_string_pretty(&map).unwrap_or_else(|_| "{}".to_string())
                );
            }
        }
    }
}

// =============================================================================
// Display types for various commands
// =============================================================================

/// Serial port for the ports command
#[derive(Debug, Tabled, Serialize)]
pub struct PortRow {
    #[tabled(rename = "Port")]
    pub port: String,
    #[tabled(rename = "Description")]
    pub description: String,
}

/// One configuration value for read-config
#[derive(Debug, Tabled, Serialize)]
pub struct ConfigRow {
    #[tabled(rename = "Field")]
    pub field: String,
    #[tabled(rename = "Value")]
    pub value: String,
}

impl ConfigRow {
    /// Rows for every field the snapshot knows about, in field order.
    pub fn from_snapshot(snapshot: &DeviceConfigSnapshot) -> Vec<Self> {
        ConfigField::ALL
            .iter()
            .filter_map(|&field| {
                let value = if field.is_secret() {
                    match snapshot.secret_state(field) {
                        SecretState::Set => "(set)".to_string(),
                        SecretState::NotSet => "(not set)".to_string(),
                        SecretState::Unknown => return None,
                    }
                } else {
                    display_value(snapshot.get(field)?)
                };
                Some(ConfigRow {
                    field: field.key().to_string(),
                    value,
                })
            })
            .collect()
    }
}

pub fn display_value(value: &FieldValue) -> String {
    match value {
        FieldValue::Bool(true) => "yes".to_string(),
        FieldValue::Bool(false) => "no".to_string(),
        FieldValue::Number(n) => format_number(*n),
        FieldValue::Text(text) => text.clone(),
    }
}

/// Discovered device for the devices command
#[derive(Debug, Tabled, Serialize)]
pub struct DeviceRow {
    #[tabled(rename = "Device")]
    pub device_id: String,
    #[tabled(rename = "Firmware")]
    pub firmware: String,
    #[tabled(rename = "IP")]
    pub ip: String,
    #[tabled(rename = "WiFi")]
    pub wifi: String,
    #[tabled(rename = "Uptime (s)")]
    pub uptime: String,
    #[tabled(rename = "Last seen")]
    pub last_seen: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_rows_hide_secrets() {
        let mut snapshot = DeviceConfigSnapshot::new();
        snapshot.apply_report_line("  SSID: Home");
        snapshot.apply_report_line("  Password: ********");
        snapshot.apply_report_line("  Free Water Amount: 500 ml");

        let rows = ConfigRow::from_snapshot(&snapshot);
        let pairs: Vec<(&str, &str)> = rows
            .iter()
            .map(|r| (r.field.as_str(), r.value.as_str()))
            .collect();
        assert!(pairs.contains(&("wifiSsid", "Home")));
        assert!(pairs.contains(&("wifiPassword", "(set)")));
        assert!(pairs.contains(&("freeWaterAmount", "0.5")));
        assert!(!pairs.iter().any(|(_, v)| v.contains("********")));
    }
}
