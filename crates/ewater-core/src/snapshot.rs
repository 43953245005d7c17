//! Last-known device configuration
//!
//! A snapshot is filled from the controller's configuration report, one
//! line at a time, and replaced wholesale on reconnect or device change.
//! Secret fields are tracked only as [`SecretState`]; raw secret values
//! never enter a snapshot.

use std::collections::BTreeMap;

use crate::field::ConfigField;
use crate::value::FieldValue;

/// Masked indicator the firmware prints for a secret that is set.
pub const MASKED: &str = "********";
/// Indicator the firmware prints for an empty field.
pub const NOT_SET: &str = "(not set)";

/// What is known about a secret field on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SecretState {
    /// Never reported. The MQTT password stays here: the report omits it.
    #[default]
    Unknown,
    Set,
    NotSet,
}

/// Last-known configuration of one device.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceConfigSnapshot {
    values: BTreeMap<ConfigField, FieldValue>,
    secrets: BTreeMap<ConfigField, SecretState>,
    has_read_config: bool,
}

impl DeviceConfigSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field: ConfigField) -> Option<&FieldValue> {
        self.values.get(&field)
    }

    pub fn text(&self, field: ConfigField) -> Option<&str> {
        self.get(field).and_then(FieldValue::as_str)
    }

    pub fn flag(&self, field: ConfigField) -> Option<bool> {
        self.get(field).and_then(FieldValue::as_bool)
    }

    /// Record a non-secret value. Secret fields are ignored.
    pub fn set(&mut self, field: ConfigField, value: FieldValue) {
        if field.is_secret() {
            tracing::warn!(%field, "Refusing to store a secret value in the snapshot");
            return;
        }
        self.values.insert(field, value);
    }

    pub fn secret_state(&self, field: ConfigField) -> SecretState {
        self.secrets.get(&field).copied().unwrap_or_default()
    }

    pub fn set_secret_state(&mut self, field: ConfigField, state: SecretState) {
        if field.is_secret() {
            self.secrets.insert(field, state);
        }
    }

    /// True once at least one report line has been applied.
    pub fn has_read_config(&self) -> bool {
        self.has_read_config
    }

    /// Mark the snapshot as no longer trustworthy, e.g. after a partially
    /// applied dispatch. Values stay for display; pairing rules stop
    /// relying on them until the next report.
    pub fn invalidate(&mut self) {
        self.has_read_config = false;
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.secrets.is_empty()
    }

    /// Apply one line of the configuration report.
    ///
    /// Returns the field that was updated, or `None` when the line carries
    /// no recognised label.
    pub fn apply_report_line(&mut self, line: &str) -> Option<ConfigField> {
        let (rule, raw) = REPORT_RULES
            .iter()
            .find_map(|rule| value_after(line, rule.label).map(|raw| (rule, raw)))?;

        match rule.parse {
            ReportValue::Text => {
                let text = if raw == NOT_SET { "" } else { raw };
                self.values.insert(rule.field, FieldValue::from(text));
            }
            ReportValue::Masked => {
                let state = if raw == MASKED {
                    SecretState::Set
                } else {
                    SecretState::NotSet
                };
                self.secrets.insert(rule.field, state);
            }
            ReportValue::Flag(truthy) => {
                self.values
                    .insert(rule.field, FieldValue::Bool(raw.starts_with(truthy)));
            }
            ReportValue::Integer => {
                self.values
                    .insert(rule.field, FieldValue::Number(parse_int_prefix(raw)?));
            }
            ReportValue::Decimal => {
                self.values
                    .insert(rule.field, FieldValue::Number(parse_float_prefix(raw)?));
            }
            ReportValue::Millilitres => {
                let ml = parse_float_prefix(raw)?;
                self.values
                    .insert(rule.field, FieldValue::Number(ml / 1000.0));
            }
        }

        self.has_read_config = true;
        tracing::trace!(field = %rule.field, "Snapshot updated from report");
        Some(rule.field)
    }
}

// =============================================================================
// Report line rules
// =============================================================================

enum ReportValue {
    Text,
    Masked,
    /// Boolean; true when the value starts with the given word.
    Flag(&'static str),
    Integer,
    Decimal,
    Millilitres,
}

struct ReportRule {
    label: &'static str,
    field: ConfigField,
    parse: ReportValue,
}

const fn rule(label: &'static str, field: ConfigField, parse: ReportValue) -> ReportRule {
    ReportRule {
        label,
        field,
        parse,
    }
}

/// Labels in match order. None of them is a substring of another.
static REPORT_RULES: &[ReportRule] = &[
    rule("SSID:", ConfigField::WifiSsid, ReportValue::Text),
    rule("Password:", ConfigField::WifiPassword, ReportValue::Masked),
    rule("Broker:", ConfigField::MqttBroker, ReportValue::Text),
    rule("Port:", ConfigField::MqttPort, ReportValue::Integer),
    rule("Device ID:", ConfigField::DeviceId, ReportValue::Text),
    rule("Group ID:", ConfigField::GroupId, ReportValue::Text),
    rule("Username:", ConfigField::MqttUsername, ReportValue::Text),
    rule("API Secret:", ConfigField::ApiSecret, ReportValue::Masked),
    rule("Require Signed:", ConfigField::RequireSigned, ReportValue::Flag("YES")),
    rule(
        "Remote Network Config:",
        ConfigField::AllowRemoteNetcfg,
        ReportValue::Flag("Allowed"),
    ),
    rule("Price per Liter:", ConfigField::PricePerLiter, ReportValue::Integer),
    rule("Session Timeout:", ConfigField::SessionTimeout, ReportValue::Integer),
    rule(
        "Free Water Cooldown:",
        ConfigField::FreeWaterCooldown,
        ReportValue::Integer,
    ),
    rule(
        "Free Water Amount:",
        ConfigField::FreeWaterAmount,
        ReportValue::Millilitres,
    ),
    rule("Pulses per Liter:", ConfigField::PulsesPerLiter, ReportValue::Decimal),
    rule("TDS Threshold:", ConfigField::TdsThreshold, ReportValue::Integer),
    rule("TDS Temperature:", ConfigField::TdsTemperature, ReportValue::Decimal),
    rule("TDS Calibration:", ConfigField::TdsCalibration, ReportValue::Decimal),
    rule("Free Water:", ConfigField::EnableFreeWater, ReportValue::Flag("Enabled")),
    rule(
        "Relay Active High:",
        ConfigField::RelayActiveHigh,
        ReportValue::Flag("YES"),
    ),
    rule("Cash Pulse Value:", ConfigField::CashPulseValue, ReportValue::Integer),
    rule("Cash Pulse Gap:", ConfigField::CashPulseGap, ReportValue::Integer),
    rule("Payment Interval:", ConfigField::PaymentInterval, ReportValue::Integer),
    rule("Display Interval:", ConfigField::DisplayInterval, ReportValue::Integer),
    rule("TDS Interval:", ConfigField::TdsInterval, ReportValue::Integer),
    rule(
        "Heartbeat Interval:",
        ConfigField::HeartbeatInterval,
        ReportValue::Integer,
    ),
];

fn value_after<'a>(line: &'a str, label: &str) -> Option<&'a str> {
    line.find(label)
        .map(|pos| line[pos + label.len()..].trim())
}

/// Leading integer of `s`, ignoring anything after it ("1200 so'm" -> 1200).
fn parse_int_prefix(s: &str) -> Option<f64> {
    let end = numeric_prefix_len(s, false);
    s[..end].parse::<i64>().ok().map(|n| n as f64)
}

/// Leading decimal of `s` ("24.5 C" -> 24.5).
fn parse_float_prefix(s: &str) -> Option<f64> {
    let end = numeric_prefix_len(s, true);
    s[..end].parse::<f64>().ok()
}

fn numeric_prefix_len(s: &str, allow_fraction: bool) -> usize {
    let bytes = s.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'+' | b'-')) {
        end = 1;
    }
    let mut seen_dot = false;
    while let Some(&b) = bytes.get(end) {
        match b {
            b'0'..=b'9' => end += 1,
            b'.' if allow_fraction && !seen_dot => {
                seen_dot = true;
                end += 1;
            }
            _ => break,
        }
    }
    // drop a trailing "." so "5." parses as 5
    if end > 0 && bytes[end - 1] == b'.' {
        end -= 1;
    }
    end
}
