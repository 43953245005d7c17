//! Line-protocol commands
//!
//! Commands are newline-terminated ASCII: a verb followed by
//! colon-delimited arguments. The protocol has no escaping, which is why
//! validation rejects values containing `:`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Verbs understood by the controller's serial console.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    GetConfig,
    SetWifi,
    SetMqtt,
    SetMqttAuth,
    SetDeviceId,
    SetGroup,
    SetApiSecret,
    SetPrice,
    SetTimeout,
    SetRelayActive,
    SetFreeWater,
    SetFreeWaterCooldown,
    SetFreeWaterAmount,
    SetPulsesPerLiter,
    SetTdsThreshold,
    SetTdsTemp,
    SetTdsCalib,
    SetCashPulse,
    SetCashGap,
    SetPaymentInterval,
    SetDisplayInterval,
    SetTdsInterval,
    SetHeartbeatInterval,
    SetRequireSigned,
    SetAllowRemoteNetcfg,
    SaveConfig,
    ApplyConfig,
    Restart,
}

impl Verb {
    pub fn as_str(self) -> &'static str {
        match self {
            Verb::GetConfig => "GET_CONFIG",
            Verb::SetWifi => "SET_WIFI",
            Verb::SetMqtt => "SET_MQTT",
            Verb::SetMqttAuth => "SET_MQTT_AUTH",
            Verb::SetDeviceId => "SET_DEVICE_ID",
            Verb::SetGroup => "SET_GROUP",
            Verb::SetApiSecret => "SET_API_SECRET",
            Verb::SetPrice => "SET_PRICE",
            Verb::SetTimeout => "SET_TIMEOUT",
            Verb::SetRelayActive => "SET_RELAY_ACTIVE",
            Verb::SetFreeWater => "SET_FREE_WATER",
            Verb::SetFreeWaterCooldown => "SET_FREE_WATER_COOLDOWN",
            Verb::SetFreeWaterAmount => "SET_FREE_WATER_AMOUNT",
            Verb::SetPulsesPerLiter => "SET_PULSES_PER_LITER",
            Verb::SetTdsThreshold => "SET_TDS_THRESHOLD",
            Verb::SetTdsTemp => "SET_TDS_TEMP",
            Verb::SetTdsCalib => "SET_TDS_CALIB",
            Verb::SetCashPulse => "SET_CASH_PULSE",
            Verb::SetCashGap => "SET_CASH_GAP",
            Verb::SetPaymentInterval => "SET_PAYMENT_INTERVAL",
            Verb::SetDisplayInterval => "SET_DISPLAY_INTERVAL",
            Verb::SetTdsInterval => "SET_TDS_INTERVAL",
            Verb::SetHeartbeatInterval => "SET_HEARTBEAT_INTERVAL",
            Verb::SetRequireSigned => "SET_REQUIRE_SIGNED",
            Verb::SetAllowRemoteNetcfg => "SET_ALLOW_REMOTE_NETCFG",
            Verb::SaveConfig => "SAVE_CONFIG",
            Verb::ApplyConfig => "APPLY_CONFIG",
            Verb::Restart => "RESTART",
        }
    }

    /// Index of the argument carrying a secret, if any.
    fn secret_arg(self) -> Option<usize> {
        match self {
            Verb::SetWifi | Verb::SetMqttAuth => Some(1),
            Verb::SetApiSecret => Some(0),
            _ => None,
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One operation on the line protocol.
#[derive(Clone, PartialEq, Eq)]
pub struct LineCommand {
    pub verb: Verb,
    pub args: Vec<String>,
}

impl LineCommand {
    pub fn new(verb: Verb) -> Self {
        Self {
            verb,
            args: Vec::new(),
        }
    }

    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Wire text without the trailing newline.
    pub fn to_line(&self) -> String {
        let mut line = self.verb.as_str().to_string();
        for arg in &self.args {
            line.push(':');
            line.push_str(arg);
        }
        line
    }

    /// Wire text with secret arguments replaced by `***`, for logs and
    /// error reports.
    pub fn masked(&self) -> String {
        let secret = self.verb.secret_arg();
        let mut line = self.verb.as_str().to_string();
        for (i, arg) in self.args.iter().enumerate() {
            line.push(':');
            if Some(i) == secret {
                line.push_str("***");
            } else {
                line.push_str(arg);
            }
        }
        line
    }
}

// Debug output must never leak secrets into logs
impl fmt::Debug for LineCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LineCommand({})", self.masked())
    }
}

/// When applied configuration takes effect on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplyMode {
    #[default]
    Now,
    Restart,
}

impl ApplyMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ApplyMode::Now => "now",
            ApplyMode::Restart => "restart",
        }
    }

    /// Operation sent after a fully successful serial dispatch.
    pub fn follow_up(self) -> LineCommand {
        match self {
            ApplyMode::Now => LineCommand::new(Verb::ApplyConfig),
            ApplyMode::Restart => LineCommand::new(Verb::Restart),
        }
    }
}

impl fmt::Display for ApplyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApplyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "now" => Ok(ApplyMode::Now),
            "restart" => Ok(ApplyMode::Restart),
            other => Err(format!("Unknown apply mode: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_rendering() {
        let cmd = LineCommand::new(Verb::SetMqtt)
            .with_arg("broker.local")
            .with_arg("1883");
        assert_eq!(cmd.to_line(), "SET_MQTT:broker.local:1883");
        assert_eq!(LineCommand::new(Verb::SaveConfig).to_line(), "SAVE_CONFIG");
    }

    #[test]
    fn test_masking_secret_arguments() {
        let wifi = LineCommand::new(Verb::SetWifi)
            .with_arg("Home")
            .with_arg("hunter2");
        assert_eq!(wifi.masked(), "SET_WIFI:Home:***");
        assert!(!format!("{:?}", wifi).contains("hunter2"));

        let auth = LineCommand::new(Verb::SetMqttAuth)
            .with_arg("user")
            .with_arg("pw");
        assert_eq!(auth.masked(), "SET_MQTT_AUTH:user:***");

        let secret = LineCommand::new(Verb::SetApiSecret).with_arg("k");
        assert_eq!(secret.masked(), "SET_API_SECRET:***");

        let price = LineCommand::new(Verb::SetPrice).with_arg("1200");
        assert_eq!(price.masked(), "SET_PRICE:1200");
    }

    #[test]
    fn test_apply_mode_follow_up() {
        assert_eq!(ApplyMode::Now.follow_up().to_line(), "APPLY_CONFIG");
        assert_eq!(ApplyMode::Restart.follow_up().to_line(), "RESTART");
        assert_eq!("RESTART".parse::<ApplyMode>(), Ok(ApplyMode::Restart));
    }
}
