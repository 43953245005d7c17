//! The configuration field table
//!
//! Every field the controller exposes, with the label it uses in its
//! configuration report, the line-protocol verb that sets it, its JSON key
//! on the pub/sub channel and the range the firmware accepts.

use std::fmt;
use std::str::FromStr;

use crate::command::Verb;

/// A configuration field of the vending controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConfigField {
    // Network
    WifiSsid,
    WifiPassword,
    MqttBroker,
    MqttPort,
    MqttUsername,
    MqttPassword,
    DeviceId,
    // Vending
    PricePerLiter,
    SessionTimeout,
    RelayActiveHigh,
    EnableFreeWater,
    FreeWaterCooldown,
    FreeWaterAmount,
    // Sensors
    PulsesPerLiter,
    TdsThreshold,
    TdsTemperature,
    TdsCalibration,
    // Cash acceptor
    CashPulseValue,
    CashPulseGap,
    // Intervals
    PaymentInterval,
    DisplayInterval,
    TdsInterval,
    HeartbeatInterval,
    // Identity and security
    GroupId,
    ApiSecret,
    RequireSigned,
    AllowRemoteNetcfg,
}

/// What kind of value a field holds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldKind {
    /// Plain text, stored in a fixed-size buffer on the device.
    Text { required: bool, limit: usize },
    /// Text the device never reports back.
    Secret { limit: usize },
    /// On/off setting.
    Flag,
    /// Numeric setting with the range the firmware accepts.
    Number { range: NumberRange, integral: bool },
}

/// Accepted numeric range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NumberRange {
    /// `min <= v <= max`
    Closed(f64, f64),
    /// `min < v <= max`
    OpenLow(f64, f64),
}

impl NumberRange {
    pub fn contains(&self, value: f64) -> bool {
        match *self {
            NumberRange::Closed(min, max) => value >= min && value <= max,
            NumberRange::OpenLow(min, max) => value > min && value <= max,
        }
    }
}

impl ConfigField {
    pub const ALL: [ConfigField; 27] = [
        ConfigField::WifiSsid,
        ConfigField::WifiPassword,
        ConfigField::MqttBroker,
        ConfigField::MqttPort,
        ConfigField::MqttUsername,
        ConfigField::MqttPassword,
        ConfigField::DeviceId,
        ConfigField::PricePerLiter,
        ConfigField::SessionTimeout,
        ConfigField::RelayActiveHigh,
        ConfigField::EnableFreeWater,
        ConfigField::FreeWaterCooldown,
        ConfigField::FreeWaterAmount,
        ConfigField::PulsesPerLiter,
        ConfigField::TdsThreshold,
        ConfigField::TdsTemperature,
        ConfigField::TdsCalibration,
        ConfigField::CashPulseValue,
        ConfigField::CashPulseGap,
        ConfigField::PaymentInterval,
        ConfigField::DisplayInterval,
        ConfigField::TdsInterval,
        ConfigField::HeartbeatInterval,
        ConfigField::GroupId,
        ConfigField::ApiSecret,
        ConfigField::RequireSigned,
        ConfigField::AllowRemoteNetcfg,
    ];

    /// Key used in drafts and in pub/sub config payloads.
    pub fn key(self) -> &'static str {
        match self {
            ConfigField::WifiSsid => "wifiSsid",
            ConfigField::WifiPassword => "wifiPassword",
            ConfigField::MqttBroker => "mqttBroker",
            ConfigField::MqttPort => "mqttPort",
            ConfigField::MqttUsername => "mqttUsername",
            ConfigField::MqttPassword => "mqttPassword",
            ConfigField::DeviceId => "deviceId",
            ConfigField::PricePerLiter => "pricePerLiter",
            ConfigField::SessionTimeout => "sessionTimeout",
            ConfigField::RelayActiveHigh => "relayActiveHigh",
            ConfigField::EnableFreeWater => "enableFreeWater",
            ConfigField::FreeWaterCooldown => "freeWaterCooldown",
            ConfigField::FreeWaterAmount => "freeWaterAmount",
            ConfigField::PulsesPerLiter => "pulsesPerLiter",
            ConfigField::TdsThreshold => "tdsThreshold",
            ConfigField::TdsTemperature => "tdsTemperatureC",
            ConfigField::TdsCalibration => "tdsCalibrationFactor",
            ConfigField::CashPulseValue => "cashPulseValue",
            ConfigField::CashPulseGap => "cashPulseGapMs",
            ConfigField::PaymentInterval => "paymentCheckInterval",
            ConfigField::DisplayInterval => "displayUpdateInterval",
            ConfigField::TdsInterval => "tdsCheckInterval",
            ConfigField::HeartbeatInterval => "heartbeatInterval",
            ConfigField::GroupId => "groupId",
            ConfigField::ApiSecret => "apiSecret",
            ConfigField::RequireSigned => "requireSigned",
            ConfigField::AllowRemoteNetcfg => "allowRemoteNetworkConfig",
        }
    }

    pub fn kind(self) -> FieldKind {
        use ConfigField::*;
        use NumberRange::{Closed, OpenLow};

        let int = |min, max| FieldKind::Number {
            range: Closed(min, max),
            integral: true,
        };

        match self {
            WifiSsid => FieldKind::Text {
                required: true,
                limit: 32,
            },
            MqttBroker => FieldKind::Text {
                required: true,
                limit: 128,
            },
            DeviceId => FieldKind::Text {
                required: true,
                limit: 32,
            },
            MqttUsername => FieldKind::Text {
                required: false,
                limit: 32,
            },
            GroupId => FieldKind::Text {
                required: false,
                limit: 32,
            },
            WifiPassword | MqttPassword | ApiSecret => FieldKind::Secret { limit: 64 },
            RelayActiveHigh | EnableFreeWater | RequireSigned | AllowRemoteNetcfg => {
                FieldKind::Flag
            }
            MqttPort => int(1.0, 65535.0),
            PricePerLiter => int(1.0, 100_000.0),
            SessionTimeout => int(60.0, 3600.0),
            FreeWaterCooldown => int(60.0, 7200.0),
            FreeWaterAmount => FieldKind::Number {
                range: OpenLow(0.0, 5.0),
                integral: false,
            },
            PulsesPerLiter => FieldKind::Number {
                range: Closed(1.0, 5000.0),
                integral: false,
            },
            TdsThreshold => int(0.0, 5000.0),
            TdsTemperature => FieldKind::Number {
                range: Closed(0.0, 80.0),
                integral: false,
            },
            TdsCalibration => FieldKind::Number {
                range: OpenLow(0.0, 5.0),
                integral: false,
            },
            CashPulseValue => int(1.0, 100_000.0),
            CashPulseGap => int(20.0, 1000.0),
            PaymentInterval => int(200.0, 600_000.0),
            DisplayInterval => int(50.0, 10_000.0),
            TdsInterval => int(1000.0, 600_000.0),
            HeartbeatInterval => int(1000.0, 3_600_000.0),
        }
    }

    pub fn is_secret(self) -> bool {
        matches!(self.kind(), FieldKind::Secret { .. })
    }

    /// Line-protocol verb that sets this field.
    ///
    /// Paired fields share a verb: the ssid and password both travel in
    /// `SET_WIFI`, broker and port in `SET_MQTT`.
    pub fn verb(self) -> Verb {
        use ConfigField::*;
        match self {
            WifiSsid | WifiPassword => Verb::SetWifi,
            MqttBroker | MqttPort => Verb::SetMqtt,
            MqttUsername | MqttPassword => Verb::SetMqttAuth,
            DeviceId => Verb::SetDeviceId,
            GroupId => Verb::SetGroup,
            ApiSecret => Verb::SetApiSecret,
            PricePerLiter => Verb::SetPrice,
            SessionTimeout => Verb::SetTimeout,
            RelayActiveHigh => Verb::SetRelayActive,
            EnableFreeWater => Verb::SetFreeWater,
            FreeWaterCooldown => Verb::SetFreeWaterCooldown,
            FreeWaterAmount => Verb::SetFreeWaterAmount,
            PulsesPerLiter => Verb::SetPulsesPerLiter,
            TdsThreshold => Verb::SetTdsThreshold,
            TdsTemperature => Verb::SetTdsTemp,
            TdsCalibration => Verb::SetTdsCalib,
            CashPulseValue => Verb::SetCashPulse,
            CashPulseGap => Verb::SetCashGap,
            PaymentInterval => Verb::SetPaymentInterval,
            DisplayInterval => Verb::SetDisplayInterval,
            TdsInterval => Verb::SetTdsInterval,
            HeartbeatInterval => Verb::SetHeartbeatInterval,
            RequireSigned => Verb::SetRequireSigned,
            AllowRemoteNetcfg => Verb::SetAllowRemoteNetcfg,
        }
    }

    /// Whether the firmware accepts this field in a pub/sub config payload.
    pub fn accepted_over_pubsub(self) -> bool {
        !matches!(
            self,
            ConfigField::DeviceId
                | ConfigField::GroupId
                | ConfigField::ApiSecret
                | ConfigField::RequireSigned
                | ConfigField::AllowRemoteNetcfg
        )
    }

    /// Network fields need remote network configuration enabled on the
    /// device before it applies them from a pub/sub payload.
    pub fn is_network(self) -> bool {
        matches!(
            self,
            ConfigField::WifiSsid
                | ConfigField::WifiPassword
                | ConfigField::MqttBroker
                | ConfigField::MqttPort
                | ConfigField::MqttUsername
                | ConfigField::MqttPassword
        )
    }
}

impl fmt::Display for ConfigField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for ConfigField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ConfigField::ALL
            .iter()
            .copied()
            .find(|field| field.key().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("Unknown config field: {}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_round_trip_through_from_str() {
        for field in ConfigField::ALL {
            assert_eq!(field.key().parse::<ConfigField>(), Ok(field));
        }
        assert!("nope".parse::<ConfigField>().is_err());
    }

    #[test]
    fn test_secret_fields() {
        let secrets: Vec<_> = ConfigField::ALL
            .iter()
            .filter(|f| f.is_secret())
            .copied()
            .collect();
        assert_eq!(
            secrets,
            vec![
                ConfigField::WifiPassword,
                ConfigField::MqttPassword,
                ConfigField::ApiSecret
            ]
        );
    }

    #[test]
    fn test_ranges() {
        let FieldKind::Number { range, .. } = ConfigField::TdsCalibration.kind() else {
            panic!("calibration is numeric");
        };
        assert!(!range.contains(0.0));
        assert!(range.contains(5.0));
        assert!(!range.contains(5.01));

        let FieldKind::Number { range, .. } = ConfigField::PricePerLiter.kind() else {
            panic!("price is numeric");
        };
        assert!(range.contains(1.0));
        assert!(range.contains(100_000.0));
        assert!(!range.contains(0.0));
    }

    #[test]
    fn test_serial_only_fields() {
        assert!(!ConfigField::GroupId.accepted_over_pubsub());
        assert!(!ConfigField::ApiSecret.accepted_over_pubsub());
        assert!(ConfigField::PricePerLiter.accepted_over_pubsub());
        assert!(ConfigField::WifiSsid.accepted_over_pubsub());
    }
}
