//! Canonical message signing
//!
//! The controller verifies every signed pub/sub message by rebuilding a
//! canonical JSON string from the fields it knows about and comparing
//! HMAC-SHA256 tags. Both sides must agree byte for byte, so the field
//! subset and order per message kind are fixed here and `device_id` is
//! always appended last.
//!
//! ```text
//! {"apply":"now","pricePerLiter":1200,"nonce":"cfg_..","ts":1700000000000,"device_id":"dev1"}
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use rand::Rng;

use crate::error::SigningError;
use crate::value::FieldValue;

/// Unordered input fields. Ordering comes from the message kind, never
/// from the map.
pub type Fields = BTreeMap<String, FieldValue>;

/// The kinds of message the firmware verifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Payment,
    Config,
    Command,
    Ota,
}

const PAYMENT_FIELDS: &[&str] = &["amount", "source", "transaction_id", "nonce", "user_id", "ts"];

const CONFIG_FIELDS: &[&str] = &[
    "apply",
    "deviceId",
    "wifiSsid",
    "wifiPassword",
    "mqttBroker",
    "mqttPort",
    "mqttUsername",
    "mqttPassword",
    "pricePerLiter",
    "sessionTimeout",
    "freeWaterCooldown",
    "freeWaterAmount",
    "pulsesPerLiter",
    "tdsThreshold",
    "tdsTemperatureC",
    "tdsCalibrationFactor",
    "enableFreeWater",
    "relayActiveHigh",
    "relay_active_high",
    "cashPulseValue",
    "cashPulseGapMs",
    "paymentCheckInterval",
    "displayUpdateInterval",
    "tdsCheckInterval",
    "heartbeatInterval",
    "enablePowerSave",
    "deepSleepStartHour",
    "deepSleepEndHour",
    "transaction_id",
    "nonce",
    "ts",
];

const COMMAND_FIELDS: &[&str] = &[
    "action",
    "pricePerLiter",
    "threshold",
    "tdsThreshold",
    "duration",
    "reason",
    "transaction_id",
    "nonce",
    "ts",
];

const OTA_FIELDS: &[&str] = &["firmware_url", "transaction_id", "nonce", "ts"];

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Payment => "payment",
            MessageKind::Config => "config",
            MessageKind::Command => "command",
            MessageKind::Ota => "ota",
        }
    }

    /// Fields allowed in the canonical form, in signing order.
    pub fn field_order(self) -> &'static [&'static str] {
        match self {
            MessageKind::Payment => PAYMENT_FIELDS,
            MessageKind::Config => CONFIG_FIELDS,
            MessageKind::Command => COMMAND_FIELDS,
            MessageKind::Ota => OTA_FIELDS,
        }
    }

    /// Fields that must be present for the message to be signable.
    pub fn required_fields(self) -> &'static [&'static str] {
        match self {
            MessageKind::Payment => &["amount"],
            _ => &[],
        }
    }

    /// Nonce prefix used when this crate generates messages of this kind.
    pub fn nonce_prefix(self) -> &'static str {
        match self {
            MessageKind::Payment => "pay",
            MessageKind::Config => "cfg",
            MessageKind::Command => "cmd",
            MessageKind::Ota => "ota",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageKind {
    type Err = SigningError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "payment" => Ok(MessageKind::Payment),
            "config" => Ok(MessageKind::Config),
            "command" => Ok(MessageKind::Command),
            "ota" => Ok(MessageKind::Ota),
            _ => Err(SigningError::UnsupportedType(s.to_string())),
        }
    }
}

/// A message reduced to the fields its kind allows, in canonical order.
#[derive(Debug, Clone, PartialEq)]
pub struct SignableMessage {
    kind: MessageKind,
    device_id: String,
    fields: Vec<(&'static str, FieldValue)>,
}

impl SignableMessage {
    /// Select the allowed, present fields for `kind`.
    ///
    /// Fields not in the kind's list are dropped silently. Non-finite
    /// numbers count as absent.
    pub fn new(kind: MessageKind, device_id: &str, input: &Fields) -> Result<Self, SigningError> {
        let device_id = device_id.trim();
        if device_id.is_empty() {
            return Err(SigningError::MissingDeviceId);
        }

        let fields: Vec<_> = kind
            .field_order()
            .iter()
            .filter_map(|&key| {
                input
                    .get(key)
                    .filter(|value| value.is_present())
                    .map(|value| (key, value.clone()))
            })
            .collect();

        for &required in kind.required_fields() {
            if !fields.iter().any(|(key, _)| *key == required) {
                return Err(SigningError::MissingRequiredField {
                    kind: kind.as_str(),
                    field: required,
                });
            }
        }

        Ok(Self {
            kind,
            device_id: device_id.to_string(),
            fields,
        })
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Included fields in canonical order.
    pub fn fields(&self) -> impl Iterator<Item = (&'static str, &FieldValue)> {
        self.fields.iter().map(|(key, value)| (*key, value))
    }

    /// The exact string the signature covers.
    pub fn canonical(&self) -> String {
        let device_id = FieldValue::Text(self.device_id.clone());
        let entries = self
            .fields
            .iter()
            .map(|(key, value)| (*key, value))
            .chain(std::iter::once(("device_id", &device_id)));
        write_object(entries)
    }

    pub fn sign(&self, secret: &str) -> Result<Signed, SigningError> {
        if secret.is_empty() {
            return Err(SigningError::MissingSecret);
        }
        let canonical = self.canonical();
        let signature = hmac_hex(secret, &canonical);
        Ok(Signed {
            canonical,
            signature,
        })
    }

    /// JSON body published to the device: the included fields plus `sig`
    /// when a signature is supplied. `device_id` is implied by the topic.
    pub fn wire_payload(&self, signature: Option<&str>) -> String {
        let sig = signature.map(|s| FieldValue::Text(s.to_string()));
        let entries = self
            .fields
            .iter()
            .map(|(key, value)| (*key, value))
            .chain(sig.as_ref().map(|value| ("sig", value)));
        write_object(entries)
    }
}

/// Canonical string plus its signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signed {
    pub canonical: String,
    /// Lowercase hex HMAC-SHA256, 64 characters.
    pub signature: String,
}

/// Build the canonical form of a message and sign it.
///
/// Arguments are checked in a fixed order: kind present, device id,
/// payload, secret; then the kind must be known and its required fields
/// present.
pub fn sign(
    kind: &str,
    device_id: &str,
    fields: Option<&Fields>,
    secret: Option<&str>,
) -> Result<Signed, SigningError> {
    if kind.is_empty() {
        return Err(SigningError::MissingType);
    }
    if device_id.trim().is_empty() {
        return Err(SigningError::MissingDeviceId);
    }
    let fields = fields.ok_or(SigningError::MissingPayload)?;
    let secret = secret
        .filter(|s| !s.is_empty())
        .ok_or(SigningError::MissingSecret)?;

    let kind: MessageKind = kind.parse()?;
    SignableMessage::new(kind, device_id, fields)?.sign(secret)
}

/// HMAC-SHA256 of `message` keyed by `secret`, lowercase hex.
pub fn hmac_hex(secret: &str, message: &str) -> String {
    hex::encode(hmac_sha256::HMAC::mac(message.as_bytes(), secret.as_bytes()))
}

/// Generate a nonce of the form `<prefix>_<unix millis>_<8 hex>`.
pub fn generate_nonce(kind: MessageKind, now_ms: i64) -> String {
    let suffix: u32 = rand::thread_rng().gen();
    format!("{}_{}_{:08x}", kind.nonce_prefix(), now_ms, suffix)
}

/// Current time in Unix milliseconds, as carried in `ts`.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn write_object<'a>(entries: impl Iterator<Item = (&'a str, &'a FieldValue)>) -> String {
    let mut out = String::from("{");
    for (i, (key, value)) in entries.enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&serde_json::Value::String(key.to_string()).to_string());
        out.push(':');
        out.push_str(&value.to_json());
    }
    out.push('}');
    out
}
