//! Pending configuration edits

use std::collections::BTreeMap;
use std::fmt;

use crate::error::ValidationError;
use crate::field::{ConfigField, FieldKind};
use crate::value::FieldValue;

/// A secret entered by the user. Debug output is redacted.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretValue(String);

impl SecretValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretValue(***)")
    }
}

/// The user's pending edits.
///
/// Only fields present in the draft are candidates for sending. A secret
/// that is absent or empty means "keep whatever the device has".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigDraft {
    values: BTreeMap<ConfigField, FieldValue>,
    secrets: BTreeMap<ConfigField, SecretValue>,
}

impl ConfigDraft {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`ConfigDraft::set`].
    pub fn with(mut self, field: ConfigField, value: impl Into<FieldValue>) -> Self {
        self.set(field, value);
        self
    }

    /// Set a field. Values assigned to a secret field are stored as secret
    /// text; numbers keep their line form.
    pub fn set(&mut self, field: ConfigField, value: impl Into<FieldValue>) {
        let value = value.into();
        if field.is_secret() {
            let text = match value {
                FieldValue::Text(text) => text,
                other => other.to_line_arg(),
            };
            self.secrets.insert(field, SecretValue(text));
            return;
        }
        self.values.insert(field, value);
    }

    pub fn set_secret(&mut self, field: ConfigField, secret: impl Into<String>) {
        if field.is_secret() {
            self.secrets.insert(field, SecretValue(secret.into()));
        }
    }

    /// Parse `raw` according to the field's kind and set it.
    pub fn set_from_str(&mut self, field: ConfigField, raw: &str) -> Result<(), ValidationError> {
        let value = match field.kind() {
            FieldKind::Text { .. } | FieldKind::Secret { .. } => FieldValue::from(raw),
            FieldKind::Flag => FieldValue::Bool(parse_flag(raw).ok_or(
                ValidationError::WrongType {
                    field,
                    expected: "on/off flag",
                },
            )?),
            FieldKind::Number { .. } => {
                let number = raw
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .filter(|n| n.is_finite())
                    .ok_or(ValidationError::WrongType {
                        field,
                        expected: "number",
                    })?;
                FieldValue::Number(number)
            }
        };
        self.set(field, value);
        Ok(())
    }

    /// Build a draft from a JSON object keyed by field key.
    ///
    /// Unknown keys and null values are skipped with a warning.
    pub fn from_json(object: &serde_json::Map<String, serde_json::Value>) -> Self {
        let mut draft = Self::new();
        for (key, value) in object {
            let Ok(field) = key.parse::<ConfigField>() else {
                tracing::warn!(%key, "Ignoring unknown config key");
                continue;
            };
            match FieldValue::from_json(value) {
                Some(value) => draft.set(field, value),
                None => tracing::warn!(%key, "Ignoring non-scalar config value"),
            }
        }
        draft
    }

    pub fn get(&self, field: ConfigField) -> Option<&FieldValue> {
        self.values.get(&field)
    }

    /// A secret the user asked to change. Empty entries count as absent.
    pub fn secret(&self, field: ConfigField) -> Option<&SecretValue> {
        self.secrets.get(&field).filter(|s| !s.is_empty())
    }

    /// Non-secret values in field order.
    pub fn values(&self) -> impl Iterator<Item = (ConfigField, &FieldValue)> {
        self.values.iter().map(|(field, value)| (*field, value))
    }

    /// Entered (non-empty) secrets in field order.
    pub fn secrets(&self) -> impl Iterator<Item = (ConfigField, &SecretValue)> {
        self.secrets
            .iter()
            .filter(|(_, secret)| !secret.is_empty())
            .map(|(field, secret)| (*field, secret))
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.secrets().next().is_none()
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "enabled" => Some(true),
        "0" | "false" | "no" | "off" | "disabled" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_secret_routing_and_redaction() {
        let draft = ConfigDraft::new()
            .with(ConfigField::WifiSsid, "Home")
            .with(ConfigField::WifiPassword, "hunter2");

        assert_eq!(draft.get(ConfigField::WifiPassword), None);
        assert_eq!(
            draft.secret(ConfigField::WifiPassword).map(SecretValue::expose),
            Some("hunter2")
        );
        assert!(!format!("{:?}", draft).contains("hunter2"));
    }

    #[test]
    fn test_numeric_secret_is_kept_as_text() {
        let object = json!({ "apiSecret": 12345, "wifiPassword": 1.5 });
        let draft = ConfigDraft::from_json(object.as_object().unwrap());
        assert_eq!(
            draft.secret(ConfigField::ApiSecret).map(SecretValue::expose),
            Some("12345")
        );
        assert_eq!(
            draft.secret(ConfigField::WifiPassword).map(SecretValue::expose),
            Some("1.5")
        );
    }

    #[test]
    fn test_empty_secret_means_no_change() {
        let mut draft = ConfigDraft::new();
        draft.set_secret(ConfigField::MqttPassword, "");
        assert!(draft.secret(ConfigField::MqttPassword).is_none());
        assert!(draft.is_empty());
    }

    #[test]
    fn test_set_from_str() {
        let mut draft = ConfigDraft::new();
        draft.set_from_str(ConfigField::PricePerLiter, "1200").unwrap();
        draft.set_from_str(ConfigField::EnableFreeWater, "yes").unwrap();
        draft.set_from_str(ConfigField::WifiSsid, "Office").unwrap();

        assert_eq!(
            draft.get(ConfigField::PricePerLiter),
            Some(&FieldValue::Number(1200.0))
        );
        assert_eq!(
            draft.get(ConfigField::EnableFreeWater),
            Some(&FieldValue::Bool(true))
        );
        assert!(matches!(
            draft.set_from_str(ConfigField::MqttPort, "abc"),
            Err(ValidationError::WrongType { .. })
        ));
        assert!(matches!(
            draft.set_from_str(ConfigField::RequireSigned, "maybe"),
            Err(ValidationError::WrongType { .. })
        ));
    }

    #[test]
    fn test_from_json() {
        let value = json!({
            "pricePerLiter": 900,
            "wifiPassword": "pw",
            "unknownKey": 1,
            "relayActiveHigh": true
        });
        let draft = ConfigDraft::from_json(value.as_object().unwrap());

        assert_eq!(
            draft.get(ConfigField::PricePerLiter),
            Some(&FieldValue::Number(900.0))
        );
        assert_eq!(
            draft.get(ConfigField::RelayActiveHigh),
            Some(&FieldValue::Bool(true))
        );
        assert!(draft.secret(ConfigField::WifiPassword).is_some());
        assert_eq!(draft.values().count(), 2);
    }
}
