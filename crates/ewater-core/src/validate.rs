//! Draft validation
//!
//! Runs before anything is encoded. Checks run in field order and the
//! first failure is returned.

use crate::draft::ConfigDraft;
use crate::error::ValidationError;
use crate::field::{ConfigField, FieldKind, NumberRange};
use crate::snapshot::{DeviceConfigSnapshot, SecretState};
use crate::value::FieldValue;

/// Which encoder the draft is validated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// Colon-delimited line protocol over serial.
    Serial,
    /// JSON payload over pub/sub.
    PubSub,
}

/// Largest free-water amount the firmware reads as liters; anything above
/// is taken as milliliters.
pub const FREE_WATER_LITER_CEILING: f64 = 5.0;

/// Normalize a free-water amount to liters.
///
/// Values up to 5 are liters already; larger values are milliliters.
pub fn normalize_free_water_amount(value: f64) -> f64 {
    if value <= FREE_WATER_LITER_CEILING {
        value
    } else {
        value / 1000.0
    }
}

/// Return the draft value as it will be transmitted (normalized units).
pub fn normalized_value(field: ConfigField, value: &FieldValue) -> FieldValue {
    match (field, value) {
        (ConfigField::FreeWaterAmount, FieldValue::Number(n)) => {
            FieldValue::Number(normalize_free_water_amount(*n))
        }
        _ => value.clone(),
    }
}

pub fn validate(
    draft: &ConfigDraft,
    snapshot: &DeviceConfigSnapshot,
    channel: Channel,
) -> Result<(), ValidationError> {
    for field in ConfigField::ALL {
        if let Some(value) = draft.get(field) {
            check_value(field, &normalized_value(field, value), channel)?;
        }
        if let Some(secret) = draft.secret(field) {
            check_text(field, secret.expose(), channel)?;
        }
    }

    if draft.get(ConfigField::RequireSigned) == Some(&FieldValue::Bool(true)) {
        let secret_available = draft.secret(ConfigField::ApiSecret).is_some()
            || snapshot.secret_state(ConfigField::ApiSecret) == SecretState::Set;
        if !secret_available {
            return Err(ValidationError::SigningSecretRequired);
        }
    }

    Ok(())
}

fn check_value(
    field: ConfigField,
    value: &FieldValue,
    channel: Channel,
) -> Result<(), ValidationError> {
    match (field.kind(), value) {
        (FieldKind::Text { required, .. }, FieldValue::Text(text)) => {
            if required && text.trim().is_empty() {
                return Err(ValidationError::Required(field));
            }
            check_text(field, text, channel)
        }
        (FieldKind::Text { .. }, _) => Err(ValidationError::WrongType {
            field,
            expected: "text",
        }),
        (FieldKind::Flag, FieldValue::Bool(_)) => Ok(()),
        (FieldKind::Flag, _) => Err(ValidationError::WrongType {
            field,
            expected: "on/off flag",
        }),
        (FieldKind::Number { range, integral }, FieldValue::Number(n)) => {
            if !n.is_finite() {
                return Err(ValidationError::WrongType {
                    field,
                    expected: "number",
                });
            }
            if integral && n.fract() != 0.0 {
                return Err(ValidationError::WrongType {
                    field,
                    expected: "whole number",
                });
            }
            if range.contains(*n) {
                return Ok(());
            }
            Err(match range {
                NumberRange::Closed(min, max) => ValidationError::OutOfRange {
                    field,
                    value: *n,
                    min,
                    max,
                },
                NumberRange::OpenLow(min, max) => {
                    ValidationError::OutOfOpenRange {
                        field,
                        value: *n,
                        min,
                        max,
                    }
                }
            })
        }
        (FieldKind::Number { .. }, _) => Err(ValidationError::WrongType {
            field,
            expected: "number",
        }),
        // secrets never reach the value map
        (FieldKind::Secret { .. }, _) => Ok(()),
    }
}

fn check_text(field: ConfigField, text: &str, channel: Channel) -> Result<(), ValidationError> {
    let limit = match field.kind() {
        FieldKind::Text { limit, .. } | FieldKind::Secret { limit } => limit,
        _ => return Ok(()),
    };
    if text.chars().count() >= limit {
        return Err(ValidationError::TooLong { field, limit });
    }
    if text.contains(&['\n', '\r'][..]) {
        return Err(ValidationError::ContainsLineBreak(field));
    }
    if channel == Channel::Serial && text.contains(':') {
        return Err(ValidationError::ContainsDelimiter(field));
    }
    Ok(())
}
