//! Error types for reconciliation and signing
//!
//! Both error kinds are local: they are produced before any transport I/O
//! happens, so nothing has reached the device when one of them is returned.

use thiserror::Error;

use crate::field::ConfigField;

/// Invalid user input detected while validating a configuration draft.
///
/// Validation stops at the first failing rule; errors are not accumulated.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("{0} is required")]
    Required(ConfigField),

    #[error("{field} must be between {min} and {max} (got {value})")]
    OutOfRange {
        field: ConfigField,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("{field} must be greater than {min} and at most {max} (got {value})")]
    OutOfOpenRange {
        field: ConfigField,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("{field} must be shorter than {limit} characters")]
    TooLong { field: ConfigField, limit: usize },

    #[error("{0} must not contain ':'")]
    ContainsDelimiter(ConfigField),

    #[error("{0} must not contain line breaks")]
    ContainsLineBreak(ConfigField),

    #[error("{field} has the wrong type: expected {expected}")]
    WrongType {
        field: ConfigField,
        expected: &'static str,
    },

    /// A secret was entered but the identifier it must be paired with is unknown.
    #[error("{secret} requires {identifier}")]
    MissingPairedIdentifier {
        secret: ConfigField,
        identifier: ConfigField,
    },

    /// The identifier changed but no secret was entered to go with it.
    #[error("{identifier} changed; enter {secret} as well")]
    UnpairedIdentifierChange {
        identifier: ConfigField,
        secret: ConfigField,
    },

    /// One half of a value pair changed and the other half is unknown.
    #[error("{field} cannot be sent without {companion}")]
    MissingCompanion {
        field: ConfigField,
        companion: ConfigField,
    },

    #[error("require signed needs an API secret (enter one or set it on the device first)")]
    SigningSecretRequired,
}

/// Failure to build a canonical signed message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SigningError {
    #[error("Missing type")]
    MissingType,

    #[error("Unsupported sign type: {0}")]
    UnsupportedType(String),

    #[error("Missing deviceId")]
    MissingDeviceId,

    #[error("Missing payload")]
    MissingPayload,

    #[error("Missing secret")]
    MissingSecret,

    #[error("{kind} missing {field}")]
    MissingRequiredField {
        kind: &'static str,
        field: &'static str,
    },
}
