//! ewater-core - configuration and signing core for eWater vending controllers
//!
//! Pure logic with no I/O: the field table, last-known device snapshot,
//! draft validation and reconciliation, line-protocol commands and the
//! canonical signing engine shared with the controller firmware.
//!
//! # Architecture
//!
//! ```text
//!   ConfigDraft ──┐
//!                 ├─► reconcile() ─► ChangeSet ─┬─► to_serial()  ─► [LineCommand] + SAVE_CONFIG
//!   Snapshot ─────┘        │                    └─► to_pubsub()  ─► Fields ─► SignableMessage ─► sig
//!      ▲                validate()
//!      │
//!   apply_report_line()  ◄── device config report
//! ```

pub mod command;
pub mod draft;
pub mod error;
pub mod field;
pub mod reconcile;
pub mod signing;
pub mod snapshot;
pub mod validate;
pub mod value;

pub use command::{ApplyMode, LineCommand, Verb};
pub use draft::{ConfigDraft, SecretValue};
pub use error::{SigningError, ValidationError};
pub use field::{ConfigField, FieldKind, NumberRange};
pub use reconcile::{reconcile, Change, ChangeSet, PubSubPlan, SerialPlan};
pub use signing::{sign, Fields, MessageKind, SignableMessage, Signed};
pub use snapshot::{DeviceConfigSnapshot, SecretState};
pub use validate::{normalize_free_water_amount, validate, Channel};
pub use value::{format_number, FieldValue};
