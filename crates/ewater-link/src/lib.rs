//! ewater-link - device links for eWater vending controllers
//!
//! Moves configuration between the host and a controller over two
//! transports: the controller's serial console (line protocol) and an MQTT
//! broker (JSON payloads, optionally signed).
//!
//! # Architecture
//!
//! ```text
//!                    ┌──────────────────────────────┐
//!                    │        SerialSession         │
//!   ConfigDraft ───► │ reconcile ─► DispatchSequence│ ──► LineTransport ──► /dev/ttyUSB0
//!                    │ snapshot ◄── report lines    │ ◄──      (serial | mock)
//!                    └──────────────────────────────┘
//!                    ┌──────────────────────────────┐
//!   ConfigDraft ───► │        OnlineSession         │ ──► PubSubClient ───► broker
//!   firmware URL ──► │ sign ─► vending/<id>/…/in    │ ◄──      (mqtt | mock)
//!                    │ registry ◄── heartbeat/logs  │
//!                    └──────────────────────────────┘
//! ```

pub mod config;
pub mod dispatch;
pub mod pubsub;
pub mod session;
pub mod transport;

pub use config::{MqttConfig, SerialConfig};
pub use dispatch::{DispatchError, DispatchReport, DispatchSequence};
pub use pubsub::{OnlineError, OnlineSession, PubSubClient, PubSubError};
pub use session::{PushOutcome, SerialSession, SessionError};
pub use transport::{
    LineConnector, LineTransport, LinkEvent, PortInfo, PortRelease, SerialManager, TransportError,
};
