//! ewater-firmware - firmware delivery for eWater vending controllers
//!
//! Two paths onto a controller:
//!
//! - **Wired**: [`FlashOrchestrator`] runs esptool against a serial port,
//!   streaming progress and reporting exactly one outcome.
//! - **OTA**: [`OtaServer`] serves a firmware file over HTTP; the device is
//!   told where to fetch it through an `ota/in` message.
//!
//! ```text
//!   FlashRequest ─► Preparing (release port, resolve python/esptool)
//!                     └─► Flashing (esptool ... write_flash -z <offset>)
//!                           └─► Progress* ─► Finished(outcome)
//!
//!   firmware.bin ─► OtaServer::start ─► http://<lan ip>:<port>/<name>
//! ```

pub mod config;
pub mod error;
pub mod flash;
pub mod ota;
pub mod progress;
pub mod toolchain;

pub use config::{FlashConfig, OtaConfig, FLASH_BAUD_PRESETS};
pub use error::{FlashError, OtaError, ToolchainError};
pub use flash::{
    FlashEvent, FlashFailure, FlashImage, FlashJob, FlashOrchestrator, FlashOutcome, FlashRequest,
    FlashState, FullImageConfirmation, FULL_IMAGE_ACKNOWLEDGEMENT,
};
pub use ota::{OtaServer, OtaSession};
pub use progress::parse_progress;
pub use toolchain::{Probe, StaticProbe, SystemProbe, Toolchain, ToolchainEnv};
