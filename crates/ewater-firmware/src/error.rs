//! Error types for flashing and OTA distribution

use std::path::PathBuf;

use thiserror::Error;

/// The host is missing something the flashing utility needs
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ToolchainError {
    #[error("Python with pyserial not found (tried: {tried})")]
    ToolchainNotFound { tried: String },

    #[error("esptool not found; install PlatformIO or esptool, or set ESPTOOL_PATH")]
    UtilityNotFound,
}

/// A flash request rejected before anything ran
#[derive(Debug, Error)]
pub enum FlashError {
    #[error("A flash is already in progress")]
    Busy,

    #[error("Firmware file not found: {0}")]
    FirmwareNotFound(PathBuf),

    #[error("Missing serial port")]
    MissingPort,
}

#[derive(Debug, Error)]
pub enum OtaError {
    #[error("Firmware file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Firmware path has no file name: {0}")]
    InvalidFileName(PathBuf),

    #[error("Failed to bind OTA server: {0}")]
    Bind(#[source] std::io::Error),

    #[error("Failed to build download URL: {0}")]
    Url(#[from] url::ParseError),
}
