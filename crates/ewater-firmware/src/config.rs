//! Flash and OTA settings

use std::net::{IpAddr, Ipv4Addr};

use serde::{Deserialize, Serialize};

/// Baud rates offered for flashing
pub const FLASH_BAUD_PRESETS: [u32; 3] = [115_200, 460_800, 921_600];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlashConfig {
    #[serde(default = "default_flash_baud")]
    pub baud: u32,
}

fn default_flash_baud() -> u32 {
    460_800
}

impl Default for FlashConfig {
    fn default() -> Self {
        Self {
            baud: default_flash_baud(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtaConfig {
    /// Listen address; the port is always ephemeral
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,
    /// Host to put in the download URL instead of the detected interface
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advertise_host: Option<IpAddr>,
}

fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

impl Default for OtaConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            advertise_host: None,
        }
    }
}
