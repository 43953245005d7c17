//! ewater - command-line manager for eWater vending controllers
//!
//! Configures controllers over a serial cable or through the MQTT broker,
//! flashes firmware with esptool and serves OTA images.

mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use ewater_core::ApplyMode;
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::{ArgOverrides, Config};
use crate::output::{OutputContext, OutputFormat};

#[derive(Parser)]
#[command(name = "ewater")]
#[command(author, version, about = "eWater vending controller manager")]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "EWATER_CONFIG")]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    output: OutputFormat,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// Minimal output (for scripting)
    #[arg(short, long)]
    quiet: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(flatten)]
    broker: BrokerArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct BrokerArgs {
    /// MQTT broker host
    #[arg(long, env = "EWATER_BROKER", global = true)]
    broker: Option<String>,

    /// MQTT broker port
    #[arg(long, global = true)]
    mqtt_port: Option<u16>,

    /// MQTT username
    #[arg(long, global = true)]
    mqtt_user: Option<String>,

    /// MQTT password
    #[arg(long, env = "EWATER_MQTT_PASSWORD", global = true, hide_env_values = true)]
    mqtt_password: Option<String>,

    /// Secret for signing broker messages
    #[arg(long, env = "EWATER_API_SECRET", global = true, hide_env_values = true)]
    api_secret: Option<String>,
}

/// Where a configuration push goes
#[derive(Args)]
#[group(required = true, multiple = false)]
struct Target {
    /// Serial port of a cabled controller
    #[arg(long)]
    port: Option<String>,

    /// Device ID of an online controller
    #[arg(long)]
    device: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// List serial ports
    Ports,

    /// Read a controller's configuration over serial
    ReadConfig {
        /// Serial port
        port: String,

        /// Console baud rate
        #[arg(long)]
        baud: Option<u32>,
    },

    /// Push configuration changes to a controller
    Push {
        #[command(flatten)]
        target: Target,

        /// Field assignment, e.g. pricePerLiter=2500 (repeatable)
        #[arg(long = "set", value_name = "KEY=VALUE")]
        set: Vec<String>,

        /// JSON object of field values
        #[arg(long)]
        file: Option<PathBuf>,

        /// Apply mode: now or restart
        #[arg(long, value_parser = parse_apply_mode)]
        apply: Option<ApplyMode>,
    },

    /// Print the canonical form and signature of a message
    Sign {
        /// Message type: payment, config, command, ota
        #[arg(long = "type", value_name = "TYPE")]
        kind: String,

        /// Device ID
        #[arg(long)]
        device: String,

        /// Payload as a JSON object
        #[arg(long)]
        payload: String,
    },

    /// Flash firmware over a serial port with esptool
    Flash {
        /// Serial port
        port: String,

        /// Firmware image
        file: PathBuf,

        /// Flash baud rate (115200, 460800 or 921600)
        #[arg(long, value_parser = parse_flash_baud)]
        baud: Option<u32>,

        /// Write a full image at offset 0x0000
        #[arg(long, requires = "confirm")]
        full: bool,

        /// Acknowledgement phrase required by --full
        #[arg(long)]
        confirm: Option<String>,
    },

    /// Serve a firmware file for OTA updates until Ctrl+C
    Ota {
        /// Firmware image
        file: PathBuf,

        /// Tell this online device to download the image
        #[arg(long)]
        device: Option<String>,
    },

    /// Discover online controllers by heartbeat
    Devices {
        /// Seconds to listen before listing
        #[arg(long, default_value = "10")]
        wait: u64,
    },

    /// Stream a controller's output until Ctrl+C
    Monitor {
        #[command(flatten)]
        target: Target,
    },
}

fn parse_apply_mode(s: &str) -> Result<ApplyMode, String> {
    s.parse::<ApplyMode>().map_err(|e| e.to_string())
}

fn parse_flash_baud(s: &str) -> Result<u32, String> {
    let baud: u32 = s.parse().map_err(|_| format!("Invalid baud rate: {}", s))?;
    if ewater_firmware::FLASH_BAUD_PRESETS.contains(&baud) {
        Ok(baud)
    } else {
        Err(format!(
            "Unsupported baud rate {} (expected one of {:?})",
            baud,
            ewater_firmware::FLASH_BAUD_PRESETS
        ))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();

    // Load config file
    let config = if let Some(config_path) = &cli.config {
        Config::load_from(config_path)?
    } else {
        Config::load().unwrap_or_default()
    };

    let merged = config.merge_with_args(&ArgOverrides {
        broker: cli.broker.broker.clone(),
        mqtt_port: cli.broker.mqtt_port,
        mqtt_username: cli.broker.mqtt_user.clone(),
        mqtt_password: cli.broker.mqtt_password.clone(),
        api_secret: cli.broker.api_secret.clone(),
        no_color: cli.no_color,
    });

    tracing::debug!(
        broker = %merged.mqtt.host,
        signing = merged.api_secret.is_some(),
        "Configuration loaded"
    );

    let ctx = OutputContext::new(cli.output, merged.no_color, cli.quiet);

    match &cli.command {
        Commands::Ports => commands::ports(&ctx)?,

        Commands::ReadConfig { port, baud } => {
            commands::read_config(&merged, port, *baud, &ctx).await?;
        }

        Commands::Push {
            target,
            set,
            file,
            apply,
        } => {
            let draft = commands::build_draft(set, file.as_deref())?;
            match (&target.port, &target.device) {
                (Some(port), _) => {
                    commands::push_serial(&merged, port, &draft, *apply, &ctx).await?;
                }
                (None, Some(device)) => {
                    commands::push_online(
                        &merged,
                        device,
                        &draft,
                        apply.unwrap_or_default(),
                        &ctx,
                    )
                    .await?;
                }
                (None, None) => anyhow::bail!("Specify --port or --device"),
            }
        }

        Commands::Sign {
            kind,
            device,
            payload,
        } => commands::sign(&merged, kind, device, payload, &ctx)?,

        Commands::Flash {
            port,
            file,
            baud,
            full,
            confirm,
        } => {
            // Some(phrase) requests a full image; the phrase is checked later
            let full_image = full.then(|| confirm.as_deref().unwrap_or_default());
            commands::flash(&merged, port, file, *baud, full_image, &ctx).await?;
        }

        Commands::Ota { file, device } => {
            commands::ota(&merged, file, device.as_deref(), &ctx).await?;
        }

        Commands::Devices { wait } => commands::devices(&merged, *wait, &ctx).await?,

        Commands::Monitor { target } => match (&target.port, &target.device) {
            (Some(port), _) => commands::monitor_serial(&merged, port, &ctx).await?,
            (None, Some(device)) => commands::monitor_online(&merged, device, &ctx).await?,
            (None, None) => anyhow::bail!("Specify --port or --device"),
        },
    }

    Ok(())
}
