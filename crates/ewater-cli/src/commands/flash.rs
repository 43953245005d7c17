//! Flash command - wired firmware update with esptool

use std::path::Path;

use anyhow::{bail, Result};
use ewater_firmware::{
    FlashEvent, FlashImage, FlashOrchestrator, FlashOutcome, FlashRequest, FlashState,
    FullImageConfirmation, FULL_IMAGE_ACKNOWLEDGEMENT,
};
use indicatif::{ProgressBar, ProgressStyle};

use crate::config::MergedConfig;
use crate::output::OutputContext;

/// Flash `file` to the controller on `port`.
///
/// `full_image` carries the acknowledgement phrase when a full image at
/// offset 0 was requested.
pub async fn flash(
    merged: &MergedConfig,
    port: &str,
    file: &Path,
    baud: Option<u32>,
    full_image: Option<&str>,
    ctx: &OutputContext,
) -> Result<()> {
    let image = match full_image {
        Some(phrase) => match FullImageConfirmation::from_phrase(phrase) {
            Some(confirmation) => FlashImage::Full(confirmation),
            None => bail!(
                "Full image flashing overwrites the bootloader; pass --confirm \"{}\"",
                FULL_IMAGE_ACKNOWLEDGEMENT
            ),
        },
        None => FlashImage::Application,
    };
    let request = FlashRequest::application(file, port)
        .with_baud(baud.unwrap_or(merged.flash.baud))
        .with_image(image);

    let orchestrator = FlashOrchestrator::system();

    ctx.info(&format!(
        "Flashing {} to {} at {} ({} baud)...",
        file.display(),
        port,
        request.image.offset_arg(),
        request.baud
    ));
    let mut job = orchestrator.start(request)?;

    let pb = if ctx.quiet {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(100)
    };
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}% {msg}")?
            .progress_chars("=>-"),
    );

    let mut outcome = None;
    while let Some(event) = job.next_event().await {
        match event {
            FlashEvent::State(FlashState::Preparing) => pb.set_message("Preparing..."),
            FlashEvent::State(FlashState::Flashing) => pb.set_message("Flashing..."),
            FlashEvent::State(_) => {}
            FlashEvent::Progress { percent, message } => {
                if let Some(percent) = percent {
                    pb.set_position(u64::from(percent));
                }
                pb.set_message(message);
            }
            FlashEvent::Finished(result) => outcome = Some(result),
        }
    }

    match outcome {
        Some(FlashOutcome::Succeeded) => {
            pb.finish_with_message("Done");
            ctx.success("Firmware flashed successfully");
            Ok(())
        }
        Some(FlashOutcome::Failed(failure)) => {
            pb.abandon_with_message("Failed");
            bail!("Flash failed: {}", failure)
        }
        None => {
            pb.abandon();
            bail!("Flash job ended without an outcome")
        }
    }
}
