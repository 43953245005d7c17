//! Read and push controller configuration

use std::path::Path;

use anyhow::{bail, Context, Result};
use colored::Colorize;
use ewater_core::{ApplyMode, ConfigDraft, ConfigField};

use super::{connect_online, open_serial};
use crate::config::MergedConfig;
use crate::output::{ConfigRow, OutputContext};

/// Build a draft from an optional JSON file and `key=value` assignments.
///
/// Assignments are applied after the file, so they win.
pub fn build_draft(assignments: &[String], file: Option<&Path>) -> Result<ConfigDraft> {
    let mut draft = match file {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let value: serde_json::Value = serde_json::from_str(&content)
                .with_context(|| format!("Invalid JSON in {}", path.display()))?;
            let Some(object) = value.as_object() else {
                bail!("{} must contain a JSON object", path.display());
            };
            ConfigDraft::from_json(object)
        }
        None => ConfigDraft::new(),
    };

    for assignment in assignments {
        let (key, raw) = assignment
            .split_once('=')
            .with_context(|| format!("Expected KEY=VALUE, got '{}'", assignment))?;
        let field: ConfigField = key.trim().parse().map_err(anyhow::Error::msg)?;
        draft.set_from_str(field, raw)?;
    }

    if draft.is_empty() {
        bail!("Nothing to push; use --set or --file");
    }
    Ok(draft)
}

/// Read a controller's configuration over serial
pub async fn read_config(
    merged: &MergedConfig,
    port: &str,
    baud: Option<u32>,
    ctx: &OutputContext,
) -> Result<()> {
    ctx.info(&format!("Reading configuration from {}...", port));
    let (manager, session) = open_serial(merged, port, baud).await?;
    tokio::time::sleep(merged.serial.report_settle()).await;

    let snapshot = session.snapshot();
    manager.disconnect().await?;

    if !snapshot.has_read_config() {
        bail!("No configuration report received from {}", port);
    }
    ctx.print(&ConfigRow::from_snapshot(&snapshot));
    Ok(())
}

/// Push a draft over serial
pub async fn push_serial(
    merged: &MergedConfig,
    port: &str,
    draft: &ConfigDraft,
    apply: Option<ApplyMode>,
    ctx: &OutputContext,
) -> Result<()> {
    let (manager, session) = open_serial(merged, port, None).await?;
    tokio::time::sleep(merged.serial.report_settle()).await;
    if !session.snapshot().has_read_config() {
        ctx.warn("No configuration report received; every entered field will be sent");
    }

    let result = session.push(draft, apply).await;
    manager.disconnect().await?;
    let outcome = result?;

    for warning in &outcome.warnings {
        ctx.warn(warning);
    }
    if outcome.nothing_to_send() {
        ctx.info("No changes to send");
        return Ok(());
    }
    for line in &outcome.sent {
        ctx.info(&format!("  {} {}", "→".cyan(), line));
    }
    ctx.success(&format!("Sent {} command(s) to {}", outcome.sent.len(), port));
    Ok(())
}

/// Publish a draft to an online controller
pub async fn push_online(
    merged: &MergedConfig,
    device: &str,
    draft: &ConfigDraft,
    apply: ApplyMode,
    ctx: &OutputContext,
) -> Result<()> {
    let session = connect_online(merged, ctx).await?;
    session.select_device(device).await?;

    let result = session
        .push_config(draft, apply, merged.api_secret.as_deref())
        .await;
    session.disconnect().await?;
    let outcome = result?;

    for warning in &outcome.warnings {
        ctx.warn(warning);
    }
    ctx.print_kv(&[
        ("Topic", outcome.topic.clone()),
        ("Signed", if outcome.signed { "yes" } else { "no" }.to_string()),
    ]);
    ctx.success(&format!("Configuration published to {}", device));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ewater_core::FieldValue;
    use pretty_assertions::assert_eq;

    fn assignments(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_assignments_parse_by_kind() {
        let draft = build_draft(
            &assignments(&["pricePerLiter=2500", "enableFreeWater=on", "wifiSsid=Home"]),
            None,
        )
        .unwrap();

        assert_eq!(
            draft.get(ConfigField::PricePerLiter),
            Some(&FieldValue::Number(2500.0))
        );
        assert_eq!(
            draft.get(ConfigField::EnableFreeWater),
            Some(&FieldValue::Bool(true))
        );
        assert_eq!(
            draft.get(ConfigField::WifiSsid),
            Some(&FieldValue::Text("Home".to_string()))
        );
    }

    #[test]
    fn test_assignment_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("draft.json");
        std::fs::write(&path, r#"{"pricePerLiter": 1000, "sessionTimeout": 300}"#).unwrap();

        let draft = build_draft(&assignments(&["pricePerLiter=1200"]), Some(&path)).unwrap();
        assert_eq!(
            draft.get(ConfigField::PricePerLiter),
            Some(&FieldValue::Number(1200.0))
        );
        assert_eq!(
            draft.get(ConfigField::SessionTimeout),
            Some(&FieldValue::Number(300.0))
        );
    }

    #[test]
    fn test_rejects_bad_assignments() {
        assert!(build_draft(&assignments(&["pricePerLiter"]), None).is_err());
        assert!(build_draft(&assignments(&["noSuchField=1"]), None).is_err());
        assert!(build_draft(&assignments(&["pricePerLiter=abc"]), None).is_err());
    }

    #[test]
    fn test_empty_draft_is_an_error() {
        assert!(build_draft(&[], None).is_err());
    }

    #[test]
    fn test_file_must_hold_an_object() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("draft.json");
        std::fs::write(&path, "[1, 2]").unwrap();
        assert!(build_draft(&[], Some(&path)).is_err());
    }
}
