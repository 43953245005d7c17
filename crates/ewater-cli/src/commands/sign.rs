//! Sign command - canonical form and HMAC of a message

use anyhow::{bail, Context, Result};
use ewater_core::{FieldValue, Fields};

use crate::config::MergedConfig;
use crate::output::OutputContext;

/// Scalar entries of a JSON payload. Nested values are skipped since the
/// canonical form carries scalars only.
pub fn payload_fields(payload: &str) -> Result<Fields> {
    let value: serde_json::Value =
        serde_json::from_str(payload).context("Payload is not valid JSON")?;
    let Some(object) = value.as_object() else {
        bail!("Payload must be a JSON object");
    };

    Ok(object
        .iter()
        .filter_map(|(key, value)| Some((key.clone(), FieldValue::from_json(value)?)))
        .collect())
}

pub fn sign(
    merged: &MergedConfig,
    kind: &str,
    device_id: &str,
    payload: &str,
    ctx: &OutputContext,
) -> Result<()> {
    let fields = payload_fields(payload)?;
    let signed = ewater_core::sign(kind, device_id, Some(&fields), merged.api_secret.as_deref())?;

    ctx.print_kv(&[
        ("Canonical", signed.canonical),
        ("Signature", signed.signature),
    ]);
    Ok(())
}
