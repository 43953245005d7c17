//! Draft-to-device reconciliation
//!
//! [`reconcile`] compares a draft against the last-known snapshot and
//! yields an ordered [`ChangeSet`]. Two thin encoders turn a change set into
//! wire form: [`ChangeSet::to_serial`] for the line protocol and
//! [`ChangeSet::to_pubsub`] for a single JSON config payload. Both return
//! the snapshot as it will read once the device has applied the changes.

use crate::command::{ApplyMode, LineCommand, Verb};
use crate::draft::{ConfigDraft, SecretValue};
use crate::error::ValidationError;
use crate::field::ConfigField;
use crate::signing::Fields;
use crate::snapshot::{DeviceConfigSnapshot, SecretState};
use crate::validate::{normalized_value, validate, Channel};
use crate::value::FieldValue;

const FLOAT_TOLERANCE: f64 = 1e-9;

/// One logical change, before encoding.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    /// A plain field with its normalized value.
    Set(ConfigField, FieldValue),
    Wifi { ssid: String, password: SecretValue },
    Broker { host: String, port: FieldValue },
    MqttAuth { username: String, password: SecretValue },
    ApiSecret(SecretValue),
}

/// Ordered changes plus the warnings produced while deciding them.
#[derive(Debug, Clone)]
pub struct ChangeSet {
    pub changes: Vec<Change>,
    pub warnings: Vec<String>,
    base: DeviceConfigSnapshot,
}

/// Line-protocol output.
#[derive(Debug, Clone)]
pub struct SerialPlan {
    /// Operations in send order, ending with `SAVE_CONFIG`. Empty when
    /// nothing changed.
    pub commands: Vec<LineCommand>,
    pub warnings: Vec<String>,
    /// Snapshot after the commands apply.
    pub snapshot: DeviceConfigSnapshot,
}

/// Pub/sub output.
#[derive(Debug, Clone)]
pub struct PubSubPlan {
    /// Config payload fields, including `apply`, `nonce` and `ts`.
    pub fields: Fields,
    /// Number of configuration fields carried (excluding the envelope).
    pub field_count: usize,
    pub warnings: Vec<String>,
    pub snapshot: DeviceConfigSnapshot,
}

/// Decide what must be sent to bring the device in line with `draft`.
pub fn reconcile(
    snapshot: &DeviceConfigSnapshot,
    draft: &ConfigDraft,
    channel: Channel,
) -> Result<ChangeSet, ValidationError> {
    validate(draft, snapshot, channel)?;

    let mut set = ChangeSet {
        changes: Vec::new(),
        warnings: Vec::new(),
        base: snapshot.clone(),
    };

    reconcile_pair(
        &mut set,
        draft,
        snapshot,
        ConfigField::WifiSsid,
        ConfigField::WifiPassword,
    )?;
    reconcile_broker(&mut set, draft, snapshot, channel)?;
    reconcile_pair(
        &mut set,
        draft,
        snapshot,
        ConfigField::MqttUsername,
        ConfigField::MqttPassword,
    )?;

    for field in ConfigField::ALL {
        if matches!(
            field,
            ConfigField::WifiSsid
                | ConfigField::WifiPassword
                | ConfigField::MqttBroker
                | ConfigField::MqttPort
                | ConfigField::MqttUsername
                | ConfigField::MqttPassword
        ) {
            continue;
        }

        if field == ConfigField::ApiSecret {
            if let Some(secret) = draft.secret(field) {
                set.changes.push(Change::ApiSecret(secret.clone()));
            }
            continue;
        }

        let Some(value) = draft.get(field) else {
            continue;
        };
        let value = normalized_value(field, value);
        if !differs(snapshot.get(field), &value) {
            continue;
        }
        if field == ConfigField::GroupId && value.as_str().is_some_and(str::is_empty) {
            set.warnings
                .push("Group ID cannot be cleared; leaving it unchanged".to_string());
            continue;
        }
        set.changes.push(Change::Set(field, value));
    }

    tracing::debug!(
        changes = set.changes.len(),
        warnings = set.warnings.len(),
        "Reconciled draft against snapshot"
    );
    Ok(set)
}

/// Pairing rule for an identifier and its secret (ssid/password,
/// username/password).
fn reconcile_pair(
    set: &mut ChangeSet,
    draft: &ConfigDraft,
    snapshot: &DeviceConfigSnapshot,
    identifier: ConfigField,
    secret: ConfigField,
) -> Result<(), ValidationError> {
    // A blank identifier is the same as leaving it out
    let drafted = draft
        .get(identifier)
        .and_then(FieldValue::as_str)
        .filter(|s| !s.is_empty());
    let effective = drafted
        .or_else(|| snapshot.text(identifier))
        .filter(|s| !s.is_empty());

    if let Some(password) = draft.secret(secret) {
        let name = effective
            .ok_or(ValidationError::MissingPairedIdentifier { secret, identifier })?
            .to_string();
        set.changes.push(match identifier {
            ConfigField::WifiSsid => Change::Wifi {
                ssid: name,
                password: password.clone(),
            },
            _ => Change::MqttAuth {
                username: name,
                password: password.clone(),
            },
        });
        return Ok(());
    }

    let Some(drafted) = drafted else {
        return Ok(());
    };
    let unchanged = snapshot.has_read_config() && snapshot.text(identifier) == Some(drafted);
    if !unchanged {
        return Err(ValidationError::UnpairedIdentifierChange { identifier, secret });
    }

    set.warnings.push(format!(
        "{} unchanged and no {} entered; keeping the device's current credentials",
        identifier, secret
    ));
    Ok(())
}

/// Broker host and port. `SET_MQTT` needs both, so on serial they travel
/// together; the config payload takes each one on its own.
fn reconcile_broker(
    set: &mut ChangeSet,
    draft: &ConfigDraft,
    snapshot: &DeviceConfigSnapshot,
    channel: Channel,
) -> Result<(), ValidationError> {
    let host = draft.get(ConfigField::MqttBroker);
    let port = draft.get(ConfigField::MqttPort);

    let host_changed = host.is_some_and(|v| differs(snapshot.get(ConfigField::MqttBroker), v));
    let port_changed = port.is_some_and(|v| differs(snapshot.get(ConfigField::MqttPort), v));
    if !host_changed && !port_changed {
        return Ok(());
    }

    if channel == Channel::PubSub {
        for (field, value, changed) in [
            (ConfigField::MqttBroker, host, host_changed),
            (ConfigField::MqttPort, port, port_changed),
        ] {
            if let (Some(value), true) = (value, changed) {
                set.changes.push(Change::Set(field, value.clone()));
            }
        }
        return Ok(());
    }

    let host = host
        .or_else(|| snapshot.get(ConfigField::MqttBroker))
        .and_then(FieldValue::as_str)
        .filter(|h| !h.is_empty())
        .ok_or(ValidationError::MissingCompanion {
            field: ConfigField::MqttPort,
            companion: ConfigField::MqttBroker,
        })?;
    let port = port
        .or_else(|| snapshot.get(ConfigField::MqttPort))
        .cloned()
        .ok_or(ValidationError::MissingCompanion {
            field: ConfigField::MqttBroker,
            companion: ConfigField::MqttPort,
        })?;

    set.changes.push(Change::Broker {
        host: host.to_string(),
        port,
    });
    Ok(())
}

fn differs(current: Option<&FieldValue>, wanted: &FieldValue) -> bool {
    match (current, wanted) {
        (None, _) => true,
        (Some(FieldValue::Number(a)), FieldValue::Number(b)) => (a - b).abs() > FLOAT_TOLERANCE,
        (Some(current), wanted) => current != wanted,
    }
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Encode for the line protocol.
    pub fn to_serial(&self) -> SerialPlan {
        let mut snapshot = self.base.clone();
        let mut commands: Vec<LineCommand> = self
            .changes
            .iter()
            .map(|change| {
                apply_to_snapshot(&mut snapshot, change);
                line_command(change)
            })
            .collect();

        if !commands.is_empty() {
            commands.push(LineCommand::new(Verb::SaveConfig));
        }

        SerialPlan {
            commands,
            warnings: self.warnings.clone(),
            snapshot,
        }
    }

    /// Encode as a pub/sub config payload.
    ///
    /// Fields the firmware only accepts over serial are dropped with a
    /// warning.
    pub fn to_pubsub(&self, apply: ApplyMode, nonce: &str, ts: i64) -> PubSubPlan {
        let mut snapshot = self.base.clone();
        let mut warnings = self.warnings.clone();
        let mut fields = Fields::new();
        let mut network = false;

        for change in &self.changes {
            let entries: Vec<(ConfigField, FieldValue)> = match change {
                Change::Set(field, value) => vec![(*field, value.clone())],
                Change::Wifi { ssid, password } => vec![
                    (ConfigField::WifiSsid, FieldValue::from(ssid.as_str())),
                    (ConfigField::WifiPassword, FieldValue::from(password.expose())),
                ],
                Change::Broker { host, port } => vec![
                    (ConfigField::MqttBroker, FieldValue::from(host.as_str())),
                    (ConfigField::MqttPort, port.clone()),
                ],
                Change::MqttAuth { username, password } => vec![
                    (ConfigField::MqttUsername, FieldValue::from(username.as_str())),
                    (ConfigField::MqttPassword, FieldValue::from(password.expose())),
                ],
                Change::ApiSecret(_) => vec![(ConfigField::ApiSecret, FieldValue::Bool(true))],
            };

            if let Some((field, _)) = entries.iter().find(|(f, _)| !f.accepted_over_pubsub()) {
                warnings.push(format!("{} can only be changed over serial; skipped", field));
                continue;
            }

            network |= entries.iter().any(|(f, _)| f.is_network());
            apply_to_snapshot(&mut snapshot, change);
            for (field, value) in entries {
                fields.insert(field.key().to_string(), value);
            }
        }

        if network && self.base.flag(ConfigField::AllowRemoteNetcfg) == Some(false) {
            warnings.push(
                "Device reports remote network config disabled; network fields will be ignored"
                    .to_string(),
            );
        }

        let field_count = fields.len();
        fields.insert("apply".to_string(), FieldValue::from(apply.as_str()));
        fields.insert("nonce".to_string(), FieldValue::from(nonce));
        fields.insert("ts".to_string(), FieldValue::from(ts));

        PubSubPlan {
            fields,
            field_count,
            warnings,
            snapshot,
        }
    }
}

fn line_command(change: &Change) -> LineCommand {
    match change {
        Change::Set(field, value) => LineCommand::new(field.verb()).with_arg(value.to_line_arg()),
        Change::Wifi { ssid, password } => LineCommand::new(Verb::SetWifi)
            .with_arg(ssid.as_str())
            .with_arg(password.expose()),
        Change::Broker { host, port } => LineCommand::new(Verb::SetMqtt)
            .with_arg(host.as_str())
            .with_arg(port.to_line_arg()),
        Change::MqttAuth { username, password } => LineCommand::new(Verb::SetMqttAuth)
            .with_arg(username.as_str())
            .with_arg(password.expose()),
        Change::ApiSecret(secret) => LineCommand::new(Verb::SetApiSecret).with_arg(secret.expose()),
    }
}

fn apply_to_snapshot(snapshot: &mut DeviceConfigSnapshot, change: &Change) {
    match change {
        Change::Set(field, value) => snapshot.set(*field, value.clone()),
        Change::Wifi { ssid, .. } => {
            snapshot.set(ConfigField::WifiSsid, FieldValue::from(ssid.as_str()));
            snapshot.set_secret_state(ConfigField::WifiPassword, SecretState::Set);
        }
        Change::Broker { host, port } => {
            snapshot.set(ConfigField::MqttBroker, FieldValue::from(host.as_str()));
            snapshot.set(ConfigField::MqttPort, port.clone());
        }
        Change::MqttAuth { username, .. } => {
            snapshot.set(ConfigField::MqttUsername, FieldValue::from(username.as_str()));
            snapshot.set_secret_state(ConfigField::MqttPassword, SecretState::Set);
        }
        Change::ApiSecret(_) => {
            snapshot.set_secret_state(ConfigField::ApiSecret, SecretState::Set);
        }
    }
}
