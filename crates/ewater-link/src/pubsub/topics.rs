//! Controller topic layout: `vending/<device id>/<channel>`

const ROOT: &str = "vending";

/// Subscribes to heartbeats from every device.
pub const HEARTBEAT_WILDCARD: &str = "vending/+/heartbeat";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicKind {
    Heartbeat,
    StatusOut,
    LogOut,
    ConfigIn,
    OtaIn,
}

impl TopicKind {
    fn suffix(self) -> &'static str {
        match self {
            TopicKind::Heartbeat => "heartbeat",
            TopicKind::StatusOut => "status/out",
            TopicKind::LogOut => "log/out",
            TopicKind::ConfigIn => "config/in",
            TopicKind::OtaIn => "ota/in",
        }
    }

    const ALL: [TopicKind; 5] = [
        TopicKind::Heartbeat,
        TopicKind::StatusOut,
        TopicKind::LogOut,
        TopicKind::ConfigIn,
        TopicKind::OtaIn,
    ];
}

pub fn topic(device_id: &str, kind: TopicKind) -> String {
    format!("{}/{}/{}", ROOT, device_id, kind.suffix())
}

pub fn heartbeat(device_id: &str) -> String {
    topic(device_id, TopicKind::Heartbeat)
}

pub fn status_out(device_id: &str) -> String {
    topic(device_id, TopicKind::StatusOut)
}

pub fn log_out(device_id: &str) -> String {
    topic(device_id, TopicKind::LogOut)
}

pub fn config_in(device_id: &str) -> String {
    topic(device_id, TopicKind::ConfigIn)
}

pub fn ota_in(device_id: &str) -> String {
    topic(device_id, TopicKind::OtaIn)
}

/// Split a concrete topic into device id and kind.
///
/// Device ids never contain `/`, so the id is exactly the second level.
pub fn parse(topic: &str) -> Option<(&str, TopicKind)> {
    let rest = topic.strip_prefix(ROOT)?.strip_prefix('/')?;
    let (device_id, suffix) = rest.split_once('/')?;
    if device_id.is_empty() || device_id == "+" || device_id == "#" {
        return None;
    }
    TopicKind::ALL
        .into_iter()
        .find(|kind| kind.suffix() == suffix)
        .map(|kind| (device_id, kind))
}
