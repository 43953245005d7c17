//! Serial session driven through the connection manager

use std::sync::Arc;
use std::time::Duration;

use ewater_core::{ConfigDraft, ConfigField, SecretState};
use ewater_link::transport::mock::MockConnector;
use ewater_link::{LineTransport, SerialConfig, SerialManager, SerialSession};
use pretty_assertions::assert_eq;

fn report() -> Vec<String> {
    [
        "  SSID: Shop",
        "  Password: ********",
        "  Broker: 10.0.0.2",
        "  Port: 1883",
        "  Price per Liter: 1000",
        "  Free Water Amount: 250 ml",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn config() -> SerialConfig {
    SerialConfig {
        report_settle_ms: 50,
        dispatch_delay_ms: 5,
        ..SerialConfig::default()
    }
}

#[tokio::test]
async fn test_read_then_push_only_changes() {
    let connector = Arc::new(MockConnector::new());
    let manager = SerialManager::new(connector.clone());

    let transport = manager.connect("/dev/ttyUSB0", 115_200).await.unwrap();
    let mock = connector.opened()[0].clone();
    mock.respond_to("GET_CONFIG", report());

    let session = SerialSession::new(transport, config());
    let snapshot = session.read_config().await.unwrap();
    assert_eq!(
        snapshot.secret_state(ConfigField::WifiPassword),
        SecretState::Set
    );

    // same SSID and free water (0.25 L entered as 250 ml), new price
    let draft = ConfigDraft::new()
        .with(ConfigField::WifiSsid, "Shop")
        .with(ConfigField::FreeWaterAmount, 250i64)
        .with(ConfigField::PricePerLiter, 1200i64);
    let outcome = session.push(&draft, None).await.unwrap();

    assert_eq!(outcome.sent, vec!["SET_PRICE:1200", "SAVE_CONFIG"]);
    assert_eq!(
        mock.written(),
        vec!["GET_CONFIG", "SET_PRICE:1200", "SAVE_CONFIG"]
    );
}

#[tokio::test]
async fn test_new_connection_discards_previous_snapshot() {
    let connector = Arc::new(MockConnector::new());
    let manager = SerialManager::new(connector.clone());

    let transport = manager.connect("/dev/ttyUSB0", 115_200).await.unwrap();
    connector.opened()[0].respond_to("GET_CONFIG", report());
    let session = SerialSession::new(transport, config());
    session.read_config().await.unwrap();
    assert!(session.snapshot().has_read_config());

    manager.connect("/dev/ttyUSB1", 115_200).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(session.snapshot().is_empty());
    assert!(!connector.opened()[0].is_open());
}
