//! Single-owner serial connection manager
//!
//! The process holds at most one serial link. Connecting again closes the
//! previous link first, whatever port it was on.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{LineConnector, LineTransport, PortRelease, TransportError};

pub struct SerialManager {
    connector: Arc<dyn LineConnector>,
    current: Mutex<Option<Arc<dyn LineTransport>>>,
}

impl SerialManager {
    pub fn new(connector: Arc<dyn LineConnector>) -> Self {
        Self {
            connector,
            current: Mutex::new(None),
        }
    }

    /// Open `port`, closing any link held before.
    pub async fn connect(
        &self,
        port: &str,
        baud: u32,
    ) -> Result<Arc<dyn LineTransport>, TransportError> {
        let mut current = self.current.lock().await;
        if let Some(previous) = current.take() {
            tracing::info!(port = %previous.port_name(), "Closing previous serial connection");
            if let Err(e) = previous.close().await {
                tracing::warn!(
                    port = %previous.port_name(),
                    error = %e,
                    "Error closing previous serial connection"
                );
            }
        }

        let transport = self.connector.open(port, baud).await?;
        *current = Some(transport.clone());
        Ok(transport)
    }

    /// Close the active link, if any.
    pub async fn disconnect(&self) -> Result<(), TransportError> {
        let previous = self.current.lock().await.take();
        match previous {
            Some(transport) => transport.close().await,
            None => Ok(()),
        }
    }

    pub async fn current(&self) -> Option<Arc<dyn LineTransport>> {
        self.current.lock().await.clone()
    }
}

#[async_trait]
impl PortRelease for SerialManager {
    async fn release(&self, port: &str) -> bool {
        let mut current = self.current.lock().await;
        let holds_port = current
            .as_ref()
            .is_some_and(|transport| transport.port_name() == port);
        if !holds_port {
            return false;
        }

        if let Some(transport) = current.take() {
            if let Err(e) = transport.close().await {
                tracing::warn!(port, error = %e, "Error closing port before release");
            }
        }
        tracing::info!(port, "Serial port released");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockConnector;

    #[tokio::test]
    async fn test_connect_closes_previous_link() {
        let connector = Arc::new(MockConnector::new());
        let manager = SerialManager::new(connector.clone());

        let first = manager.connect("/dev/ttyUSB0", 115_200).await.unwrap();
        let second = manager.connect("/dev/ttyUSB1", 115_200).await.unwrap();

        assert!(!first.is_open());
        assert!(second.is_open());
        assert_eq!(connector.opened().len(), 2);
        assert_eq!(
            manager.current().await.map(|t| t.port_name().to_string()),
            Some("/dev/ttyUSB1".to_string())
        );
    }

    #[tokio::test]
    async fn test_failed_close_does_not_block_new_connection() {
        let connector = Arc::new(MockConnector::new());
        let manager = SerialManager::new(connector.clone());

        manager.connect("/dev/ttyUSB0", 115_200).await.unwrap();
        connector.opened()[0].fail_on_close();

        let second = manager.connect("/dev/ttyUSB1", 115_200).await.unwrap();
        assert!(second.is_open());
        assert_eq!(
            manager.current().await.map(|t| t.port_name().to_string()),
            Some("/dev/ttyUSB1".to_string())
        );
    }

    #[tokio::test]
    async fn test_release_only_matching_port() {
        let manager = SerialManager::new(Arc::new(MockConnector::new()));
        let link = manager.connect("/dev/ttyUSB0", 115_200).await.unwrap();

        assert!(!manager.release("/dev/ttyACM0").await);
        assert!(link.is_open());

        assert!(manager.release("/dev/ttyUSB0").await);
        assert!(!link.is_open());
        assert!(manager.current().await.is_none());
    }

    #[tokio::test]
    async fn test_disconnect_without_link() {
        let manager = SerialManager::new(Arc::new(MockConnector::new()));
        assert!(manager.disconnect().await.is_ok());
    }
}
