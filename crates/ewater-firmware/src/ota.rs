//! OTA distribution server
//!
//! Serves one firmware file over HTTP so a controller on the same network
//! can download it after receiving an `ota/in` command. At most one server
//! runs per [`OtaServer`]; starting again shuts the previous listener down
//! before binding the new one.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path as UrlPath, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use url::Url;

use crate::config::OtaConfig;
use crate::error::OtaError;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// A running server as seen by callers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtaSession {
    pub file: PathBuf,
    /// Bound listener address (ephemeral port)
    pub local_addr: SocketAddr,
    /// Download URL advertised to devices
    pub url: Url,
    /// False when no non-loopback IPv4 interface was found and the URL
    /// points at loopback, which a device cannot reach.
    pub reachable: bool,
}

impl OtaSession {
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// The URL-encoded path the file is served under, without the slash.
    pub fn encoded_name(&self) -> &str {
        self.url.path().trim_start_matches('/')
    }
}

struct Running {
    session: OtaSession,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl Running {
    async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if tokio::time::timeout(SHUTDOWN_GRACE, &mut self.handle)
            .await
            .is_err()
        {
            // open keep-alive connections; drop the listener regardless
            self.handle.abort();
            let _ = (&mut self.handle).await;
        }
    }
}

#[derive(Clone)]
struct ServedFile {
    name: String,
    path: PathBuf,
    encoded: String,
}

pub struct OtaServer {
    config: OtaConfig,
    running: Mutex<Option<Running>>,
}

impl OtaServer {
    pub fn new(config: OtaConfig) -> Self {
        Self {
            config,
            running: Mutex::new(None),
        }
    }

    /// Serve `file`, replacing any running server.
    pub async fn start(&self, file: &Path) -> Result<OtaSession, OtaError> {
        if !file.is_file() {
            return Err(OtaError::FileNotFound(file.to_path_buf()));
        }
        let name = file
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| OtaError::InvalidFileName(file.to_path_buf()))?
            .to_string();

        let mut running = self.running.lock().await;
        if let Some(previous) = running.take() {
            info!(url = %previous.session.url, "Stopping previous OTA server");
            previous.shutdown().await;
        }

        let listener = TcpListener::bind(SocketAddr::new(self.config.bind_address, 0))
            .await
            .map_err(OtaError::Bind)?;
        let local_addr = listener.local_addr().map_err(OtaError::Bind)?;

        let (host, reachable) = match self.config.advertise_host {
            Some(host) => (host, true),
            None => match reachable_ipv4(interface_addresses()) {
                Some(ip) => (IpAddr::V4(ip), true),
                None => {
                    warn!("No non-loopback IPv4 interface; OTA URL uses loopback and devices cannot reach it");
                    (IpAddr::V4(Ipv4Addr::LOCALHOST), false)
                }
            },
        };
        let url = download_url(host, local_addr.port(), &name)?;

        let served = Arc::new(ServedFile {
            encoded: url.path().trim_start_matches('/').to_string(),
            name,
            path: file.to_path_buf(),
        });
        let router = Router::new()
            .route("/", get(status))
            .route("/{file}", get(download))
            .layer(TraceLayer::new_for_http())
            .with_state(served);

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(e) = result {
                warn!(error = %e, "OTA server stopped with error");
            }
        });

        let session = OtaSession {
            file: file.to_path_buf(),
            local_addr,
            url,
            reachable,
        };
        info!(url = %session.url, reachable, "OTA server started");

        *running = Some(Running {
            session: session.clone(),
            shutdown_tx: Some(shutdown_tx),
            handle,
        });
        Ok(session)
    }

    /// Stop the server. Returns whether one was running.
    pub async fn stop(&self) -> bool {
        let previous = self.running.lock().await.take();
        match previous {
            Some(running) => {
                info!(url = %running.session.url, "Stopping OTA server");
                running.shutdown().await;
                true
            }
            None => false,
        }
    }

    pub async fn current(&self) -> Option<OtaSession> {
        self.running
            .lock()
            .await
            .as_ref()
            .map(|running| running.session.clone())
    }
}

impl Default for OtaServer {
    fn default() -> Self {
        Self::new(OtaConfig::default())
    }
}

impl Drop for OtaServer {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.handle.abort();
        }
    }
}

async fn status(State(file): State<Arc<ServedFile>>) -> String {
    format!("eWater OTA server running. Download: /{}", file.encoded)
}

async fn download(
    State(file): State<Arc<ServedFile>>,
    UrlPath(requested): UrlPath<String>,
) -> Response {
    if requested != file.name {
        return StatusCode::NOT_FOUND.into_response();
    }
    match tokio::fs::read(&file.path).await {
        Ok(bytes) => {
            info!(file = %file.name, bytes = bytes.len(), "Serving firmware");
            (
                [(header::CONTENT_TYPE, "application/octet-stream")],
                bytes,
            )
                .into_response()
        }
        Err(e) => {
            warn!(path = %file.path.display(), error = %e, "Firmware file unreadable");
            StatusCode::NOT_FOUND.into_response()
        }
    }
}

/// Build `http://<host>:<port>/<encoded name>`.
pub fn download_url(host: IpAddr, port: u16, file_name: &str) -> Result<Url, OtaError> {
    let mut url = Url::parse(&format!("http://{}/", SocketAddr::new(host, port)))?;
    url.path_segments_mut()
        .map_err(|_| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
        .pop_if_empty()
        .push(file_name);
    Ok(url)
}

/// First non-loopback IPv4 address, in interface order.
pub fn reachable_ipv4(addresses: impl IntoIterator<Item = IpAddr>) -> Option<Ipv4Addr> {
    addresses.into_iter().find_map(|addr| match addr {
        IpAddr::V4(v4) if !v4.is_loopback() && !v4.is_unspecified() => Some(v4),
        _ => None,
    })
}

fn interface_addresses() -> Vec<IpAddr> {
    match if_addrs::get_if_addrs() {
        Ok(interfaces) => interfaces
            .into_iter()
            .filter(|iface| !iface.is_loopback())
            .map(|iface| iface.ip())
            .collect(),
        Err(e) => {
            warn!(error = %e, "Failed to enumerate network interfaces");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reachable_ipv4_skips_loopback_and_v6() {
        let addrs: Vec<IpAddr> = vec![
            "127.0.0.1".parse().unwrap(),
            "fe80::1".parse().unwrap(),
            "192.168.1.20".parse().unwrap(),
            "10.0.0.5".parse().unwrap(),
        ];
        assert_eq!(reachable_ipv4(addrs), Some(Ipv4Addr::new(192, 168, 1, 20)));
    }

    #[test]
    fn test_reachable_ipv4_none() {
        let addrs: Vec<IpAddr> = vec!["127.0.0.1".parse().unwrap()];
        assert_eq!(reachable_ipv4(addrs), None);
    }

    #[test]
    fn test_download_url_encodes_name() {
        let url = download_url(
            IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20)),
            40123,
            "water v2#1.bin",
        )
        .unwrap();
        assert_eq!(url.as_str(), "http://192.168.1.20:40123/water%20v2%231.bin");
    }

    #[test]
    fn test_download_url_plain_name() {
        let url = download_url(IpAddr::V4(Ipv4Addr::LOCALHOST), 8080, "firmware.bin").unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:8080/firmware.bin");
    }
}
