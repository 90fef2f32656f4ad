//! Alpaca server and device discovery
//!
//! [`DiscoveryService`] talks to the management API of a known server;
//! [`ServerDiscovery`] finds servers on the local network over UDP.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tracing::{debug, warn};

use crate::config::AlpacaConfig;
use crate::error::Result;
use crate::identity::Endpoint;
use crate::io::{HttpClient, ReqwestHttpClient};
use crate::transport::{DeviceRecord, Transport};

pub const DISCOVERY_MSG: &[u8] = b"alpacadiscovery1";
pub const DEFAULT_DISCOVERY_PORT: u16 = 32227;

/// Reply to a discovery probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlpacaPort {
    #[serde(rename = "AlpacaPort")]
    pub alpaca_port: u16,
}

/// Management API queries used to fill device pickers
#[derive(Debug)]
pub struct DiscoveryService {
    transport: Transport,
}

impl DiscoveryService {
    pub fn new(transport: Transport) -> Self {
        Self { transport }
    }

    /// Build from configuration with the reqwest HTTP client
    pub fn from_config(config: &AlpacaConfig) -> Self {
        let http: Arc<dyn HttpClient> =
            Arc::new(ReqwestHttpClient::with_credentials(config.credentials()));
        let client_id = config.client_id.unwrap_or_else(rand::random);
        Self::new(
            Transport::new(http, client_id)
                .with_timeouts(config.request_timeout(), config.discovery_timeout()),
        )
    }

    /// API versions the server supports; empty when the server can't be asked
    pub async fn query_api_versions(&self, endpoint: &Endpoint) -> Vec<u32> {
        self.transport
            .discover_api_versions(endpoint)
            .await
            .unwrap_or_default()
    }

    /// Devices configured on the server; empty when the server can't be asked
    pub async fn query_configured_devices(&self, endpoint: &Endpoint) -> Vec<DeviceRecord> {
        let devices = self
            .transport
            .discover_devices(endpoint)
            .await
            .unwrap_or_default();
        debug!(
            "{} configured devices on {}",
            devices.len(),
            endpoint.server_url()
        );
        devices
    }

    /// Composite identities of the server's devices of one type
    pub async fn devices_of_type(&self, endpoint: &Endpoint, device_type: &str) -> Vec<String> {
        filter_by_type(&self.query_configured_devices(endpoint).await, device_type)
    }
}

/// Composite `"Name:Type:Number"` strings of the records whose type matches,
/// ignoring case
pub fn filter_by_type(records: &[DeviceRecord], device_type: &str) -> Vec<String> {
    records
        .iter()
        .filter(|record| record.device_type.eq_ignore_ascii_case(device_type))
        .map(DeviceRecord::composite)
        .collect()
}

/// UDP discovery of Alpaca servers
#[derive(Debug, Clone, Copy)]
pub struct ServerDiscovery {
    /// Port the probe is sent to
    pub discovery_port: u16,
    /// Where the probe is sent, the IPv4 broadcast address by default
    pub target: IpAddr,
    /// How long to wait for another reply before giving up
    pub timeout: Duration,
    /// Number of probes to send
    pub num_requests: usize,
}

impl Default for ServerDiscovery {
    fn default() -> Self {
        Self {
            discovery_port: DEFAULT_DISCOVERY_PORT,
            target: IpAddr::V4(Ipv4Addr::BROADCAST),
            timeout: Duration::from_secs(1),
            num_requests: 1,
        }
    }
}

impl ServerDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &AlpacaConfig) -> Self {
        Self {
            discovery_port: config.discovery_port,
            ..Self::default()
        }
    }

    /// Probe the network and return the announced server addresses
    pub async fn discover(&self) -> Result<Vec<SocketAddr>> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
        socket.set_broadcast(true)?;

        let mut found = Vec::new();
        let mut buf = [0u8; 64];
        for request_num in 0..self.num_requests {
            debug!(request_num, target = %self.target, "Sending discovery request");
            socket
                .send_to(DISCOVERY_MSG, (self.target, self.discovery_port))
                .await?;

            loop {
                let (len, src) =
                    match tokio::time::timeout(self.timeout, socket.recv_from(&mut buf)).await {
                        Ok(result) => result?,
                        Err(_) => {
                            debug!("No more discovery replies");
                            break;
                        }
                    };
                match serde_json::from_slice::<AlpacaPort>(&buf[..len]) {
                    Ok(AlpacaPort { alpaca_port }) => {
                        let addr = SocketAddr::new(src.ip(), alpaca_port);
                        if !found.contains(&addr) {
                            debug!(%addr, "Found Alpaca server");
                            found.push(addr);
                        }
                    }
                    Err(e) => warn!(%src, "Ignoring unexpected discovery reply: {}", e),
                }
            }
        }
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AlpacaError;
    use crate::io::{HttpResponse, MockHttpClient};

    fn record(name: &str, device_type: &str, number: u32) -> DeviceRecord {
        DeviceRecord {
            name: name.to_string(),
            device_type: device_type.to_string(),
            device_number: number,
            unique_id: String::new(),
        }
    }

    #[test]
    fn filter_by_type_ignores_case() {
        let records = [
            record("Camera Simulator", "Camera", 0),
            record("Dome Simulator", "Dome", 0),
            record("Guide Camera", "camera", 1),
        ];

        assert_eq!(
            filter_by_type(&records, "CAMERA"),
            vec![
                "Camera Simulator:Camera:0".to_string(),
                "Guide Camera:camera:1".to_string()
            ]
        );
        assert!(filter_by_type(&records, "focuser").is_empty());
    }

    fn service(body: &'static str) -> DiscoveryService {
        let mut mock = MockHttpClient::new();
        mock.expect_get().times(1).returning(move |_, _, _| {
            Box::pin(async move {
                Ok(HttpResponse {
                    status: 200,
                    body: body.to_string(),
                })
            })
        });
        DiscoveryService::new(Transport::new(Arc::new(mock), 3))
    }

    #[tokio::test]
    async fn configured_devices_by_type() {
        let service = service(
            r#"{"ErrorNumber":0,"ErrorMessage":"","Value":[
                {"DeviceName":"Sim","DeviceType":"Telescope","DeviceNumber":0,"UniqueID":"a"},
                {"DeviceName":"Sim","DeviceType":"Focuser","DeviceNumber":0,"UniqueID":"b"}]}"#,
        );

        assert_eq!(
            service
                .devices_of_type(&Endpoint::default(), "telescope")
                .await,
            vec!["Sim:Telescope:0".to_string()]
        );
    }

    #[tokio::test]
    async fn api_versions_empty_on_failure() {
        let mut mock = MockHttpClient::new();
        mock.expect_get().times(1).returning(|_, _, _| {
            Box::pin(async { Err(AlpacaError::Unreachable("refused".to_string())) })
        });
        let service = DiscoveryService::new(Transport::new(Arc::new(mock), 3));

        assert!(service
            .query_api_versions(&Endpoint::default())
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn api_versions_decoded() {
        let service = service(r#"{"ErrorNumber":0,"ErrorMessage":"","Value":[1]}"#);
        assert_eq!(
            service.query_api_versions(&Endpoint::default()).await,
            vec![1]
        );
    }

    async fn responder(reply: &'static [u8]) -> u16 {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = socket.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut buf = [0u8; 64];
            while let Ok((len, src)) = socket.recv_from(&mut buf).await {
                if &buf[..len] == DISCOVERY_MSG {
                    let _ = socket.send_to(reply, src).await;
                }
            }
        });
        port
    }

    fn local(discovery_port: u16, num_requests: usize) -> ServerDiscovery {
        ServerDiscovery {
            discovery_port,
            target: IpAddr::V4(Ipv4Addr::LOCALHOST),
            timeout: Duration::from_millis(200),
            num_requests,
        }
    }

    #[tokio::test]
    async fn discover_returns_announced_port() {
        let port = responder(br#"{"AlpacaPort":11111}"#).await;

        let found = local(port, 2).discover().await.unwrap();

        assert_eq!(found, vec!["127.0.0.1:11111".parse().unwrap()]);
    }

    #[tokio::test]
    async fn discover_ignores_garbage() {
        let port = responder(b"hello").await;

        assert!(local(port, 1).discover().await.unwrap().is_empty());
    }
}
