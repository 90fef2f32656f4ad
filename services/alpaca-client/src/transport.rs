//! Alpaca request execution
//!
//! One call in, one classified result out. Every failure mode (timeout,
//! refused connection, bad HTTP status, undecodable body, `ErrorNumber != 0`)
//! is logged here at its own severity and surfaces as an [`AlpacaError`]
//! from the `try_*` methods, or as `None` from the absorbing variants.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::Instrument;

use crate::error::{AlpacaError, Result};
use crate::identity::{build_url, DeviceIdentity, Endpoint};
use crate::io::HttpClient;

/// Timeout for device API calls
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for management API calls
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Put,
}

/// Parsed Alpaca reply, device and management API alike
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    #[serde(rename = "ClientTransactionID", default)]
    pub client_transaction_id: Option<u32>,
    #[serde(rename = "ServerTransactionID", default)]
    pub server_transaction_id: Option<u32>,
    #[serde(rename = "ErrorNumber", default)]
    pub error_number: i32,
    #[serde(rename = "ErrorMessage", default)]
    pub error_message: String,
    #[serde(rename = "Value", default)]
    pub value: Value,
}

/// One entry of `/management/v{n}/configureddevices`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    #[serde(rename = "DeviceName")]
    pub name: String,
    #[serde(rename = "DeviceType")]
    pub device_type: String,
    #[serde(rename = "DeviceNumber")]
    pub device_number: u32,
    #[serde(rename = "UniqueID", default)]
    pub unique_id: String,
}

impl DeviceRecord {
    /// Composite `"Name:Type:Number"` identity string
    pub fn composite(&self) -> String {
        format!("{}:{}:{}", self.name, self.device_type, self.device_number)
    }
}

/// Stateless executor of Alpaca HTTP calls
pub struct Transport {
    http: Arc<dyn HttpClient>,
    client_id: u16,
    next_transaction_id: AtomicU32,
    request_timeout: Duration,
    discovery_timeout: Duration,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("client_id", &self.client_id)
            .field("request_timeout", &self.request_timeout)
            .field("discovery_timeout", &self.discovery_timeout)
            .finish_non_exhaustive()
    }
}

impl Transport {
    pub fn new(http: Arc<dyn HttpClient>, client_id: u16) -> Self {
        Self {
            http,
            client_id,
            next_transaction_id: AtomicU32::new(1),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
        }
    }

    pub fn with_timeouts(mut self, request_timeout: Duration, discovery_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self.discovery_timeout = discovery_timeout;
        self
    }

    pub fn client_id(&self) -> u16 {
        self.client_id
    }

    fn next_transaction_id(&self) -> u32 {
        self.next_transaction_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Execute one call and classify the outcome
    pub async fn execute(
        &self,
        method: Method,
        url: &str,
        params: &[(&str, String)],
        timeout: Duration,
    ) -> Result<ResponseEnvelope> {
        let client_transaction_id = self.next_transaction_id();
        let span = tracing::debug_span!(
            "alpaca_transaction",
            client_id = self.client_id,
            client_transaction_id,
        );

        async move {
            let result = self
                .execute_inner(method, url, params, timeout, client_transaction_id)
                .await;
            if let Err(e) = &result {
                log_failure(url, e);
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn execute_inner(
        &self,
        method: Method,
        url: &str,
        params: &[(&str, String)],
        timeout: Duration,
        client_transaction_id: u32,
    ) -> Result<ResponseEnvelope> {
        let mut wire: Vec<(String, String)> = params
            .iter()
            .map(|(key, value)| (key.to_string(), value.clone()))
            .collect();
        wire.push(("ClientID".to_string(), self.client_id.to_string()));
        wire.push((
            "ClientTransactionID".to_string(),
            client_transaction_id.to_string(),
        ));

        tracing::debug!("{:?} {} params={:?}", method, url, params);

        let response = match method {
            Method::Get => self.http.get(url, &wire, timeout).await?,
            Method::Put => self.http.put_form(url, &wire, timeout).await?,
        };

        if !(200..300).contains(&response.status) {
            return Err(AlpacaError::HttpStatus {
                status: response.status,
                body: response.body,
            });
        }

        let envelope: ResponseEnvelope = serde_json::from_str(&response.body)?;

        match envelope.client_transaction_id {
            Some(received) if received != client_transaction_id => {
                tracing::warn!(
                    "ClientTransactionID mismatch: sent {}, received {}",
                    client_transaction_id,
                    received
                );
            }
            _ => {}
        }

        if envelope.error_number != 0 {
            return Err(AlpacaError::Protocol {
                code: envelope.error_number,
                message: envelope.error_message,
            });
        }

        tracing::trace!(
            "Response server_transaction_id={:?} value={}",
            envelope.server_transaction_id,
            envelope.value
        );
        Ok(envelope)
    }

    /// GET a device attribute, returning its `Value`
    pub async fn try_get(
        &self,
        endpoint: &Endpoint,
        identity: &DeviceIdentity,
        attribute: &str,
        params: &[(&str, String)],
    ) -> Result<Value> {
        let url = build_url(endpoint, identity, attribute);
        self.execute(Method::Get, &url, params, self.request_timeout)
            .await
            .map(|envelope| envelope.value)
    }

    /// PUT a device attribute, returning the whole envelope
    pub async fn try_put(
        &self,
        endpoint: &Endpoint,
        identity: &DeviceIdentity,
        attribute: &str,
        params: &[(&str, String)],
    ) -> Result<ResponseEnvelope> {
        let url = build_url(endpoint, identity, attribute);
        self.execute(Method::Put, &url, params, self.request_timeout)
            .await
    }

    pub async fn get(
        &self,
        endpoint: &Endpoint,
        identity: &DeviceIdentity,
        attribute: &str,
        params: &[(&str, String)],
    ) -> Option<Value> {
        self.try_get(endpoint, identity, attribute, params)
            .await
            .ok()
    }

    pub async fn put(
        &self,
        endpoint: &Endpoint,
        identity: &DeviceIdentity,
        attribute: &str,
        params: &[(&str, String)],
    ) -> Option<ResponseEnvelope> {
        self.try_put(endpoint, identity, attribute, params)
            .await
            .ok()
    }

    /// `GET /management/apiversions`
    pub async fn discover_api_versions(&self, endpoint: &Endpoint) -> Option<Vec<u32>> {
        let url = endpoint.api_versions_url();
        let envelope = self
            .execute(Method::Get, &url, &[], self.discovery_timeout)
            .await
            .ok()?;
        decode_value(&url, envelope.value)
    }

    /// `GET /management/v{n}/configureddevices`
    pub async fn discover_devices(&self, endpoint: &Endpoint) -> Option<Vec<DeviceRecord>> {
        let url = endpoint.configured_devices_url();
        let envelope = self
            .execute(Method::Get, &url, &[], self.discovery_timeout)
            .await
            .ok()?;
        decode_value(&url, envelope.value)
    }
}

fn decode_value<T: serde::de::DeserializeOwned>(url: &str, value: Value) -> Option<T> {
    match serde_json::from_value(value) {
        Ok(decoded) => Some(decoded),
        Err(e) => {
            log_failure(url, &AlpacaError::Json(e));
            None
        }
    }
}

/// Log a failed call at the severity of its failure class
pub(crate) fn log_failure(context: &str, err: &AlpacaError) {
    match err {
        AlpacaError::Timeout(_) => tracing::info!("{}: {}", context, err),
        AlpacaError::Unreachable(_) | AlpacaError::HttpStatus { .. } => {
            tracing::debug!("{}: {}", context, err)
        }
        AlpacaError::Protocol { .. } | AlpacaError::UnsupportedProperty(_) => {
            tracing::warn!("{}: {}", context, err)
        }
        _ => tracing::error!("{}: {}", context, err),
    }
}
