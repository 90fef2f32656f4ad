//! Supervised connection to one Alpaca device
//!
//! [`ConnectionManager`] owns the device identity, the server endpoint and
//! the `server_connected`/`device_connected` flags. It runs the bounded
//! connect handshake, starts the poll loops once the device answers, and
//! wraps every property call with the exception cache so unsupported
//! attributes stop reaching the network.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

use crate::config::{AlpacaConfig, ConnectConfig};
use crate::data::{DataRefresh, DeviceData, NoRefresh};
use crate::error::{AlpacaError, Result};
use crate::events::{ConnectionEvent, MessageLevel};
use crate::exceptions::PropertyExceptionCache;
use crate::identity::{DeviceIdentity, Endpoint};
use crate::io::{HttpClient, ReqwestHttpClient};
use crate::polling::{PollTask, PollingScheduler};
use crate::transport::{ResponseEnvelope, Transport};

/// Lifecycle phase of the connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LinkState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// The last connect attempt exhausted its retries
    Error,
}

/// Supervised connectivity flags
///
/// `device_connected` implies `server_connected`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionState {
    pub server_connected: bool,
    pub device_connected: bool,
    pub link: LinkState,
}

struct Shared {
    transport: Transport,
    endpoint: RwLock<Endpoint>,
    identity: RwLock<DeviceIdentity>,
    state: RwLock<ConnectionState>,
    exceptions: PropertyExceptionCache,
    scheduler: PollingScheduler,
    events: broadcast::Sender<ConnectionEvent>,
    data: DeviceData,
    refresh: Arc<dyn DataRefresh>,
    connect: ConnectConfig,
}

/// Handle to one supervised Alpaca device. Clones share the same connection.
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("transport", &self.shared.transport)
            .field("scheduler", &self.shared.scheduler)
            .finish_non_exhaustive()
    }
}

/// Builder for [`ConnectionManager`]
pub struct ConnectionManagerBuilder {
    config: AlpacaConfig,
    http: Option<Arc<dyn HttpClient>>,
    refresh: Option<Arc<dyn DataRefresh>>,
    data: Option<DeviceData>,
}

impl ConnectionManagerBuilder {
    pub fn new(config: AlpacaConfig) -> Self {
        Self {
            config,
            http: None,
            refresh: None,
            data: None,
        }
    }

    /// Use a custom HTTP client instead of reqwest
    pub fn http_client(mut self, http: Arc<dyn HttpClient>) -> Self {
        self.http = Some(http);
        self
    }

    /// Hook invoked on every data tick while the device is connected
    pub fn data_refresh(mut self, refresh: Arc<dyn DataRefresh>) -> Self {
        self.refresh = Some(refresh);
        self
    }

    /// Share an existing value map instead of creating a new one
    pub fn data(mut self, data: DeviceData) -> Self {
        self.data = Some(data);
        self
    }

    pub fn build(self) -> ConnectionManager {
        let config = self.config;
        let http: Arc<dyn HttpClient> = match self.http {
            Some(http) => http,
            None => Arc::new(ReqwestHttpClient::with_credentials(config.credentials())),
        };
        let client_id = config.client_id.unwrap_or_else(rand::random);
        let transport = Transport::new(http, client_id)
            .with_timeouts(config.request_timeout(), config.discovery_timeout());

        let mut identity = DeviceIdentity::default();
        if !config.device_name.is_empty() {
            identity.assign(&config.device_name);
        }

        let (events, _) = broadcast::channel(100);
        debug!("Created connection manager with ClientID {}", client_id);

        ConnectionManager {
            shared: Arc::new(Shared {
                transport,
                endpoint: RwLock::new(config.endpoint()),
                identity: RwLock::new(identity),
                state: RwLock::new(ConnectionState::default()),
                exceptions: PropertyExceptionCache::new(),
                scheduler: PollingScheduler::new(
                    Duration::from_millis(config.polling.status_interval_ms),
                    Duration::from_millis(config.polling.data_interval_ms),
                ),
                events,
                data: self.data.unwrap_or_default(),
                refresh: self.refresh.unwrap_or_else(|| Arc::new(NoRefresh)),
                connect: config.connect,
            }),
        }
    }
}

impl ConnectionManager {
    /// Create a manager using the reqwest HTTP client and no data hook
    pub fn new(config: AlpacaConfig) -> Self {
        Self::builder(config).build()
    }

    pub fn builder(config: AlpacaConfig) -> ConnectionManagerBuilder {
        ConnectionManagerBuilder::new(config)
    }

    /// Subscribe to connection events
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.shared.events.subscribe()
    }

    pub fn client_id(&self) -> u16 {
        self.shared.transport.client_id()
    }

    /// The value map written by the data refresh hook
    pub fn data(&self) -> &DeviceData {
        &self.shared.data
    }

    pub fn exceptions(&self) -> &PropertyExceptionCache {
        &self.shared.exceptions
    }

    pub async fn state(&self) -> ConnectionState {
        *self.shared.state.read().await
    }

    pub async fn is_server_connected(&self) -> bool {
        self.shared.state.read().await.server_connected
    }

    pub async fn is_device_connected(&self) -> bool {
        self.shared.state.read().await.device_connected
    }

    pub async fn is_polling(&self) -> bool {
        self.shared.scheduler.is_running().await
    }

    pub async fn identity(&self) -> DeviceIdentity {
        self.shared.identity.read().await.clone()
    }

    /// Select the device from a composite `"Name:Type:Number"` string.
    ///
    /// A string that does not have that shape only replaces the name; the
    /// previous type and number stay in place.
    pub async fn set_device_name(&self, composite: &str) {
        self.shared.identity.write().await.assign(composite);
    }

    pub async fn endpoint(&self) -> Endpoint {
        self.shared.endpoint.read().await.clone()
    }

    pub async fn set_endpoint(&self, endpoint: Endpoint) {
        *self.shared.endpoint.write().await = endpoint;
    }

    /// `{protocol}://{host}:{port}/api/v{n}/{type}/{number}`
    pub async fn base_url(&self) -> String {
        let (endpoint, identity) = self.target().await;
        endpoint.device_url(&identity)
    }

    async fn target(&self) -> (Endpoint, DeviceIdentity) {
        (self.endpoint().await, self.identity().await)
    }

    fn emit(&self, event: ConnectionEvent) {
        debug!("Event: {}", event);
        let _ = self.shared.events.send(event);
    }

    fn message(&self, text: String, level: MessageLevel) {
        self.emit(ConnectionEvent::Message { text, level });
    }

    /// Read a device attribute.
    ///
    /// Returns `None` without touching the network when no device is
    /// selected or the attribute is already known to be unsupported.
    pub async fn get_property(&self, attribute: &str, params: &[(&str, String)]) -> Option<Value> {
        self.try_get_property(attribute, params).await.ok()
    }

    /// Like [`Self::get_property`], keeping the reason for a missing value
    pub async fn try_get_property(
        &self,
        attribute: &str,
        params: &[(&str, String)],
    ) -> Result<Value> {
        let (endpoint, identity) = self.target().await;
        self.check_call(&identity, attribute).await?;

        let result = self
            .shared
            .transport
            .try_get(&endpoint, &identity, attribute, params)
            .await;
        if let Err(e) = &result {
            self.note_failure(attribute, e).await;
        }
        result
    }

    /// Read a device attribute and decode its value
    pub async fn get_property_as<T: DeserializeOwned>(
        &self,
        attribute: &str,
        params: &[(&str, String)],
    ) -> Option<T> {
        let value = self.get_property(attribute, params).await?;
        match serde_json::from_value(value) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                warn!("Unexpected value type for '{}': {}", attribute, e);
                None
            }
        }
    }

    /// Write a device attribute, returning the full reply envelope
    pub async fn set_property(
        &self,
        attribute: &str,
        params: &[(&str, String)],
    ) -> Option<ResponseEnvelope> {
        self.try_set_property(attribute, params).await.ok()
    }

    pub async fn try_set_property(
        &self,
        attribute: &str,
        params: &[(&str, String)],
    ) -> Result<ResponseEnvelope> {
        let (endpoint, identity) = self.target().await;
        self.check_call(&identity, attribute).await?;

        let result = self
            .shared
            .transport
            .try_put(&endpoint, &identity, attribute, params)
            .await;
        if let Err(e) = &result {
            self.note_failure(attribute, e).await;
        }
        result
    }

    async fn check_call(&self, identity: &DeviceIdentity, attribute: &str) -> Result<()> {
        if identity.is_unset() {
            debug!("No device selected, skipping '{}'", attribute);
            return Err(AlpacaError::IdentityUnset);
        }
        if self.shared.exceptions.contains(attribute).await {
            tracing::trace!("'{}' is unsupported by {}, skipping", attribute, identity);
            return Err(AlpacaError::UnsupportedProperty(attribute.to_string()));
        }
        Ok(())
    }

    /// Only device-reported errors mark an attribute unsupported; network
    /// failures are retried on the next call.
    async fn note_failure(&self, attribute: &str, err: &AlpacaError) {
        if err.is_protocol() && self.shared.exceptions.insert(attribute).await {
            debug!(
                "'{}' rejected by device, not asking again until reconnect",
                attribute
            );
        }
    }

    /// Connect to the selected device.
    ///
    /// Retries `PUT connected=true` / `GET connected` up to the configured
    /// bound. On success the server and device notifications fire once, the
    /// driver information is stored in the value map and polling starts.
    pub async fn connect(&self) -> Result<()> {
        self.shared.scheduler.stop().await;
        self.shared.exceptions.clear().await;
        *self.shared.state.write().await = ConnectionState {
            link: LinkState::Connecting,
            ..ConnectionState::default()
        };

        let (endpoint, identity) = self.target().await;
        if identity.is_unset() {
            self.shared.state.write().await.link = LinkState::Error;
            self.message(
                "ALPACA connect error: no device selected".to_string(),
                MessageLevel::Error,
            );
            return Err(AlpacaError::IdentityUnset);
        }

        info!(
            "Connecting to {} at {}",
            identity,
            endpoint.device_url(&identity)
        );

        let max_attempts = self.shared.connect.max_attempts.max(1);
        let retry_delay = Duration::from_millis(self.shared.connect.retry_delay_ms);
        let transport = &self.shared.transport;
        let mut connected = false;

        for attempt in 1..=max_attempts {
            let _ = transport
                .try_put(
                    &endpoint,
                    &identity,
                    "connected",
                    &[("Connected", "true".to_string())],
                )
                .await;
            let answer = transport
                .try_get(&endpoint, &identity, "connected", &[])
                .await;
            if matches!(answer, Ok(Value::Bool(true))) {
                debug!("{} connected on attempt {}", identity, attempt);
                connected = true;
                break;
            }

            debug!(
                "Connect attempt {}/{} for {} failed",
                attempt, max_attempts, identity
            );
            if attempt < max_attempts {
                tokio::time::sleep(retry_delay).await;
            }
        }

        if !connected {
            warn!(
                "Giving up on {} after {} connect attempts",
                identity, max_attempts
            );
            self.shared.state.write().await.link = LinkState::Error;
            self.message(
                format!("ALPACA connect error:[{}]", identity),
                MessageLevel::Error,
            );
            return Err(AlpacaError::ConnectFailed {
                attempts: max_attempts,
            });
        }

        let (server_edge, device_edge) = {
            let mut state = self.shared.state.write().await;
            let server_edge = !state.server_connected;
            let device_edge = !state.device_connected;
            state.server_connected = true;
            state.device_connected = true;
            state.link = LinkState::Connected;
            (server_edge, device_edge)
        };

        if server_edge {
            self.emit(ConnectionEvent::ServerConnected);
        }
        if device_edge {
            self.emit(ConnectionEvent::DeviceConnected {
                device: identity.name.clone(),
            });
            self.message(
                format!("ALPACA device found: [{}]", identity),
                MessageLevel::Info,
            );
        }

        self.load_initial_config().await;
        self.start_polling().await;
        info!("Connected to {}", identity);
        Ok(())
    }

    /// One-shot driver snapshot stored right after connecting
    async fn load_initial_config(&self) {
        let data = &self.shared.data;
        data.entry("DRIVER_INFO.DRIVER_NAME", self.name().await.map(Value::String))
            .await;
        data.entry(
            "DRIVER_INFO.DRIVER_VERSION",
            self.driver_version().await.map(Value::String),
        )
        .await;
        data.entry(
            "DRIVER_INFO.DRIVER_EXEC",
            self.driver_info()
                .await
                .map(Value::from),
        )
        .await;
    }

    async fn start_polling(&self) {
        let shared = Arc::downgrade(&self.shared);
        self.shared
            .scheduler
            .start(
                Arc::new(StatusPoll {
                    shared: shared.clone(),
                }),
                Arc::new(DataPoll { shared }),
            )
            .await;
    }

    /// Disconnect from the device.
    ///
    /// Always ends with both flags false, polling stopped, the exception
    /// cache empty, and both disconnect notifications sent, whatever the
    /// state was before.
    pub async fn disconnect(&self) {
        self.shared.scheduler.stop().await;

        let (endpoint, identity) = self.target().await;
        if !identity.is_unset() {
            let _ = self
                .shared
                .transport
                .try_put(
                    &endpoint,
                    &identity,
                    "connected",
                    &[("Connected", "false".to_string())],
                )
                .await;
        }

        *self.shared.state.write().await = ConnectionState::default();
        self.shared.exceptions.clear().await;

        self.emit(ConnectionEvent::DeviceDisconnected {
            device: identity.name.clone(),
        });
        self.emit(ConnectionEvent::ServerDisconnected);
        self.message(
            format!("ALPACA device remove:[{}]", identity),
            MessageLevel::Info,
        );
        info!("Disconnected from {}", identity);
    }

    /// Status heartbeat: compare `GET connected` with the stored flag and
    /// notify only on a change. Returns the polled value.
    pub async fn poll_status(&self) -> bool {
        let now = self
            .get_property_as::<bool>("connected", &[])
            .await
            .unwrap_or(false);

        let change = {
            let mut state = self.shared.state.write().await;
            match (state.device_connected, now) {
                (true, false) => {
                    state.device_connected = false;
                    Some(false)
                }
                // a late heartbeat after disconnect must not revive the device
                (false, true) if state.server_connected => {
                    state.device_connected = true;
                    Some(true)
                }
                _ => None,
            }
        };

        if let Some(found) = change {
            let device = self.identity().await.name;
            if found {
                self.emit(ConnectionEvent::DeviceConnected {
                    device: device.clone(),
                });
                self.message(
                    format!("ALPACA device found: [{}]", device),
                    MessageLevel::Info,
                );
            } else {
                self.emit(ConnectionEvent::DeviceDisconnected {
                    device: device.clone(),
                });
                // lost while supervised, not a requested disconnect
                self.message(
                    format!("ALPACA device remove:[{}]", device),
                    MessageLevel::Warning,
                );
            }
        }

        now
    }

    /// Data refresh: run the hook if the device is connected.
    /// Returns whether the hook ran.
    pub async fn poll_data(&self) -> bool {
        if !self.is_device_connected().await {
            return false;
        }
        self.shared.refresh.refresh(self, &self.shared.data).await;
        true
    }
}

struct StatusPoll {
    shared: Weak<Shared>,
}

#[async_trait]
impl PollTask for StatusPoll {
    async fn tick(&self) {
        if let Some(shared) = self.shared.upgrade() {
            ConnectionManager { shared }.poll_status().await;
        }
    }
}

struct DataPoll {
    shared: Weak<Shared>,
}

#[async_trait]
impl PollTask for DataPoll {
    async fn tick(&self) {
        if let Some(shared) = self.shared.upgrade() {
            ConnectionManager { shared }.poll_data().await;
        }
    }
}
