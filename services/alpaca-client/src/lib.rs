//! Alpaca client - connection supervision for ASCOM Alpaca devices
//!
//! Talks JSON-over-HTTP to Alpaca servers: discovers servers and their
//! devices, connects to one device with bounded retries, keeps its status
//! and data fresh on background poll loops, and stops asking for
//! attributes the device has rejected.

pub mod config;
pub mod connection;
pub mod data;
pub mod device;
pub mod discovery;
pub mod error;
pub mod events;
pub mod exceptions;
pub mod identity;
pub mod io;
pub mod polling;
pub mod transport;

pub use config::{load_config, AlpacaConfig, ConnectConfig, PollingConfig};
pub use connection::{ConnectionManager, ConnectionManagerBuilder, ConnectionState, LinkState};
pub use data::{AttributeRefresh, DataRefresh, DeviceData, NoRefresh};
pub use discovery::{filter_by_type, DiscoveryService, ServerDiscovery};
pub use error::{AlpacaError, Result};
pub use events::{ConnectionEvent, MessageLevel};
pub use exceptions::PropertyExceptionCache;
pub use identity::{DeviceIdentity, Endpoint};
pub use io::{HttpClient, HttpResponse, ReqwestHttpClient};
pub use polling::{PollTask, PollingScheduler};
pub use transport::{DeviceRecord, ResponseEnvelope, Transport};
