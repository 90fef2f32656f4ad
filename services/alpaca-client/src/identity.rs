//! Device identity and server endpoint
//!
//! A device is selected with a composite `"Name:Type:Number"` string, the
//! same form produced by discovery for device pickers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AlpacaError;

/// Which remote device to talk to
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub name: String,
    pub device_type: String,
    pub device_number: u32,
}

impl DeviceIdentity {
    /// Assign from a composite `"Name:Type:Number"` string.
    ///
    /// The name is always taken over. Type and number only change when the
    /// string splits into exactly three parts with a numeric last part;
    /// otherwise they keep their previous values.
    pub fn assign(&mut self, composite: &str) {
        self.name = composite.to_string();
        match split_composite(composite) {
            Some((device_type, device_number)) => {
                self.device_type = device_type;
                self.device_number = device_number;
            }
            None => {
                tracing::debug!(
                    "Device identity {:?} is not Name:Type:Number, keeping {}/{}",
                    composite,
                    self.device_type,
                    self.device_number
                );
            }
        }
    }

    /// True when no device has been selected yet
    pub fn is_unset(&self) -> bool {
        self.name.is_empty()
    }
}

fn split_composite(composite: &str) -> Option<(String, u32)> {
    let parts: Vec<&str> = composite.split(':').collect();
    if parts.len() != 3 {
        return None;
    }
    let device_number = parts[2].trim().parse().ok()?;
    Some((parts[1].trim().to_string(), device_number))
}

impl FromStr for DeviceIdentity {
    type Err = AlpacaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (device_type, device_number) =
            split_composite(s).ok_or_else(|| AlpacaError::MalformedIdentity(s.to_string()))?;
        Ok(Self {
            name: s.to_string(),
            device_type,
            device_number,
        })
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Network location of an Alpaca server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub api_version: u32,
}

impl Default for Endpoint {
    fn default() -> Self {
        Self {
            protocol: "http".to_string(),
            host: "localhost".to_string(),
            port: 11111,
            api_version: 1,
        }
    }
}

impl Endpoint {
    /// `{protocol}://{host}:{port}`
    pub fn server_url(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.host, self.port)
    }

    /// Base URL of a device on this server
    pub fn device_url(&self, identity: &DeviceIdentity) -> String {
        format!(
            "{}/api/v{}/{}/{}",
            self.server_url(),
            self.api_version,
            identity.device_type,
            identity.device_number
        )
    }

    pub fn api_versions_url(&self) -> String {
        format!("{}/management/apiversions", self.server_url())
    }

    pub fn configured_devices_url(&self) -> String {
        format!(
            "{}/management/v{}/configureddevices",
            self.server_url(),
            self.api_version
        )
    }
}

/// Full URL of a device attribute
pub fn build_url(endpoint: &Endpoint, identity: &DeviceIdentity, attribute: &str) -> String {
    format!("{}/{}", endpoint.device_url(identity), attribute)
}
