//! Shared device value map filled by the data refresh hook

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::connection::ConnectionManager;

/// Caller-owned map of the latest device values, keyed by entry name
#[derive(Debug, Clone, Default)]
pub struct DeviceData {
    values: Arc<RwLock<HashMap<String, Value>>>,
}

impl DeviceData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value, or drop the entry when `value` is `None`.
    ///
    /// Returns true when an existing entry was removed.
    pub async fn entry(&self, key: &str, value: Option<Value>) -> bool {
        let mut values = self.values.write().await;
        match value {
            Some(value) => {
                values.insert(key.to_string(), value);
                false
            }
            None => values.remove(key).is_some(),
        }
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        self.values.read().await.get(key).cloned()
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.values.read().await.contains_key(key)
    }

    pub async fn snapshot(&self) -> HashMap<String, Value> {
        self.values.read().await.clone()
    }

    pub async fn clear(&self) {
        self.values.write().await.clear();
    }
}

/// Device-specific refresh run on every data tick while the device is
/// connected
#[async_trait]
pub trait DataRefresh: Send + Sync {
    async fn refresh(&self, device: &ConnectionManager, data: &DeviceData);
}

/// Refresh hook that does nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRefresh;

#[async_trait]
impl DataRefresh for NoRefresh {
    async fn refresh(&self, _device: &ConnectionManager, _data: &DeviceData) {}
}

/// Reads a fixed list of attributes and stores each under its own name.
/// An attribute that yields no value has its entry removed.
#[derive(Debug, Clone)]
pub struct AttributeRefresh {
    attributes: Vec<String>,
}

impl AttributeRefresh {
    pub fn new<I, S>(attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            attributes: attributes.into_iter().map(Into::into).collect(),
        }
    }

    pub fn attributes(&self) -> &[String] {
        &self.attributes
    }
}

#[async_trait]
impl DataRefresh for AttributeRefresh {
    async fn refresh(&self, device: &ConnectionManager, data: &DeviceData) {
        for attribute in &self.attributes {
            let value = device.get_property(attribute, &[]).await;
            data.entry(attribute, value).await;
        }
    }
}
