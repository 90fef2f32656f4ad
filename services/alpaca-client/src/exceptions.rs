//! Memo of attributes the connected device has rejected
//!
//! Devices silently omit optional features. Once a property call comes back
//! with `ErrorNumber != 0` the attribute is recorded here and never sent
//! again until the next connect.

use std::collections::HashSet;

use tokio::sync::RwLock;

#[derive(Debug, Default)]
pub struct PropertyExceptionCache {
    attributes: RwLock<HashSet<String>>,
}

impl PropertyExceptionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn contains(&self, attribute: &str) -> bool {
        self.attributes.read().await.contains(attribute)
    }

    /// Record an attribute, returning true if it was not known before
    pub async fn insert(&self, attribute: &str) -> bool {
        self.attributes.write().await.insert(attribute.to_string())
    }

    pub async fn clear(&self) {
        self.attributes.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.attributes.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.attributes.read().await.is_empty()
    }

    /// Sorted copy of the recorded attributes
    pub async fn snapshot(&self) -> Vec<String> {
        let mut attributes: Vec<String> = self.attributes.read().await.iter().cloned().collect();
        attributes.sort();
        attributes
    }
}
