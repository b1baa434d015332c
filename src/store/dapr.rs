//! Dapr state API backend.
//!
//! Talks to the state endpoints of a dapr sidecar:
//!
//! ```text
//! GET    {base}/v1.0/state/{store}/{key}
//! POST   {base}/v1.0/state/{store}        [{"key": ..., "value": ...}]
//! DELETE {base}/v1.0/state/{store}/{key}
//! ```
//!
//! Values are stored as base64 strings so arbitrary bytes survive the JSON
//! round trip through the sidecar.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::{Client, StatusCode, Url};
use serde::Serialize;

use super::error::{Result, StoreError};
use super::KeyValueStore;

#[derive(Serialize)]
struct StateItem<'a> {
    key: &'a str,
    value: String,
}

/// Key-value store backed by a dapr state component
pub struct DaprStateStore {
    client: Client,
    base_url: Url,
    store_name: String,
}

impl DaprStateStore {
    /// Create a store client for the named state component
    pub fn new(base_url: &str, store_name: &str, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| StoreError::Storage(format!("invalid dapr base url: {}", e)))?;
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url,
            store_name: store_name.to_string(),
        })
    }

    fn state_url(&self, key: Option<&str>) -> Result<Url> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| StoreError::Storage("dapr base url cannot be a base".to_string()))?;
            segments.pop_if_empty();
            segments.extend(["v1.0", "state", self.store_name.as_str()]);
            if let Some(key) = key {
                segments.push(key);
            }
        }
        Ok(url)
    }
}

#[async_trait]
impl KeyValueStore for DaprStateStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let response = self.client.get(self.state_url(Some(key))?).send().await?;

        match response.status() {
            StatusCode::NO_CONTENT | StatusCode::NOT_FOUND => return Ok(None),
            status if !status.is_success() => {
                return Err(StoreError::status("get", key, status));
            }
            _ => {}
        }

        let body = response.bytes().await?;
        if body.is_empty() {
            return Ok(None);
        }
        let encoded: String = serde_json::from_slice(&body)?;
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|e| StoreError::Deserialize(e.to_string()))?;
        Ok(Some(bytes))
    }

    async fn save(&self, key: &str, value: &[u8]) -> Result<()> {
        let items = [StateItem {
            key,
            value: STANDARD.encode(value),
        }];
        let response = self
            .client
            .post(self.state_url(None)?)
            .json(&items)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StoreError::status("save", key, response.status()));
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let response = self.client.delete(self.state_url(Some(key))?).send().await?;

        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(StoreError::status("delete", key, status))
        }
    }
}
