//! Test doubles for the external collaborators

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::broker_api::{BrokerPublisher, PublishError, PublishRequest};
use crate::config::Config;
use crate::context::BridgeContext;
use crate::core_api::{CoreApi, CoreApiError, SubscriptionRequest, TokenInfo};
use crate::envelope::CloudEvent;
use crate::event_stream::{DeliveryReport, EventStream, EventStreamError};
use crate::metrics::Metrics;
use crate::store::{KeyValueStore, MemoryStore, StoreError};

/// Core API fake that records every call
#[derive(Default)]
pub struct RecordingCoreApi {
    tokens: Mutex<Vec<(String, TokenInfo)>>,
    pub created: Mutex<Vec<SubscriptionRequest>>,
    pub deleted: Mutex<Vec<(String, String)>>,
    pub token_lookups: Mutex<Vec<String>>,
    pub attributes: Mutex<Value>,
    pub fail: AtomicBool,
}

impl RecordingCoreApi {
    /// Register a valid token
    pub fn with_token(self, secret: &str, entity_id: &str, owner: &str) -> Self {
        self.tokens.lock().push((
            secret.to_string(),
            TokenInfo {
                entity_id: entity_id.to_string(),
                entity_type: "device".to_string(),
                exp: 0,
                owner: owner.to_string(),
            },
        ));
        self
    }

    pub fn created_ids(&self) -> Vec<String> {
        self.created.lock().iter().map(|r| r.id.clone()).collect()
    }
}

#[async_trait]
impl CoreApi for RecordingCoreApi {
    async fn token_info(&self, secret: &str) -> Result<TokenInfo, CoreApiError> {
        self.token_lookups.lock().push(secret.to_string());
        if self.fail.load(Ordering::SeqCst) {
            return Err(CoreApiError::Http("connection refused".to_string()));
        }
        self.tokens
            .lock()
            .iter()
            .find(|(s, _)| s == secret)
            .map(|(_, info)| info.clone())
            .ok_or(CoreApiError::Rejected {
                code: 401,
                msg: "invalid token".to_string(),
            })
    }

    async fn create_subscription(&self, request: &SubscriptionRequest) -> Result<(), CoreApiError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(CoreApiError::Status(500));
        }
        self.created.lock().push(request.clone());
        Ok(())
    }

    async fn delete_subscription(&self, id: &str, owner: &str) -> Result<(), CoreApiError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(CoreApiError::Status(500));
        }
        self.deleted.lock().push((id.to_string(), owner.to_string()));
        Ok(())
    }

    async fn entity_attributes(
        &self,
        _owner: &str,
        _entity_id: &str,
        keys: &[String],
    ) -> Result<Value, CoreApiError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(CoreApiError::Status(500));
        }
        let entity = serde_json::json!({
            "properties": {"attributes": self.attributes.lock().clone()}
        });
        Ok(crate::core_api::select_attributes(&entity, keys))
    }
}

/// Broker publisher fake that records every publish
#[derive(Default)]
pub struct RecordingPublisher {
    pub published: Mutex<Vec<PublishRequest>>,
    pub fail: AtomicBool,
}

#[async_trait]
impl BrokerPublisher for RecordingPublisher {
    async fn publish(&self, request: PublishRequest) -> Result<(), PublishError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(PublishError::Rejected(1));
        }
        self.published.lock().push(request);
        Ok(())
    }
}

/// Event stream fake that records submissions and reports them delivered
pub struct RecordingEventStream {
    pub submitted: Mutex<Vec<(String, CloudEvent)>>,
    pub fail: AtomicBool,
    reports: broadcast::Sender<DeliveryReport>,
}

impl Default for RecordingEventStream {
    fn default() -> Self {
        let (reports, _) = broadcast::channel(64);
        Self {
            submitted: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
            reports,
        }
    }
}

impl RecordingEventStream {
    pub fn events(&self) -> Vec<CloudEvent> {
        self.submitted.lock().iter().map(|(_, e)| e.clone()).collect()
    }
}

#[async_trait]
impl EventStream for RecordingEventStream {
    async fn submit(&self, partition_key: &str, event: CloudEvent) -> Result<(), EventStreamError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(EventStreamError::Closed);
        }
        let _ = self.reports.send(DeliveryReport {
            event_id: event.id.clone(),
            partition_key: partition_key.to_string(),
            error: None,
        });
        self.submitted.lock().push((partition_key.to_string(), event));
        Ok(())
    }

    fn reports(&self) -> broadcast::Receiver<DeliveryReport> {
        self.reports.subscribe()
    }
}

/// Memory store that can be switched into a failing state
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    pub fail: AtomicBool,
}

impl FlakyStore {
    fn check(&self) -> Result<(), StoreError> {
        if self.fail.load(Ordering::SeqCst) {
            Err(StoreError::Storage("store unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl KeyValueStore for FlakyStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn save(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.check()?;
        self.inner.save(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.check()?;
        self.inner.delete(key).await
    }
}

/// Fakes plus a context wired to them
pub struct Harness {
    pub store: Arc<FlakyStore>,
    pub core: Arc<RecordingCoreApi>,
    pub publisher: Arc<RecordingPublisher>,
    pub stream: Arc<RecordingEventStream>,
    pub metrics: Arc<Metrics>,
    pub context: Arc<BridgeContext>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_core(RecordingCoreApi::default())
    }

    pub fn with_core(core: RecordingCoreApi) -> Self {
        let store = Arc::new(FlakyStore::default());
        let core = Arc::new(core);
        let publisher = Arc::new(RecordingPublisher::default());
        let stream = Arc::new(RecordingEventStream::default());
        let metrics = Arc::new(Metrics::new().expect("metrics registry"));
        let context = BridgeContext::new(
            store.clone(),
            core.clone(),
            publisher.clone(),
            stream.clone(),
            &Config::default(),
        )
        .with_metrics(metrics.clone());

        Self {
            store,
            core,
            publisher,
            stream,
            metrics,
            context: Arc::new(context),
        }
    }

    /// Record an owner as if the device had authenticated
    pub async fn authenticated(&self, device_id: &str, owner: &str) {
        self.store
            .save(&crate::store::keys::owner(device_id), owner.as_bytes())
            .await
            .expect("save owner");
    }

    pub async fn has_key(&self, key: &str) -> bool {
        self.store.inner.get(key).await.expect("memory get").is_some()
    }
}
