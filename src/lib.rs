//! iothub - MQTT broker bridge for the core device platform
//!
//! Authenticates devices connecting to an external MQTT broker, forwards
//! their publishes to the platform's event stream, and pushes platform-side
//! property changes back to subscribed devices through the broker.

pub mod broker_api;
pub mod config;
pub mod context;
pub mod core_api;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod event_stream;
pub mod hooks;
pub mod ingest;
pub mod lifecycle;
pub mod metrics;
pub mod server;
pub mod session;
pub mod store;
pub mod subscription;
pub mod topic;

#[cfg(test)]
mod testing;

pub use broker_api::{BrokerPublisher, EmqxPublisher};
pub use config::Config;
pub use context::BridgeContext;
pub use core_api::{CoreApi, HttpCoreApi};
pub use dispatch::{CoreNotification, DownstreamPipeline};
pub use error::{BridgeError, DispatchStatus};
pub use event_stream::{DaprEventStream, EventStream};
pub use hooks::{BridgeHooks, HookProvider};
pub use ingest::{IngestVerdict, UpstreamPipeline};
pub use lifecycle::ConnectionLifecycle;
pub use metrics::{Metrics, MetricsServer};
pub use server::BridgeServer;
pub use session::AuthGate;
pub use store::{DaprStateStore, FjallStore, KeyValueStore, MemoryStore};
pub use subscription::SubscriptionManager;
pub use topic::TopicKind;
