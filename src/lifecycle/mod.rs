//! Connection Lifecycle Handler
//!
//! Wraps the auth gate's connect/disconnect handling and keeps the
//! per-tenant online gauge. Hooks the gate acknowledges without a state
//! change leave the gauge alone.

use std::sync::Arc;

use tracing::{debug, info};

use crate::context::BridgeContext;
use crate::error::Result;
use crate::session::{AuthGate, ConnectionInfo};

/// Connect/disconnect entry point used by the hook surface
pub struct ConnectionLifecycle {
    ctx: Arc<BridgeContext>,
    gate: Arc<AuthGate>,
}

impl ConnectionLifecycle {
    pub fn new(ctx: Arc<BridgeContext>, gate: Arc<AuthGate>) -> Self {
        Self { ctx, gate }
    }

    pub async fn connected(&self, device_id: &str, info: &ConnectionInfo) -> Result<()> {
        match self.gate.on_connected(device_id, info).await? {
            Some(owner) => {
                if let Some(metrics) = self.ctx.metrics() {
                    metrics.device_online(&owner);
                }
                info!("device {} of {} connected", device_id, owner);
            }
            None => debug!("connect of {} already handled", device_id),
        }
        Ok(())
    }

    pub async fn disconnected(&self, device_id: &str) -> Result<()> {
        match self.gate.on_disconnected(device_id).await? {
            Some(owner) => {
                if let Some(metrics) = self.ctx.metrics() {
                    metrics.device_offline(&owner);
                }
                info!("device {} of {} disconnected", device_id, owner);
            }
            None => debug!("disconnect of {} already handled", device_id),
        }
        Ok(())
    }
}
