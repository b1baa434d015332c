//! Session/Auth Gate
//!
//! Validates device credentials against the core platform, records the owning
//! tenant and publishes connectivity changes.
//!
//! Session states:
//!
//! ```text
//! Unauthenticated --auth ok--> Authenticated --connect--> Connected
//!        ^                           |                        |
//!        |                           +------disconnect-------+
//!        |                                       v
//!        +------------ re-authenticate ---- Disconnected
//! ```
//!
//! State is always re-derived from the store: the owner record `{device}_de`
//! marks an authenticated device, the connection record `{device}_ci` a
//! connected one and `{device}_dc` a closed session. Repeated connect or
//! disconnect hooks find the session already in the target state and are
//! acknowledged without side effects.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::context::BridgeContext;
use crate::envelope::{ConnectionRecord, Mark, PropertyKind, UpstreamEnvelope};
use crate::error::{BridgeError, Result};
use crate::store::{self, keys};
use crate::subscription::SubscriptionManager;
use crate::topic::lwm2m_identity;


/// Transport protocol a device connected with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Protocol {
    /// MQTT and anything else using username/password
    #[default]
    Plain,
    Coap,
    Lwm2m,
}

impl Protocol {
    /// Map the broker's protocol name
    pub fn from_name(name: &str) -> Self {
        if name.eq_ignore_ascii_case("coap") {
            Protocol::Coap
        } else if name.eq_ignore_ascii_case("lwm2m") {
            Protocol::Lwm2m
        } else {
            Protocol::Plain
        }
    }
}

/// Credentials presented by a connecting device
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub protocol: Protocol,
    pub client_id: String,
    pub username: String,
    pub password: String,
}

/// Identity and secret a device authenticates with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub device_id: String,
    pub secret: String,
}

/// Derive the device identity from credentials
///
/// - plain: identity is the username, secret the password
/// - CoAP: identity is the client id, secret the password
/// - LwM2M: the client id is `identity@secret`
pub fn resolve_identity(credentials: &Credentials) -> DeviceIdentity {
    match credentials.protocol {
        Protocol::Plain => DeviceIdentity {
            device_id: credentials.username.clone(),
            secret: credentials.password.clone(),
        },
        Protocol::Coap => DeviceIdentity {
            device_id: credentials.client_id.clone(),
            secret: credentials.password.clone(),
        },
        Protocol::Lwm2m => {
            let client_id = credentials.client_id.as_str();
            DeviceIdentity {
                device_id: lwm2m_identity(client_id).to_string(),
                secret: client_id.split('@').nth(1).unwrap_or_default().to_string(),
            }
        }
    }
}

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated,
    Connected,
    Disconnected,
}

/// Events driving [`SessionState`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    AuthSucceeded,
    AuthFailed,
    Connected,
    Disconnected,
    Reauthenticate,
}

/// Rejected state transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: SessionState,
    pub event: SessionEvent,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} is not allowed in state {:?}", self.event, self.from)
    }
}

impl std::error::Error for InvalidTransition {}

impl SessionState {
    /// Apply an event
    pub fn on(self, event: SessionEvent) -> std::result::Result<SessionState, InvalidTransition> {
        use SessionEvent as E;
        use SessionState as S;

        match (self, event) {
            (S::Unauthenticated, E::AuthSucceeded) => Ok(S::Authenticated),
            (S::Unauthenticated, E::AuthFailed) => Ok(S::Unauthenticated),
            (S::Authenticated, E::Connected) => Ok(S::Connected),
            (S::Authenticated | S::Connected, E::Disconnected) => Ok(S::Disconnected),
            (_, E::Reauthenticate) => Ok(S::Unauthenticated),
            (from, event) => Err(InvalidTransition { from, event }),
        }
    }
}

/// Connection details reported by the broker
#[derive(Debug, Clone, Default)]
pub struct ConnectionInfo {
    pub client_id: String,
    pub username: String,
    pub peer_host: String,
    pub protocol: String,
    pub socket_port: u16,
}

/// Persisted view of one device session
struct SessionSnapshot {
    owner: String,
    state: SessionState,
}

/// Authentication and connectivity handling
pub struct AuthGate {
    ctx: Arc<BridgeContext>,
    subscriptions: Arc<SubscriptionManager>,
}

impl AuthGate {
    pub fn new(ctx: Arc<BridgeContext>, subscriptions: Arc<SubscriptionManager>) -> Self {
        Self { ctx, subscriptions }
    }

    /// Validate credentials and record the owning tenant
    ///
    /// Returns the authenticated device id.
    pub async fn authenticate(&self, credentials: &Credentials) -> Result<String> {
        let result = self.try_authenticate(credentials).await;
        if let Some(metrics) = self.ctx.metrics() {
            metrics.auth_result(result.is_ok());
        }
        result
    }

    async fn try_authenticate(&self, credentials: &Credentials) -> Result<String> {
        let identity = resolve_identity(credentials);
        if identity.device_id.is_empty() || identity.secret.is_empty() {
            return Err(BridgeError::AuthFailure(
                "missing identity or secret".to_string(),
            ));
        }

        let token = self
            .ctx
            .core
            .token_info(&identity.secret)
            .await
            .map_err(|e| BridgeError::AuthFailure(e.to_string()))?;

        if token.entity_id != identity.device_id {
            return Err(BridgeError::AuthFailure(format!(
                "token belongs to '{}', not '{}'",
                token.entity_id, identity.device_id
            )));
        }

        self.ctx
            .store
            .save(&keys::owner(&identity.device_id), token.owner.as_bytes())
            .await?;
        self.ctx
            .store
            .delete(&keys::session_closed(&identity.device_id))
            .await?;

        let state = SessionState::Unauthenticated
            .on(SessionEvent::AuthSucceeded)
            .map_err(|e| BridgeError::AuthFailure(e.to_string()))?;
        info!(
            "device {} authenticated for tenant {} ({:?})",
            identity.device_id, token.owner, state
        );
        Ok(identity.device_id)
    }

    /// Current session state derived from the store
    pub async fn session_state(&self, device_id: &str) -> Result<SessionState> {
        Ok(self
            .snapshot(device_id)
            .await?
            .map_or(SessionState::Unauthenticated, |session| session.state))
    }

    /// Owner of an authenticated device
    pub async fn owner(&self, device_id: &str) -> Result<String> {
        self.ctx
            .store
            .get_string(&keys::owner(device_id))
            .await?
            .ok_or_else(|| BridgeError::NotAuthenticated(device_id.to_string()))
    }

    async fn snapshot(&self, device_id: &str) -> Result<Option<SessionSnapshot>> {
        let store = &self.ctx.store;
        let Some(owner) = store.get_string(&keys::owner(device_id)).await? else {
            return Ok(None);
        };

        let state = if store.exists(&keys::connection(device_id)).await? {
            SessionState::Connected
        } else if store.exists(&keys::session_closed(device_id)).await? {
            SessionState::Disconnected
        } else {
            SessionState::Authenticated
        };
        Ok(Some(SessionSnapshot { owner, state }))
    }

    /// Publish the online record and persist it
    ///
    /// Returns the owner when the device went online, `None` when the
    /// session was already connected or closed.
    pub async fn on_connected(
        &self,
        device_id: &str,
        info: &ConnectionInfo,
    ) -> Result<Option<String>> {
        let SessionSnapshot { owner, state } = self
            .snapshot(device_id)
            .await?
            .ok_or_else(|| BridgeError::NotAuthenticated(device_id.to_string()))?;

        if let Err(e) = state.on(SessionEvent::Connected) {
            debug!("ignoring connect of {}: {}", device_id, e);
            return Ok(None);
        }

        let record = ConnectionRecord {
            client_id: info.client_id.clone(),
            user_name: info.username.clone(),
            peer_host: info.peer_host.clone(),
            protocol: info.protocol.clone(),
            socket_port: info.socket_port.to_string(),
            online: true,
            owner: owner.clone(),
            timestamp_millis: crate::envelope::now_millis(),
        };

        self.emit_connectivity(device_id, &owner, &record).await?;
        store::save_json(self.ctx.store.as_ref(), &keys::connection(device_id), &record).await?;

        debug!("device {} online from {}", device_id, info.peer_host);
        Ok(Some(owner))
    }

    /// Publish the offline record and clear per-device state
    ///
    /// Returns the owner when a connected device went offline, `None` when
    /// the session had never connected or was already closed.
    pub async fn on_disconnected(&self, device_id: &str) -> Result<Option<String>> {
        let SessionSnapshot { owner, state } = self
            .snapshot(device_id)
            .await?
            .ok_or_else(|| BridgeError::NotAuthenticated(device_id.to_string()))?;

        if let Err(e) = state.on(SessionEvent::Disconnected) {
            debug!("ignoring disconnect of {}: {}", device_id, e);
            return Ok(None);
        }

        let was_online = state == SessionState::Connected;
        if was_online {
            let record = ConnectionRecord::offline(&owner);
            self.emit_connectivity(device_id, &owner, &record).await?;
            self.ctx.store.delete(&keys::connection(device_id)).await?;
        }
        self.subscriptions.cleanup_device(&owner, device_id).await?;
        self.ctx
            .store
            .save(
                &keys::session_closed(device_id),
                crate::envelope::now_millis().to_string().as_bytes(),
            )
            .await?;

        debug!("device {} offline", device_id);
        Ok(was_online.then_some(owner))
    }

    async fn emit_connectivity(
        &self,
        device_id: &str,
        owner: &str,
        record: &ConnectionRecord,
    ) -> Result<()> {
        let envelope = UpstreamEnvelope::new(
            device_id,
            owner,
            &self.ctx.settings.source,
            PropertyKind::ConnectInfo,
            Mark::Connecting,
            "",
            serde_json::to_value(record)?,
        );

        if let Err(e) = self.ctx.events.emit(envelope).await {
            warn!("failed to publish connectivity of {}: {}", device_id, e);
            return Err(e.into());
        }
        if let Some(metrics) = self.ctx.metrics() {
            metrics.message(owner, Mark::Connecting);
        }
        Ok(())
    }
}
