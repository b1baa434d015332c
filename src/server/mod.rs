//! Bridge HTTP endpoint
//!
//! Receives the two inbound call streams of the bridge:
//!
//! - `POST /v1/notify/{topic}`: core change notifications, answered with
//!   `{"status": "SUCCESS" | "RETRY" | "DROP"}`
//! - `POST /v1/hooks/{hook}`: broker hook calls, answered with the hook's
//!   valued response or `{}`
//!
//! `GET /dapr/subscribe` advertises the notification route to the pub/sub
//! sidecar.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode};
use serde_json::{json, Value};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::dispatch::{status_of, CoreNotification, DownstreamPipeline};
use crate::error::DispatchStatus;
use crate::hooks::{self, HookError, HookProvider, HookRequest};
use crate::metrics::{serve, text_response, ServeError};


/// Largest request body accepted
const MAX_BODY_SIZE: usize = 4 * 1024 * 1024;

const NOTIFY_PREFIX: &str = "/v1/notify/";
const HOOKS_PREFIX: &str = "/v1/hooks/";

/// Handlers behind the endpoint
pub struct Endpoints {
    pub hooks: Arc<dyn HookProvider>,
    pub downstream: Arc<DownstreamPipeline>,
    /// Pub/sub component core notifications arrive on
    pub pubsub_name: String,
    /// Topic core notifications arrive on
    pub topic: String,
}

/// HTTP server for notifications and hook calls
pub struct BridgeServer {
    endpoints: Arc<Endpoints>,
    addr: SocketAddr,
}

impl BridgeServer {
    pub fn new(endpoints: Endpoints, addr: SocketAddr) -> Self {
        Self {
            endpoints: Arc::new(endpoints),
            addr,
        }
    }

    /// Serve until the shutdown flag flips to `true`
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<(), ServeError> {
        let endpoints = self.endpoints;
        serve("Bridge", self.addr, shutdown, move |req: Request<Incoming>| {
            handle_request(req, endpoints.clone())
        })
        .await
    }
}

async fn handle_request(req: Request<Incoming>, endpoints: Arc<Endpoints>) -> Response<Full<Bytes>> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let body = match Limited::new(req.into_body(), MAX_BODY_SIZE).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!("Failed to read request body for {}: {}", path, e);
            return json_response(StatusCode::BAD_REQUEST, &json!({"error": e.to_string()}));
        }
    };

    route(&method, &path, body, &endpoints).await
}

async fn route(method: &Method, path: &str, body: Bytes, endpoints: &Endpoints) -> Response<Full<Bytes>> {
    if *method == Method::POST {
        if let Some(topic) = path.strip_prefix(NOTIFY_PREFIX) {
            return notify(topic, &body, endpoints).await;
        }
        if let Some(name) = path.strip_prefix(HOOKS_PREFIX) {
            return hook(name, &body, endpoints).await;
        }
    }

    match (method, path) {
        (&Method::GET, "/dapr/subscribe") => json_response(
            StatusCode::OK,
            &json!([{
                "pubsubname": endpoints.pubsub_name,
                "topic": endpoints.topic,
                "route": format!("{}{}", NOTIFY_PREFIX, endpoints.topic),
            }]),
        ),
        (&Method::GET, "/health") | (&Method::GET, "/healthz") => {
            text_response(StatusCode::OK, "text/plain", "OK")
        }
        _ => text_response(StatusCode::NOT_FOUND, "text/plain", "Not Found"),
    }
}

async fn notify(topic: &str, body: &[u8], endpoints: &Endpoints) -> Response<Full<Bytes>> {
    let status = match CoreNotification::from_slice(topic, body) {
        Ok(notification) => status_of(&endpoints.downstream.dispatch(&notification).await),
        Err(e) => {
            warn!("Undecodable notification on {}: {}", topic, e);
            DispatchStatus::Drop
        }
    };
    debug!("Notification on {} handled: {}", topic, status);
    json_response(StatusCode::OK, &json!({"status": status.as_str()}))
}

async fn hook(name: &str, body: &[u8], endpoints: &Endpoints) -> Response<Full<Bytes>> {
    let request = if body.is_empty() {
        HookRequest::default()
    } else {
        match serde_json::from_slice::<HookRequest>(body) {
            Ok(request) => request,
            Err(e) => {
                return json_response(StatusCode::BAD_REQUEST, &json!({"error": e.to_string()}));
            }
        }
    };

    match hooks::invoke(endpoints.hooks.as_ref(), name, &request).await {
        Ok(Some(response)) => json_response(StatusCode::OK, &response.to_json()),
        Ok(None) => json_response(StatusCode::OK, &json!({})),
        Err(HookError::UnknownHook(name)) => json_response(
            StatusCode::NOT_FOUND,
            &json!({"error": format!("unknown hook {}", name)}),
        ),
        Err(e) => {
            warn!("Hook {} failed: {}", name, e);
            json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &json!({"error": e.to_string()}),
            )
        }
    }
}

fn json_response(status: StatusCode, body: &Value) -> Response<Full<Bytes>> {
    text_response(status, "application/json", body.to_string())
}
