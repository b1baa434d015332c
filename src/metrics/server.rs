//! HTTP plumbing shared by the metrics and bridge endpoints

use std::convert::Infallible;
use std::future::{ready, Future};
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{Encoder, TextEncoder};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

use super::Metrics;

pub(crate) type ServeError = Box<dyn std::error::Error + Send + Sync>;

/// Accept HTTP/1 connections on `addr` until the shutdown flag flips to `true`
pub(crate) async fn serve<H, F>(
    label: &'static str,
    addr: SocketAddr,
    mut shutdown: watch::Receiver<bool>,
    handler: H,
) -> Result<(), ServeError>
where
    H: Fn(Request<Incoming>) -> F + Clone + Send + Sync + 'static,
    F: Future<Output = Response<Full<Bytes>>> + Send + 'static,
{
    let listener = TcpListener::bind(addr).await?;
    info!("{} endpoint listening on http://{}", label, addr);

    loop {
        let (stream, peer) = tokio::select! {
            accepted = listener.accept() => accepted?,
            _ = shutdown.changed() => {
                info!("{} endpoint shutting down", label);
                return Ok(());
            }
        };
        let handler = handler.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req| {
                let response = handler(req);
                async move { Ok::<_, Infallible>(response.await) }
            });

            if let Err(err) = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                error!("{} connection from {} failed: {:?}", label, peer, err);
            }
        });
    }
}

/// Response with a fixed body and content type
pub(crate) fn text_response(
    status: StatusCode,
    content_type: &str,
    body: impl Into<Bytes>,
) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    if let Ok(value) = HeaderValue::from_str(content_type) {
        response.headers_mut().insert(CONTENT_TYPE, value);
    }
    response
}

/// Prometheus scrape endpoint
pub struct MetricsServer {
    metrics: Arc<Metrics>,
    addr: SocketAddr,
}

impl MetricsServer {
    pub fn new(metrics: Arc<Metrics>, addr: SocketAddr) -> Self {
        Self { metrics, addr }
    }

    /// Serve `/metrics` until the shutdown flag flips to `true`
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<(), ServeError> {
        let metrics = self.metrics;
        serve("Metrics", self.addr, shutdown, move |req: Request<Incoming>| {
            ready(scrape(req.uri().path(), &metrics))
        })
        .await
    }
}

fn scrape(path: &str, metrics: &Metrics) -> Response<Full<Bytes>> {
    match path {
        "/metrics" => {
            let encoder = TextEncoder::new();
            let mut buffer = Vec::new();
            match encoder.encode(&metrics.registry.gather(), &mut buffer) {
                Ok(()) => text_response(StatusCode::OK, encoder.format_type(), buffer),
                Err(e) => {
                    error!("Failed to encode metrics: {}", e);
                    text_response(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "text/plain",
                        "Failed to encode metrics",
                    )
                }
            }
        }
        "/health" | "/healthz" | "/ready" | "/readyz" => {
            text_response(StatusCode::OK, "text/plain", "OK")
        }
        _ => text_response(StatusCode::NOT_FOUND, "text/plain", "Not Found"),
    }
}
