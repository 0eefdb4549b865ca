// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP protocol adapter.
//!
//! The transport itself sits behind the [`HttpClient`] trait so the
//! engine never owns sockets; [`HyperClient`] is the default
//! implementation and [`MockClient`] the scriptable test double. On top
//! of the trait sit the two protocol exchanges: the new-session status
//! request (`type=m` GET) and the beacon chunk POST.

use crate::config::OpenKitConfig;
use crate::MutexExt;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use libdd_rum_protocol::{
    encode, ResponseAttributes, AGENT_TECHNOLOGY_TYPE, PLATFORM_TYPE_OPENKIT, PROTOCOL_VERSION,
};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, warn};

/// Transport-level failures. Protocol-level failures (bad status, bad
/// body) are represented by [`SendError`].
#[derive(Debug, Error)]
pub enum HttpError {
    /// The connection could not be established or broke mid-exchange.
    #[error("connection failed: {0}")]
    Connection(String),
    /// The exchange exceeded the configured request timeout.
    #[error("request timed out")]
    TimedOut,
    /// The request could not be constructed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Outcome of one beacon exchange.
#[derive(Debug, Error)]
pub(crate) enum SendError {
    #[error(transparent)]
    Transport(#[from] HttpError),
    #[error("erroneous response status {0}")]
    ErroneousStatus(u16),
    #[error("unparsable response body: {0}")]
    UnparsableBody(#[from] libdd_rum_protocol::ResponseParseError),
}

pub type ResponseFuture =
    Pin<Box<dyn Future<Output = Result<http::Response<Bytes>, HttpError>> + Send>>;

/// Minimal client contract the engine needs: one request, one buffered
/// response.
pub trait HttpClient: Send + Sync {
    fn request(&self, req: http::Request<Bytes>) -> ResponseFuture;
}

/// A parsed, non-erroneous collector response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusResponse {
    pub status: u16,
    pub attributes: ResponseAttributes,
}

/// Default transport: a hyper legacy client. Connections are not kept
/// alive between sends; with the multi-second send cadence a pooled
/// connection would routinely be dead on arrival.
pub struct HyperClient {
    client: hyper_util::client::legacy::Client<
        hyper_util::client::legacy::connect::HttpConnector,
        Full<Bytes>,
    >,
}

impl HyperClient {
    pub fn new() -> Self {
        Self {
            client: hyper_util::client::legacy::Client::builder(
                hyper_util::rt::TokioExecutor::default(),
            )
            .pool_max_idle_per_host(0)
            .build_http(),
        }
    }
}

impl Default for HyperClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient for HyperClient {
    fn request(&self, req: http::Request<Bytes>) -> ResponseFuture {
        let client = self.client.clone();
        Box::pin(async move {
            let (parts, body) = req.into_parts();
            let req = http::Request::from_parts(parts, Full::new(body));
            let response = client
                .request(req)
                .await
                .map_err(|e| HttpError::Connection(e.to_string()))?;
            let (parts, body) = response.into_parts();
            let body = body
                .collect()
                .await
                .map_err(|e| HttpError::Connection(e.to_string()))?
                .to_bytes();
            Ok(http::Response::from_parts(parts, body))
        })
    }
}

/// One request/response pair seen by a [`MockClient`].
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: http::Method,
    pub uri: String,
    pub body: String,
}

/// Scriptable in-memory client: answers every request with the next
/// scripted response (the last one repeats) and records what it saw.
#[derive(Clone, Default)]
pub struct MockClient {
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    responses: Arc<Mutex<Vec<(u16, String)>>>,
}

impl MockClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a response; the last queued response answers all
    /// remaining requests.
    pub fn enqueue_response(&self, status: u16, body: &str) {
        self.responses.lock_or_panic().push((status, body.to_string()));
    }

    /// Drops any scripted responses that have not played yet.
    pub fn clear_responses(&self) {
        self.responses.lock_or_panic().clear();
    }

    pub fn recorded_requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock_or_panic().clone()
    }

    /// Concatenation of every POSTed beacon body.
    pub fn posted_beacons(&self) -> Vec<String> {
        self.requests
            .lock_or_panic()
            .iter()
            .filter(|r| r.method == http::Method::POST)
            .map(|r| r.body.clone())
            .collect()
    }
}

impl HttpClient for MockClient {
    fn request(&self, req: http::Request<Bytes>) -> ResponseFuture {
        let this = self.clone();
        Box::pin(async move {
            let method = req.method().clone();
            let uri = req.uri().to_string();
            let body = String::from_utf8_lossy(req.body()).into_owned();
            let (status, response_body) = {
                let mut responses = this.responses.lock_or_panic();
                match responses.len() {
                    0 => (200, "type=m".to_string()),
                    1 => responses[0].clone(),
                    _ => responses.remove(0),
                }
            };
            this.requests.lock_or_panic().push(RecordedRequest {
                method,
                uri,
                body,
            });
            http::Response::builder()
                .status(status)
                .body(Bytes::from(response_body))
                .map_err(|e| HttpError::InvalidRequest(e.to_string()))
        })
    }
}

fn monitor_url(config: &OpenKitConfig, server_id: i32) -> String {
    format!(
        "{}?type=m&srvid={}&app={}&va={}&pt={}&tt={}",
        config.endpoint,
        server_id,
        encode::percent_encode(&config.application_id),
        encode::percent_encode(env!("CARGO_PKG_VERSION")),
        PLATFORM_TYPE_OPENKIT,
        AGENT_TECHNOLOGY_TYPE,
    )
}

fn classify(response: http::Response<Bytes>) -> Result<StatusResponse, SendError> {
    let status = response.status().as_u16();
    if !(200..400).contains(&status) {
        return Err(SendError::ErroneousStatus(status));
    }
    let body = String::from_utf8_lossy(response.body());
    let attributes = ResponseAttributes::parse(&body)?;
    Ok(StatusResponse { status, attributes })
}

async fn exchange(
    client: &dyn HttpClient,
    config: &OpenKitConfig,
    request: http::Request<Bytes>,
) -> Result<StatusResponse, SendError> {
    let response = tokio::time::timeout(config.request_timeout, client.request(request))
        .await
        .map_err(|_| HttpError::TimedOut)??;
    classify(response)
}

/// GET of the new-session endpoint; carries no beacon data.
pub(crate) async fn send_status_request(
    client: &dyn HttpClient,
    config: &OpenKitConfig,
    server_id: i32,
) -> Result<StatusResponse, SendError> {
    let url = monitor_url(config, server_id);
    debug!(http.url = %url, "Sending status request");
    let request = http::Request::builder()
        .method(http::Method::GET)
        .uri(url.as_str())
        .header(http::header::USER_AGENT, agent_header())
        .body(Bytes::new())
        .map_err(|e| HttpError::InvalidRequest(e.to_string()))?;
    exchange(client, config, request).await
}

/// POST of one beacon chunk. `additional_params` are pre-encoded query
/// pairs appended verbatim to the monitor URL.
pub(crate) async fn send_beacon_request(
    client: &dyn HttpClient,
    config: &OpenKitConfig,
    server_id: i32,
    additional_params: Option<&str>,
    chunk: &str,
) -> Result<StatusResponse, SendError> {
    let mut url = monitor_url(config, server_id);
    if let Some(params) = additional_params.filter(|p| !p.is_empty()) {
        url.push('&');
        url.push_str(params);
    }
    debug!(
        http.url = %url,
        beacon.chunk_bytes = chunk.len(),
        "Sending beacon chunk"
    );
    let request = http::Request::builder()
        .method(http::Method::POST)
        .uri(url.as_str())
        .header(http::header::USER_AGENT, agent_header())
        .header(http::header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Bytes::from(chunk.as_bytes().to_vec()))
        .map_err(|e| {
            warn!(error = %e, "Failed to build beacon request");
            HttpError::InvalidRequest(e.to_string())
        })?;
    exchange(client, config, request).await
}

fn agent_header() -> String {
    format!(
        "{}/{}/{}",
        AGENT_TECHNOLOGY_TYPE,
        PROTOCOL_VERSION,
        env!("CARGO_PKG_VERSION")
    )
}
