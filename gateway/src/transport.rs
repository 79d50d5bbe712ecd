//! Executes `glpi_core` request values over real HTTP.
//!
//! The agent is built with `http_status_as_error(false)` so 4xx/5xx answers
//! come back as data and `GlpiClient::parse_*` decides what they mean. The
//! agent is shared by every request; it only holds the connection pool.

use std::io;
use std::time::Duration;

use glpi_core::{HttpMethod, HttpRequest, HttpResponse};

use crate::error::GatewayError;

/// Blocking executor for `HttpRequest` values.
pub trait Transport: Send + Sync {
    fn execute(&self, req: &HttpRequest) -> Result<HttpResponse, GatewayError>;
}

#[derive(Clone)]
pub struct UreqTransport {
    agent: ureq::Agent,
}

impl UreqTransport {
    /// `timeout` bounds each call end to end (connect, send, receive).
    pub fn new(timeout: Duration) -> Self {
        let agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(timeout))
            .build()
            .new_agent();
        Self { agent }
    }
}

fn prepare<B>(mut builder: ureq::RequestBuilder<B>, req: &HttpRequest) -> ureq::RequestBuilder<B> {
    for (name, value) in &req.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    for (key, value) in &req.query {
        builder = builder.query(key, value);
    }
    builder
}

fn map_error(err: ureq::Error) -> GatewayError {
    match err {
        ureq::Error::Timeout(_) => GatewayError::Timeout,
        ureq::Error::Io(e) if e.kind() == io::ErrorKind::TimedOut => GatewayError::Timeout,
        other => GatewayError::Transport(other.to_string()),
    }
}

impl Transport for UreqTransport {
    fn execute(&self, req: &HttpRequest) -> Result<HttpResponse, GatewayError> {
        let result = match (req.method, req.body.as_deref()) {
            (HttpMethod::Get, _) => prepare(self.agent.get(&req.url), req).call(),
            (HttpMethod::Delete, _) => prepare(self.agent.delete(&req.url), req).call(),
            (HttpMethod::Post, Some(body)) => prepare(self.agent.post(&req.url), req).send(body.as_bytes()),
            (HttpMethod::Post, None) => prepare(self.agent.post(&req.url), req).send_empty(),
            (HttpMethod::Put, Some(body)) => prepare(self.agent.put(&req.url), req).send(body.as_bytes()),
            (HttpMethod::Put, None) => prepare(self.agent.put(&req.url), req).send_empty(),
        };
        let mut response = result.map_err(map_error)?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response
            .body_mut()
            .read_to_string()
            .map_err(map_error)?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}
