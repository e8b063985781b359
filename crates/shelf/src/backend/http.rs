//! Shared HTTP transport for remote backends
//!
//! Wraps a ureq agent with bearer authentication. A 401 response triggers
//! exactly one session refresh and one retry; anything still rejected after
//! that is reported as a transport failure.

use log::{debug, warn};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use ureq::http::Response;
use ureq::{Agent, Body};

use super::session::Session;
use crate::error::{SyncError, SyncResult};

/// HTTP methods used by the backends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

/// Authenticated JSON-over-HTTP transport
pub struct HttpTransport {
    agent: Agent,
    base_url: String,
    session: Arc<dyn Session>,
    headers: Vec<(String, String)>,
}

impl HttpTransport {
    /// Default per-request timeout
    const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Create a transport rooted at `base_url` (no trailing slash needed)
    pub fn new(base_url: impl Into<String>, session: Arc<dyn Session>) -> Self {
        Self::with_timeout(base_url, session, Self::DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(
        base_url: impl Into<String>,
        session: Arc<dyn Session>,
        timeout: Duration,
    ) -> Self {
        let config = Agent::config_builder()
            .timeout_global(Some(timeout))
            .build();

        Self {
            agent: Agent::new_with_config(config),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            session,
            headers: Vec::new(),
        }
    }

    /// Add a header sent with every request
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn session(&self) -> &Arc<dyn Session> {
        &self.session
    }

    /// GET `path` and decode the JSON body
    pub fn get_json<T: DeserializeOwned>(&self, path: &str) -> SyncResult<T> {
        let mut response = self.execute(Method::Get, path, None, &[])?;
        response
            .body_mut()
            .read_json()
            .map_err(|e| {
                SyncError::transport(format!("Failed to parse response from {}: {}", path, e))
            })
    }

    /// Send a JSON body; the response body is discarded
    pub fn send_json<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: &B,
        extra_headers: &[(&str, &str)],
    ) -> SyncResult<()> {
        let body = serde_json::to_value(body)
            .map_err(|e| SyncError::transport(format!("Failed to encode request body: {}", e)))?;
        self.execute(method, path, Some(&body), extra_headers)?;
        Ok(())
    }

    /// DELETE `path`
    pub fn delete(&self, path: &str) -> SyncResult<()> {
        self.execute(Method::Delete, path, None, &[])?;
        Ok(())
    }

    /// Run a request, refreshing the session once on 401
    fn execute(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
        extra_headers: &[(&str, &str)],
    ) -> SyncResult<Response<Body>> {
        let token = self.session.access_token()?;

        match self.send_once(method, path, body, extra_headers, &token) {
            Err(ureq::Error::StatusCode(401)) => {
                debug!("{:?} {} rejected with 401, refreshing session", method, path);
                let token = self.session.refresh()?;
                match self.send_once(method, path, body, extra_headers, &token) {
                    Err(ureq::Error::StatusCode(401)) => {
                        warn!("{:?} {} still unauthorized after refresh", method, path);
                        Err(SyncError::transport(format!(
                            "{:?} {} unauthorized after session refresh",
                            method, path
                        )))
                    }
                    other => other.map_err(|e| transport_error(method, path, e)),
                }
            }
            other => other.map_err(|e| transport_error(method, path, e)),
        }
    }

    fn send_once(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
        extra_headers: &[(&str, &str)],
        token: &str,
    ) -> Result<Response<Body>, ureq::Error> {
        let url = format!("{}{}", self.base_url, path);

        match method {
            Method::Get => self
                .decorate(self.agent.get(&url), token, extra_headers)
                .call(),
            Method::Delete => self
                .decorate(self.agent.delete(&url), token, extra_headers)
                .call(),
            Method::Post => {
                let request = self.decorate(self.agent.post(&url), token, extra_headers);
                match body {
                    Some(body) => request.send_json(body),
                    None => request.send_empty(),
                }
            }
            Method::Put => {
                let request = self.decorate(self.agent.put(&url), token, extra_headers);
                match body {
                    Some(body) => request.send_json(body),
                    None => request.send_empty(),
                }
            }
        }
    }

    fn decorate<B>(
        &self,
        mut request: ureq::RequestBuilder<B>,
        token: &str,
        extra_headers: &[(&str, &str)],
    ) -> ureq::RequestBuilder<B> {
        request = request
            .header("Authorization", &format!("Bearer {}", token))
            .header("Accept", "application/json");
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        for (name, value) in extra_headers {
            request = request.header(*name, *value);
        }
        request
    }
}

fn transport_error(method: Method, path: &str, e: ureq::Error) -> SyncError {
    SyncError::transport(format!("{:?} {} failed: {}", method, path, e))
}
