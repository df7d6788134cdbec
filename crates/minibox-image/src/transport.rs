//! HTTP transport and the generic fetch-and-decode helper.
//!
//! Every registry call goes through [`Transport::get`]. A non-200 response
//! is reported as `MiniboxError::Registry`; everything else that goes wrong
//! on the wire or while decoding is `MiniboxError::Transport`.

use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::sync::Mutex;
use std::time::Duration;

use minibox_common::error::{MiniboxError, Result};
use serde::de::DeserializeOwned;

/// Response body stream.
pub type Body = Box<dyn Read + Send>;

/// A GET request with an optional header set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Absolute request URL.
    pub url: String,
    /// Headers in insertion order.
    pub headers: Vec<(String, String)>,
}

impl Request {
    /// Creates a GET request with no headers.
    #[must_use]
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
        }
    }

    /// Appends a header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Returns the first value of a header, compared case-insensitively.
    #[must_use]
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Blocking GET transport.
pub trait Transport: Send + Sync {
    /// Issues the request and returns the body of a 200 response.
    ///
    /// # Errors
    ///
    /// Returns `MiniboxError::Registry` for a non-200 status and
    /// `MiniboxError::Transport` if the request cannot be sent.
    fn get(&self, request: &Request) -> Result<Body>;
}

/// Issues a GET and decodes the JSON body into `T`.
///
/// # Errors
///
/// Propagates transport errors; a body that does not decode into `T` is
/// reported as `MiniboxError::Transport`.
pub fn fetch_json<T: DeserializeOwned>(transport: &dyn Transport, request: &Request) -> Result<T> {
    tracing::debug!(url = %request.url, "fetching JSON");
    let mut body = transport.get(request)?;
    let mut buf = Vec::new();
    let _ = body
        .read_to_end(&mut buf)
        .map_err(|e| MiniboxError::Transport {
            url: request.url.clone(),
            message: format!("read body: {e}"),
        })?;
    serde_json::from_slice(&buf).map_err(|e| MiniboxError::Transport {
        url: request.url.clone(),
        message: format!("decode: {e}"),
    })
}

/// Transport backed by a blocking `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    /// Builds a client with the given per-request timeout.
    ///
    /// `None` disables the timeout entirely.
    ///
    /// # Errors
    ///
    /// Returns `MiniboxError::Config` if the TLS backend cannot be
    /// initialized.
    pub fn new(timeout: Option<Duration>) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("minibox/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| MiniboxError::Config {
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn get(&self, request: &Request) -> Result<Body> {
        let mut builder = self.client.get(&request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let response = builder.send().map_err(|e| MiniboxError::Transport {
            url: request.url.clone(),
            message: format!("do request: {e}"),
        })?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(MiniboxError::Registry {
                url: request.url.clone(),
                status: status.as_u16(),
            });
        }
        Ok(Box::new(response))
    }
}

/// Canned response served by [`MemoryTransport`].
#[derive(Debug, Clone)]
enum Route {
    Body(Vec<u8>),
    Status(u16),
}

/// In-memory transport serving canned responses by exact URL.
///
/// Unknown URLs answer 404. Every request is recorded so callers can assert
/// on ordering and headers.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    routes: HashMap<String, Route>,
    log: Mutex<Vec<Request>>,
}

impl MemoryTransport {
    /// Creates a transport with no routes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves `body` with status 200 at `url`.
    #[must_use]
    pub fn with_body(mut self, url: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        let _ = self.routes.insert(url.into(), Route::Body(body.into()));
        self
    }

    /// Serves `value` as JSON at `url`.
    ///
    /// # Errors
    ///
    /// Returns an error if `value` cannot be serialized.
    pub fn with_json(self, url: impl Into<String>, value: &serde_json::Value) -> Result<Self> {
        let body = serde_json::to_vec(value)?;
        Ok(self.with_body(url, body))
    }

    /// Answers `url` with the given non-200 status.
    #[must_use]
    pub fn with_status(mut self, url: impl Into<String>, status: u16) -> Self {
        let _ = self.routes.insert(url.into(), Route::Status(status));
        self
    }

    /// Returns all requests received so far, in arrival order.
    #[must_use]
    pub fn requests(&self) -> Vec<Request> {
        match self.log.lock() {
            Ok(log) => log.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl Transport for MemoryTransport {
    fn get(&self, request: &Request) -> Result<Body> {
        match self.log.lock() {
            Ok(mut log) => log.push(request.clone()),
            Err(poisoned) => poisoned.into_inner().push(request.clone()),
        }
        match self.routes.get(&request.url) {
            Some(Route::Body(body)) => Ok(Box::new(Cursor::new(body.clone()))),
            Some(Route::Status(status)) => Err(MiniboxError::Registry {
                url: request.url.clone(),
                status: *status,
            }),
            None => Err(MiniboxError::Registry {
                url: request.url.clone(),
                status: 404,
            }),
        }
    }
}
