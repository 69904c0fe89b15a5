//! Outgoing HTTP/1.1 requests.
//!
//! A [`Request`] is built from an absolute `http://` URI (or a bare
//! origin-form path for callers that never reach the network, such as tests
//! of the caching layer) and encoded to wire bytes by [`Request::encode`].

use std::borrow::Cow;

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use super::{Headers, Method};

/// Port used when the URI does not name one.
const DEFAULT_PORT: u16 = 80;

/// Errors produced while parsing a request target.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("unsupported URI scheme `{0}` (only http is supported)")]
    UnsupportedScheme(String),

    #[error("invalid URI `{0}`")]
    InvalidUri(String),

    #[error("invalid port in `{0}`")]
    InvalidPort(String),
}

/// An HTTP request on its way out of the pipeline.
///
/// # Examples
///
/// ```
/// use cachet::http::{Method, Request};
///
/// let req = Request::get("http://api.local:8080/users/7?fields=name")
///     .unwrap()
///     .header("Accept", "application/json");
///
/// assert_eq!(req.method(), &Method::Get);
/// assert_eq!(req.host(), Some("api.local"));
/// assert_eq!(req.port(), 8080);
/// assert_eq!(req.path(), "/users/7");
/// assert_eq!(req.query_string(), Some("fields=name"));
/// assert_eq!(req.path_and_query(), "/users/7?fields=name");
/// ```
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    host: Option<String>,
    port: u16,
    path: String,
    query: Option<String>,
    headers: Headers,
    body: Bytes,
}

impl Request {
    /// Builds a request for `method` against `uri`.
    ///
    /// `uri` is either absolute (`http://host[:port]/path?query`) or an
    /// origin-form path (`/path?query`) without a host. Fragments are dropped.
    ///
    /// # Errors
    ///
    /// - [`RequestError::UnsupportedScheme`] for any scheme other than `http`.
    /// - [`RequestError::InvalidUri`] for an empty host or a relative path.
    /// - [`RequestError::InvalidPort`] when the port is not a valid `u16`.
    pub fn new(method: Method, uri: &str) -> Result<Self, RequestError> {
        let uri_no_fragment = uri.split('#').next().unwrap_or_default();

        let (host, port, target) = if let Some(rest) = uri_no_fragment.strip_prefix("http://") {
            let split = rest.find(['/', '?']).unwrap_or(rest.len());
            let (authority, target) = rest.split_at(split);
            let (host, port) = split_authority(authority, uri)?;
            (Some(host), port, target)
        } else if let Some((scheme, _)) = uri_no_fragment.split_once("://") {
            return Err(RequestError::UnsupportedScheme(scheme.to_owned()));
        } else if uri_no_fragment.starts_with('/') {
            (None, DEFAULT_PORT, uri_no_fragment)
        } else {
            return Err(RequestError::InvalidUri(uri.to_owned()));
        };

        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, Some(query.to_owned())),
            None => (target, None),
        };
        let path = if path.is_empty() { "/" } else { path };

        Ok(Self {
            method,
            host,
            port,
            path: path.to_owned(),
            query,
            headers: Headers::new(),
            body: Bytes::new(),
        })
    }

    /// Shorthand for `Request::new(Method::Get, uri)`.
    pub fn get(uri: &str) -> Result<Self, RequestError> {
        Self::new(Method::Get, uri)
    }

    /// Shorthand for `Request::new(Method::Post, uri)`.
    pub fn post(uri: &str) -> Result<Self, RequestError> {
        Self::new(Method::Post, uri)
    }

    /// Appends a request header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Sets the request body.
    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Target host, or `None` for origin-form requests.
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Returns the request path (without the query string).
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the raw query string (without the leading `?`), if any.
    pub fn query_string(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// The request target as sent on the request line: path plus `?query`.
    pub fn path_and_query(&self) -> Cow<'_, str> {
        match &self.query {
            Some(query) => Cow::Owned(format!("{}?{}", self.path, query)),
            None => Cow::Borrowed(&self.path),
        }
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn body_bytes(&self) -> &Bytes {
        &self.body
    }

    /// Value for the `Host` header: the host, plus the port when it is not 80.
    pub fn authority(&self) -> Option<String> {
        let host = self.host.as_deref()?;
        Some(if self.port == DEFAULT_PORT {
            host.to_owned()
        } else {
            format!("{host}:{}", self.port)
        })
    }

    /// Serializes the request into HTTP/1.1 wire format.
    ///
    /// Adds, unless already present:
    /// - `Host` (when the request has a host).
    /// - `Connection: close` — the transport uses one connection per call.
    /// - `Content-Length`, for any non-empty body or body-carrying method.
    pub fn encode(&self) -> BytesMut {
        let target = self.path_and_query();
        let mut buf =
            BytesMut::with_capacity(64 + target.len() + self.headers.len() * 48 + self.body.len());

        buf.put(format!("{} {} HTTP/1.1\r\n", self.method, target).as_bytes());

        if !self.headers.contains("host") {
            if let Some(authority) = self.authority() {
                buf.put(format!("Host: {authority}\r\n").as_bytes());
            }
        }
        for (name, value) in self.headers.iter() {
            buf.put(format!("{name}: {value}\r\n").as_bytes());
        }
        if !self.headers.contains("connection") {
            buf.put(&b"Connection: close\r\n"[..]);
        }
        let needs_length = !self.body.is_empty() || !self.method.expects_no_body();
        if needs_length && !self.headers.contains("content-length") {
            buf.put(format!("Content-Length: {}\r\n", self.body.len()).as_bytes());
        }

        buf.put(&b"\r\n"[..]);
        buf.put(self.body.as_ref());
        buf
    }
}

fn split_authority(authority: &str, uri: &str) -> Result<(String, u16), RequestError> {
    let (host, port) = match authority.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|_| RequestError::InvalidPort(uri.to_owned()))?;
            (host, port)
        }
        None => (authority, DEFAULT_PORT),
    };
    if host.is_empty() {
        return Err(RequestError::InvalidUri(uri.to_owned()));
    }
    Ok((host.to_owned(), port))
}
