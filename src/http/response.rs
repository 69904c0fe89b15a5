//! HTTP/1.1 responses: parsing from the wire and a small builder.
//!
//! Bodies are always fully buffered into a [`Bytes`] value. Cloning a
//! response (or handing out its body) never shares a read cursor, so any
//! number of holders can read the same body independently.

use std::borrow::Cow;

use bytes::Bytes;
use thiserror::Error;

use super::{Headers, StatusCode};

/// Maximum number of headers accepted in a response.
const MAX_HEADERS: usize = 64;

/// Errors that can occur while parsing an HTTP/1.1 response.
#[derive(Debug, Error)]
pub enum ResponseError {
    #[error("response is incomplete — more data needed")]
    Incomplete,

    #[error("HTTP parse error: {0}")]
    Parse(#[from] httparse::Error),

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("invalid status code {0}")]
    InvalidStatus(u16),

    #[error("malformed chunked body")]
    InvalidChunk,

    #[error("invalid Content-Length header `{0}`")]
    InvalidContentLength(String),
}

/// An HTTP response with a fully buffered body.
///
/// # Examples
///
/// ```
/// use cachet::http::{Response, StatusCode};
///
/// let raw = b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 5\r\n\r\nhello";
/// let response = Response::parse(raw, true).unwrap();
///
/// assert_eq!(response.status(), StatusCode::OK);
/// assert_eq!(response.headers().get("content-type"), Some("text/plain"));
/// assert_eq!(response.text(), "hello");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: Bytes,
}

impl Response {
    /// Creates a new response with the given status and an empty body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    /// Reassembles a response from its parts.
    pub fn from_parts(status: StatusCode, headers: Headers, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// Appends a response header. Multiple calls with the same name are additive.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Sets the response body.
    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// A handle to the body bytes. Each handle reads independently.
    pub fn body_bytes(&self) -> Bytes {
        self.body.clone()
    }

    pub fn into_parts(self) -> (StatusCode, Headers, Bytes) {
        (self.status, self.headers, self.body)
    }

    /// The body as text, replacing invalid UTF-8 sequences.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Decodes the body as JSON.
    pub fn json<T>(&self) -> Result<T, serde_json::Error>
    where
        T: serde::de::DeserializeOwned,
    {
        serde_json::from_slice(&self.body)
    }

    /// Parses a complete response from `buf`.
    ///
    /// `eof` tells the parser the peer has closed the connection, which is
    /// what terminates a body that has neither `Content-Length` nor chunked
    /// framing.
    ///
    /// # Errors
    ///
    /// - [`ResponseError::Incomplete`] — more bytes are needed.
    /// - [`ResponseError::Parse`] / [`ResponseError::InvalidChunk`] /
    ///   [`ResponseError::InvalidContentLength`] — the data is malformed.
    pub fn parse(buf: &[u8], eof: bool) -> Result<Self, ResponseError> {
        let head = parse_head(buf)?.ok_or(ResponseError::Incomplete)?;
        let mut headers = head.headers;
        let rest = &buf[head.body_offset..];

        let body = match head.framing {
            Framing::Length(length) => {
                if rest.len() < length {
                    return Err(ResponseError::Incomplete);
                }
                Bytes::copy_from_slice(&rest[..length])
            }
            Framing::Chunked => {
                let body = decode_chunked(rest)?;
                headers.remove("transfer-encoding");
                headers.set("Content-Length", body.len().to_string());
                body
            }
            Framing::UntilClose if eof => Bytes::copy_from_slice(rest),
            Framing::UntilClose => return Err(ResponseError::Incomplete),
        };

        Ok(Self {
            status: head.status,
            headers,
            body,
        })
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new(StatusCode::OK)
    }
}

/// How the end of a response body is found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    Length(usize),
    Chunked,
    UntilClose,
}

struct Head {
    status: StatusCode,
    headers: Headers,
    body_offset: usize,
    framing: Framing,
}

// `Ok(None)` until the blank line ending the head has arrived.
fn parse_head(buf: &[u8]) -> Result<Option<Head>, ResponseError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut raw = httparse::Response::new(&mut headers);

    let body_offset = match raw.parse(buf)? {
        httparse::Status::Complete(offset) => offset,
        httparse::Status::Partial => return Ok(None),
    };

    let code = raw.code.ok_or(ResponseError::MissingField { field: "status" })?;
    let status = StatusCode::from_u16(code).ok_or(ResponseError::InvalidStatus(code))?;

    let mut header_map = Headers::with_capacity(raw.headers.len());
    for header in raw.headers.iter() {
        if let Ok(value) = std::str::from_utf8(header.value) {
            header_map.insert(header.name, value);
        }
    }

    let framing = if matches!(code, 100..=199 | 204 | 304) {
        Framing::Length(0)
    } else if is_chunked(&header_map) {
        Framing::Chunked
    } else if let Some(length) = header_map.get("content-length") {
        let length = length
            .trim()
            .parse()
            .map_err(|_| ResponseError::InvalidContentLength(length.to_owned()))?;
        Framing::Length(length)
    } else {
        Framing::UntilClose
    };

    Ok(Some(Head {
        status,
        headers: header_map,
        body_offset,
        framing,
    }))
}

/// Follows a response as it is read into one growing buffer, so that
/// [`Response::parse`] runs once instead of after every read.
///
/// Each call to [`is_complete`](Self::is_complete) only looks at bytes past
/// the ones earlier calls already accounted for; the head is parsed once.
#[derive(Debug, Default)]
pub(crate) struct Progress {
    head: Option<(usize, Framing)>,
    // Bytes already searched for the end of the head.
    head_scanned: usize,
    // Offset of the next unread chunk-size or trailer line.
    cursor: usize,
    in_trailer: bool,
}

impl Progress {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Whether `buf` now holds everything [`Response::parse`] needs.
    ///
    /// `buf` must only ever grow between calls. Malformed heads and chunk
    /// sizes are reported as soon as they are seen.
    pub(crate) fn is_complete(&mut self, buf: &[u8], eof: bool) -> Result<bool, ResponseError> {
        let (body_offset, framing) = match self.head {
            Some(head) => head,
            None => {
                if !self.head_may_be_complete(buf) {
                    return Ok(eof);
                }
                match parse_head(buf)? {
                    Some(head) => {
                        self.head = Some((head.body_offset, head.framing));
                        self.cursor = head.body_offset;
                        (head.body_offset, head.framing)
                    }
                    None => return Ok(eof),
                }
            }
        };
        if eof {
            return Ok(true);
        }

        match framing {
            Framing::Length(length) => Ok(buf.len() - body_offset >= length),
            Framing::UntilClose => Ok(false),
            Framing::Chunked => self.scan_chunks(buf),
        }
    }

    // Looks for a blank line (`\n\n` or `\n\r\n`) in the bytes not yet searched.
    fn head_may_be_complete(&mut self, buf: &[u8]) -> bool {
        let from = self.head_scanned.saturating_sub(2);
        self.head_scanned = buf.len();
        let tail = &buf[from.min(buf.len())..];
        tail.windows(2).any(|w| w == b"\n\n") || tail.windows(3).any(|w| w == b"\n\r\n")
    }

    fn scan_chunks(&mut self, buf: &[u8]) -> Result<bool, ResponseError> {
        loop {
            let rest = &buf[self.cursor..];

            if self.in_trailer {
                let Some(line_end) = find_crlf(rest) else {
                    return Ok(false);
                };
                self.cursor += line_end + 2;
                if line_end == 0 {
                    return Ok(true);
                }
                continue;
            }

            let (offset, size) = match httparse::parse_chunk_size(rest) {
                Ok(httparse::Status::Complete(pair)) => pair,
                Ok(httparse::Status::Partial) => return Ok(false),
                Err(_) => return Err(ResponseError::InvalidChunk),
            };
            if size == 0 {
                self.cursor += offset;
                self.in_trailer = true;
                continue;
            }

            // Chunk data plus its CRLF.
            let end = usize::try_from(size)
                .ok()
                .and_then(|size| size.checked_add(offset)?.checked_add(2))
                .ok_or(ResponseError::InvalidChunk)?;
            if rest.len() < end {
                return Ok(false);
            }
            self.cursor += end;
        }
    }
}

fn is_chunked(headers: &Headers) -> bool {
    headers
        .get_all("transfer-encoding")
        .flat_map(|v| v.split(','))
        .any(|coding| coding.trim().eq_ignore_ascii_case("chunked"))
}

// Decodes a complete chunked body, skipping any trailer section.
fn decode_chunked(mut buf: &[u8]) -> Result<Bytes, ResponseError> {
    let mut body = Vec::with_capacity(buf.len());

    loop {
        let (offset, size) = match httparse::parse_chunk_size(buf) {
            Ok(httparse::Status::Complete(pair)) => pair,
            Ok(httparse::Status::Partial) => return Err(ResponseError::Incomplete),
            Err(_) => return Err(ResponseError::InvalidChunk),
        };
        buf = &buf[offset..];

        if size == 0 {
            // Trailer fields, then the terminating empty line.
            loop {
                let line_end = find_crlf(buf).ok_or(ResponseError::Incomplete)?;
                buf = &buf[line_end + 2..];
                if line_end == 0 {
                    return Ok(Bytes::from(body));
                }
            }
        }

        let size = usize::try_from(size).map_err(|_| ResponseError::InvalidChunk)?;
        let end = size.checked_add(2).ok_or(ResponseError::InvalidChunk)?;
        if buf.len() < end {
            return Err(ResponseError::Incomplete);
        }
        if &buf[size..end] != b"\r\n" {
            return Err(ResponseError::InvalidChunk);
        }
        body.extend_from_slice(&buf[..size]);
        buf = &buf[end..];
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}
