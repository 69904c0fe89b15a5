//! HTTP/1.1 over a fresh Tokio TCP connection per call.

use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, trace};

use super::{BoxFuture, CallError, Caller};
use crate::http::response::Progress;
use crate::http::{Request, Response};

/// Maximum size of a complete HTTP response we will buffer (8 MiB).
const MAX_RESPONSE_SIZE: usize = 8 * 1024 * 1024;

/// Initial read buffer capacity per connection.
const INITIAL_BUF_SIZE: usize = 4096;

/// The leaf [`Caller`]: writes the request to a new TCP connection and reads
/// back one complete response.
///
/// Requests are sent with `Connection: close`. The response body is read in
/// full before the call resolves, so it can be both cached and returned.
/// Cancellation follows Tokio's usual rule: dropping the future drops the
/// connection.
///
/// # Examples
///
/// ```rust,no_run
/// use std::time::Duration;
/// use cachet::caller::{BaseClient, Caller};
/// use cachet::http::Request;
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let client = BaseClient::new().with_timeout(Duration::from_secs(5));
/// let response = client.call(Request::get("http://127.0.0.1:8080/health")?).await?;
/// println!("{}", response.status());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct BaseClient {
    timeout: Option<Duration>,
}

impl BaseClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bounds each call (connect, write and read) by `timeout`.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    async fn perform(req: Request) -> Result<Response, CallError> {
        let host = req.host().ok_or(CallError::MissingHost)?;
        let addr = format!("{}:{}", host, req.port());

        let mut stream = TcpStream::connect(&addr)
            .await
            .map_err(|e| CallError::Connect {
                addr: addr.clone(),
                source: e,
            })?;
        debug!(%addr, method = %req.method(), path = %req.path(), "sending request");

        stream.write_all(&req.encode()).await?;
        stream.flush().await?;

        let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);
        let mut progress = Progress::new();
        loop {
            let bytes_read = stream.read_buf(&mut buf).await?;
            let eof = bytes_read == 0;

            if buf.len() > MAX_RESPONSE_SIZE {
                return Err(CallError::ResponseTooLarge {
                    max_bytes: MAX_RESPONSE_SIZE,
                });
            }

            if !progress.is_complete(&buf, eof)? {
                continue;
            }
            let response = Response::parse(&buf, eof)?;
            trace!(%addr, status = %response.status(), "response received");
            return Ok(response);
        }
    }
}

impl Caller for BaseClient {
    fn call(&self, req: Request) -> BoxFuture<'_, Result<Response, CallError>> {
        Box::pin(async move {
            match self.timeout {
                Some(limit) => tokio::time::timeout(limit, Self::perform(req))
                    .await
                    .map_err(|_| CallError::Timeout(limit))?,
                None => Self::perform(req).await,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{ResponseError, StatusCode};
    use tokio::net::TcpListener;

    // Serves `reply` to a single connection and returns the request it read.
    async fn serve_once(reply: &'static [u8]) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let n = stream.read(&mut buf).await.unwrap();
            stream.write_all(reply).await.unwrap();
            stream.shutdown().await.unwrap();
            String::from_utf8_lossy(&buf[..n]).into_owned()
        });
        (format!("http://{addr}"), handle)
    }

    #[tokio::test]
    async fn round_trip() {
        let (base, server) =
            serve_once(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello").await;
        let response = BaseClient::new()
            .call(Request::get(&format!("{base}/greet?x=1")).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.text(), "hello");

        let seen = server.await.unwrap();
        assert!(seen.starts_with("GET /greet?x=1 HTTP/1.1\r\n"));
        assert!(seen.contains("Connection: close\r\n"));
    }

    // Writes `pieces` with a pause between each, then holds the connection
    // open so that only the response framing can end the read.
    async fn serve_in_pieces(pieces: &'static [&'static [u8]]) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let _ = stream.read(&mut buf).await.unwrap();
            for piece in pieces {
                stream.write_all(piece).await.unwrap();
                stream.flush().await.unwrap();
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn content_length_response_in_pieces() {
        let base = serve_in_pieces(&[
            b"HTTP/1.1 200 OK\r\nCont",
            b"ent-Length: 11\r\n",
            b"\r\nhello",
            b" world",
        ])
        .await;
        let response = BaseClient::new()
            .with_timeout(Duration::from_secs(5))
            .call(Request::get(&base).unwrap())
            .await
            .unwrap();
        assert_eq!(response.text(), "hello world");
    }

    #[tokio::test]
    async fn chunked_response_in_pieces() {
        let base = serve_in_pieces(&[
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n",
            b"5\r\nhel",
            b"lo\r\n6\r\n world\r\n",
            b"0\r\n",
            b"\r\n",
        ])
        .await;
        let response = BaseClient::new()
            .with_timeout(Duration::from_secs(5))
            .call(Request::get(&base).unwrap())
            .await
            .unwrap();
        assert_eq!(response.text(), "hello world");
        assert_eq!(response.headers().get("content-length"), Some("11"));
    }

    #[tokio::test]
    async fn oversized_chunk_is_an_error() {
        let (base, _server) = serve_once(
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\nffffffffffffffff\r\nab\r\n0\r\n\r\n",
        )
        .await;
        let err = BaseClient::new()
            .call(Request::get(&base).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::Response(ResponseError::InvalidChunk)));
    }

    #[tokio::test]
    async fn body_until_close() {
        let (base, _server) = serve_once(b"HTTP/1.1 200 OK\r\n\r\nstreamed").await;
        let response = BaseClient::new()
            .call(Request::get(&base).unwrap())
            .await
            .unwrap();
        assert_eq!(response.text(), "streamed");
    }

    #[tokio::test]
    async fn truncated_response_is_an_error() {
        let (base, _server) =
            serve_once(b"HTTP/1.1 200 OK\r\nContent-Length: 50\r\n\r\nshort").await;
        let err = BaseClient::new()
            .call(Request::get(&base).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::Response(ResponseError::Incomplete)));
    }

    #[tokio::test]
    async fn missing_host() {
        let err = BaseClient::new()
            .call(Request::get("/only/a/path").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::MissingHost));
    }

    #[tokio::test]
    async fn connect_refused() {
        // Bind then drop to obtain a port nobody listens on.
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };
        let err = BaseClient::new()
            .call(Request::get(&format!("http://{addr}/")).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::Connect { .. }));
    }

    #[tokio::test]
    async fn times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _server = tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(60)).await;
        });

        let err = BaseClient::new()
            .with_timeout(Duration::from_millis(50))
            .call(Request::get(&format!("http://{addr}/")).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::Timeout(_)));
    }
}
