//! Response cache — keys, serialization and TTL storage of responses.

use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::store::{MemoryStore, TtlStore};
use crate::http::{Headers, Request, Response, StatusCode};

/// Headers that describe the original connection rather than the response.
const HOP_BY_HOP: [&str; 3] = ["connection", "keep-alive", "transfer-encoding"];

// What is persisted for one response.
#[derive(Debug, Serialize, Deserialize)]
struct StoredResponse {
    status: u16,
    headers: Headers,
    body: Vec<u8>,
}

/// Stores whole responses in a [`TtlStore`] under a key derived from the request.
///
/// Serialization problems never fail a call: an entry that cannot be encoded
/// is simply not stored, and one that cannot be decoded reads as a miss.
#[derive(Debug)]
pub struct ResponseCache<S = MemoryStore> {
    store: S,
}

impl ResponseCache<MemoryStore> {
    /// A cache over a [`MemoryStore`] purged every `cleanup_interval`.
    pub fn in_memory(cleanup_interval: Duration) -> Self {
        Self::new(MemoryStore::new(cleanup_interval))
    }
}

impl<S: TtlStore> ResponseCache<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// The cache key for `req`: method plus path and query.
    ///
    /// Headers and body are ignored, so requests differing only in those
    /// share an entry.
    pub fn key_for(req: &Request) -> String {
        format!("{} {}", req.method(), req.path_and_query())
    }

    /// The response stored under `key`, if present and not expired.
    pub fn get(&self, key: &str) -> Option<Response> {
        let raw = self.store.get(key)?;
        let stored: StoredResponse = match serde_json::from_slice(&raw) {
            Ok(stored) => stored,
            Err(e) => {
                warn!(key, error = %e, "discarding undecodable cache entry");
                return None;
            }
        };
        let Some(status) = StatusCode::from_u16(stored.status) else {
            warn!(key, status = stored.status, "discarding cache entry with invalid status");
            return None;
        };
        Some(Response::from_parts(
            status,
            stored.headers,
            Bytes::from(stored.body),
        ))
    }

    /// Stores `response` under `key` for `ttl`. Returns whether it was stored.
    pub fn put(&self, key: &str, response: &Response, ttl: Duration) -> bool {
        let mut headers = response.headers().clone();
        headers.retain(|name, _| !HOP_BY_HOP.iter().any(|h| name.eq_ignore_ascii_case(h)));

        let stored = StoredResponse {
            status: response.status().as_u16(),
            headers,
            body: response.body_bytes().to_vec(),
        };
        match serde_json::to_vec(&stored) {
            Ok(encoded) => {
                self.store.put(key.to_owned(), Bytes::from(encoded), ttl);
                true
            }
            Err(e) => {
                warn!(key, error = %e, "response not cached: serialization failed");
                false
            }
        }
    }
}
