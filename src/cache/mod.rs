//! Caching stage — replays stored responses for allow-listed requests.
//!
//! ## Core types
//!
//! - [`Cacher`] — the [`Caller`] that consults the table and the cache.
//! - [`CacheTable`] / [`CacheRule`] — which requests are cached, and for how long.
//! - [`ResponseCache`] — key derivation and response (de)serialization.
//! - [`TtlStore`] / [`MemoryStore`] — where serialized responses live.
//!
//! ## Flow
//!
//! ```text
//! call(req)
//!   ├─ table says "don't cache" ──────────────► inner.call(req)
//!   └─ table says "cache for ttl"
//!        ├─ hit  ─────────────────────────────► stored response
//!        └─ miss ─► inner.call(req) ─► Ok  ─► store, return
//!                                    └► Err ─► return error (never stored)
//! ```
//!
//! There is no request coalescing: concurrent misses for one key all
//! delegate, and the last response stored wins.

use std::time::Duration;

use tracing::debug;

mod adapter;
mod store;
mod table;

pub use adapter::ResponseCache;
pub use store::{MemoryStore, TtlStore};
pub use table::{CacheDecision, CacheRule, CacheTable, TableError};

use crate::caller::{BaseClient, BoxFuture, CallError, Caller};
use crate::config::CacheConfig;
use crate::http::{Request, Response};
use crate::instrumented::Instrumented;
use crate::metrics::Metrics;

/// A [`Caller`] that serves allow-listed requests from a TTL cache.
///
/// # Examples
///
/// ```rust,no_run
/// use std::time::Duration;
/// use cachet::cache::{CacheRule, CacheTable, Cacher};
/// use cachet::caller::BaseClient;
///
/// let cacher = Cacher::new(
///     BaseClient::new(),
///     CacheTable::new([CacheRule::regex("/foo/.+").ttl(Duration::from_secs(5))]),
///     Duration::from_secs(60),
///     Duration::from_secs(3600),
/// );
/// ```
pub struct Cacher<C, S = MemoryStore> {
    inner: C,
    table: CacheTable,
    cache: ResponseCache<S>,
    default_ttl: Duration,
}

impl<C> Cacher<C, MemoryStore> {
    /// Wraps `inner` with an in-memory cache.
    ///
    /// `default_ttl` applies whenever the table yields no TTL of its own
    /// (an empty table, or a rule without one); `cleanup_interval` is how
    /// often expired entries are purged from memory.
    pub fn new(
        inner: C,
        table: CacheTable,
        default_ttl: Duration,
        cleanup_interval: Duration,
    ) -> Self {
        Self::with_store(
            inner,
            table,
            ResponseCache::in_memory(cleanup_interval),
            default_ttl,
        )
    }

    /// Builds a caching stage from deserialized configuration.
    pub fn from_config(inner: C, config: &CacheConfig) -> Self {
        Self::new(
            inner,
            config.table(),
            config.default_ttl(),
            config.cleanup_interval(),
        )
    }
}

impl Cacher<Instrumented<BaseClient>, MemoryStore> {
    /// The usual chain: cache, then metrics, then the network.
    pub fn instrumented(
        application: impl Into<String>,
        metrics: Option<Metrics>,
        table: CacheTable,
        default_ttl: Duration,
        cleanup_interval: Duration,
    ) -> Self {
        Self::new(
            Instrumented::new(BaseClient::new(), application, metrics),
            table,
            default_ttl,
            cleanup_interval,
        )
    }
}

impl<C, S> Cacher<C, S> {
    /// Wraps `inner` with a caller-supplied cache.
    pub fn with_store(
        inner: C,
        table: CacheTable,
        cache: ResponseCache<S>,
        default_ttl: Duration,
    ) -> Self {
        Self {
            inner,
            table,
            cache,
            default_ttl,
        }
    }

    pub fn table(&self) -> &CacheTable {
        &self.table
    }

    pub fn cache(&self) -> &ResponseCache<S> {
        &self.cache
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }
}

impl<C, S> Caller for Cacher<C, S>
where
    C: Caller,
    S: TtlStore,
{
    fn call(&self, req: Request) -> BoxFuture<'_, Result<Response, CallError>> {
        Box::pin(async move {
            let decision = self.table.decide(&req);
            if !decision.cacheable {
                debug!(method = %req.method(), path = %req.path(), "not cacheable");
                return self.inner.call(req).await;
            }

            let key = ResponseCache::<S>::key_for(&req);
            if let Some(response) = self.cache.get(&key) {
                debug!(%key, "cache hit");
                return Ok(response);
            }
            debug!(%key, "cache miss");

            let response = self.inner.call(req).await?;

            let ttl = if decision.ttl.is_zero() {
                self.default_ttl
            } else {
                decision.ttl
            };
            if self.cache.put(&key, &response, ttl) {
                debug!(%key, ?ttl, "response cached");
            }
            Ok(response)
        })
    }
}
