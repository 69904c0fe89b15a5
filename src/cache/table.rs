//! Cache policy table — decides per request whether and how long to cache.
//!
//! Rules are evaluated in declared order and the first rule whose endpoint
//! and method both match wins, so specific overrides go before general
//! fallbacks:
//!
//! | Rule endpoint      | Kind    | Matches                  | Rejects             |
//! |--------------------|---------|--------------------------|---------------------|
//! | `/foo`             | literal | `/foo`                   | `/foo/1`, `/fo`     |
//! | `/foo/[0-9]+`      | regex   | `/foo/123`               | `/foo/abc`          |
//! | `/bar/.*` + `GET`  | regex   | `GET /bar/x`             | `POST /bar/x`       |
//!
//! Regex rules must match the whole path, not a substring of it.
//!
//! A table with no rules caches everything and leaves the TTL to the caching
//! stage's default.

use std::sync::OnceLock;
#[cfg(test)]
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use regex::Regex;
use thiserror::Error;

use crate::http::{Method, Request};

/// A rule whose pattern does not compile.
#[derive(Debug, Error, Clone)]
#[error("invalid cache rule pattern `{endpoint}`: {source}")]
pub struct TableError {
    pub endpoint: String,
    #[source]
    pub source: regex::Error,
}

/// One entry of a [`CacheTable`].
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use cachet::cache::CacheRule;
/// use cachet::http::Method;
///
/// let rule = CacheRule::regex("/users/[0-9]+")
///     .methods([Method::Get, Method::Head])
///     .ttl(Duration::from_secs(30));
/// assert!(rule.is_regex());
/// assert_eq!(rule.allowed_methods().len(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRule {
    endpoint: String,
    is_regex: bool,
    methods: Vec<Method>,
    ttl: Duration,
}

impl CacheRule {
    /// A rule matching one path exactly.
    pub fn literal(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            is_regex: false,
            methods: Vec::new(),
            ttl: Duration::ZERO,
        }
    }

    /// A rule matching every path the regular expression matches in full.
    /// The pattern is compiled the first time the owning table is consulted.
    pub fn regex(pattern: impl Into<String>) -> Self {
        Self {
            is_regex: true,
            ..Self::literal(pattern)
        }
    }

    /// Restricts the rule to `methods`. An empty set matches any method.
    #[must_use]
    pub fn methods(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        self.methods = methods.into_iter().collect();
        self
    }

    /// How long a matching response stays cached. Zero defers to the caching
    /// stage's default TTL.
    #[must_use]
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn is_regex(&self) -> bool {
        self.is_regex
    }

    pub fn allowed_methods(&self) -> &[Method] {
        &self.methods
    }

    pub fn expiry(&self) -> Duration {
        self.ttl
    }

    fn compile(&self) -> Result<Option<Regex>, TableError> {
        if !self.is_regex {
            return Ok(None);
        }
        Regex::new(&format!("^(?:{})$", self.endpoint))
            .map(Some)
            .map_err(|source| TableError {
                endpoint: self.endpoint.clone(),
                source,
            })
    }

    fn matches(&self, compiled: Option<&Regex>, method: &Method, path: &str) -> bool {
        let endpoint_matches = match compiled {
            Some(pattern) => pattern.is_match(path),
            None => self.endpoint == path,
        };
        endpoint_matches && (self.methods.is_empty() || self.methods.contains(method))
    }
}

/// The outcome of consulting a [`CacheTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheDecision {
    pub cacheable: bool,
    /// TTL of the matching rule. Zero when nothing matched, when the table is
    /// empty, or when the rule itself carries no TTL.
    pub ttl: Duration,
}

impl CacheDecision {
    const SKIP: Self = Self {
        cacheable: false,
        ttl: Duration::ZERO,
    };

    const CACHE_ALL: Self = Self {
        cacheable: true,
        ttl: Duration::ZERO,
    };
}

// One slot per rule; `None` for literal rules.
type Compiled = Vec<Option<Regex>>;

/// An ordered list of [`CacheRule`]s.
///
/// Regex rules are compiled exactly once, on the first call to
/// [`decide`](Self::decide) (or [`validate`](Self::validate)), no matter how
/// many threads race to make it. Callers arriving during compilation wait
/// for it; afterwards reads take no lock.
///
/// # Panics
///
/// [`decide`](Self::decide) panics if any regex rule fails to compile: a
/// malformed table is a deployment error, not a runtime condition. Call
/// [`validate`](Self::validate) at startup to turn that into a `Result`.
#[derive(Debug, Default)]
pub struct CacheTable {
    rules: Vec<CacheRule>,
    compiled: OnceLock<Result<Compiled, TableError>>,
    #[cfg(test)]
    compilations: AtomicUsize,
}

impl CacheTable {
    pub fn new(rules: impl IntoIterator<Item = CacheRule>) -> Self {
        Self {
            rules: rules.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn rules(&self) -> &[CacheRule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// `true` once the one-time compilation has run.
    pub fn is_compiled(&self) -> bool {
        self.compiled.get().is_some()
    }

    /// Compiles the table if needed and reports a malformed pattern.
    ///
    /// # Errors
    ///
    /// The [`TableError`] for the first rule whose pattern does not compile.
    pub fn validate(&self) -> Result<(), TableError> {
        self.compiled().as_ref().map(|_| ()).map_err(|e| e.clone())
    }

    /// Decides whether the response to `req` may be cached, and for how long.
    ///
    /// # Panics
    ///
    /// If a regex rule does not compile. See [`validate`](Self::validate).
    pub fn decide(&self, req: &Request) -> CacheDecision {
        if self.rules.is_empty() {
            return CacheDecision::CACHE_ALL;
        }

        let compiled = match self.compiled() {
            Ok(compiled) => compiled,
            Err(e) => {
                tracing::error!(endpoint = %e.endpoint, error = %e.source, "cache table is invalid");
                panic!("{e}");
            }
        };

        self.rules
            .iter()
            .zip(compiled)
            .find(|(rule, pattern)| rule.matches(Option::as_ref(pattern), req.method(), req.path()))
            .map_or(CacheDecision::SKIP, |(rule, _)| CacheDecision {
                cacheable: true,
                ttl: rule.ttl,
            })
    }

    fn compiled(&self) -> &Result<Compiled, TableError> {
        self.compiled.get_or_init(|| {
            #[cfg(test)]
            self.compilations.fetch_add(1, Ordering::SeqCst);

            let compiled: Result<Compiled, TableError> =
                self.rules.iter().map(CacheRule::compile).collect();
            tracing::debug!(rules = self.rules.len(), ok = compiled.is_ok(), "cache table compiled");
            compiled
        })
    }
}

impl From<Vec<CacheRule>> for CacheTable {
    fn from(rules: Vec<CacheRule>) -> Self {
        Self::new(rules)
    }
}
