//! # cachet
//!
//! A composable HTTP client call pipeline. Every stage implements the same
//! [`Caller`] trait and wraps the next one, so metrics and response caching
//! stack up without touching call sites.
//!
//! ```text
//! Cacher ──► Instrumented ──► BaseClient ──► network
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use cachet::{CacheRule, CacheTable, Cacher, Caller, Request};
//! use cachet::metrics::{Metrics, Registry};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = Registry::new();
//!     let metrics = Metrics::new("shop", "upstream", Some(&registry))?;
//!
//!     let table = CacheTable::new([
//!         CacheRule::regex("/prices/.+").ttl(Duration::from_secs(5)),
//!     ]);
//!     table.validate()?;
//!
//!     let client = Cacher::instrumented(
//!         "checkout",
//!         Some(metrics),
//!         table,
//!         Duration::from_secs(60),
//!         Duration::from_secs(3600),
//!     );
//!
//!     let response = client.call(Request::get("http://127.0.0.1:8080/prices/42")?).await?;
//!     println!("{}", response.text());
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod caller;
pub mod config;
pub mod http;
pub mod instrumented;
pub mod metrics;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use cache::{CacheRule, CacheTable, Cacher};
pub use caller::{BaseClient, CallError, Caller};
pub use config::CacheConfig;
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use instrumented::Instrumented;
