//! Pipeline configuration loaded from JSON.
//!
//! ```json
//! {
//!   "application": "checkout",
//!   "default_ttl_secs": 300,
//!   "cleanup_interval_secs": 600,
//!   "rules": [
//!     { "endpoint": "/prices/special", "ttl_secs": 5 },
//!     { "endpoint": "/prices/.+", "regex": true, "methods": ["GET"], "ttl_secs": 60 }
//!   ]
//! }
//! ```
//!
//! Every field is optional except a rule's `endpoint`. Rule order is kept
//! as written, so earlier rules take precedence.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::{CacheRule, CacheTable};
use crate::http::Method;

const DEFAULT_TTL_SECS: u64 = 300;
const DEFAULT_CLEANUP_SECS: u64 = 600;

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Json(#[from] serde_json::Error),
}

/// One rule as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleConfig {
    pub endpoint: String,
    #[serde(default)]
    pub regex: bool,
    #[serde(default)]
    pub methods: Vec<String>,
    #[serde(default)]
    pub ttl_secs: u64,
}

impl RuleConfig {
    pub fn to_rule(&self) -> CacheRule {
        let rule = if self.regex {
            CacheRule::regex(self.endpoint.as_str())
        } else {
            CacheRule::literal(self.endpoint.as_str())
        };
        rule.methods(self.methods.iter().map(|m| {
            m.parse::<Method>()
                .unwrap_or_else(|never| match never {})
        }))
        .ttl(Duration::from_secs(self.ttl_secs))
    }
}

/// Settings for a caching pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Value of the `application` metric label.
    pub application: String,
    pub default_ttl_secs: u64,
    pub cleanup_interval_secs: u64,
    /// Empty means every response is cached for the default TTL.
    pub rules: Vec<RuleConfig>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            application: String::new(),
            default_ttl_secs: DEFAULT_TTL_SECS,
            cleanup_interval_secs: DEFAULT_CLEANUP_SECS,
            rules: Vec::new(),
        }
    }
}

impl CacheConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// Builds the rule table, preserving rule order. Patterns are not
    /// compiled here; see [`CacheTable::validate`].
    pub fn table(&self) -> CacheTable {
        CacheTable::new(self.rules.iter().map(RuleConfig::to_rule))
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Request;

    #[test]
    fn defaults_for_empty_object() {
        let config = CacheConfig::from_json("{}").unwrap();
        assert_eq!(config, CacheConfig::default());
        assert_eq!(config.default_ttl(), Duration::from_secs(300));
        assert_eq!(config.cleanup_interval(), Duration::from_secs(600));
        assert!(config.table().is_empty());
    }

    #[test]
    fn rules_keep_their_order_and_fields() {
        let config = CacheConfig::from_json(
            r#"{
                "application": "shop",
                "default_ttl_secs": 30,
                "rules": [
                    { "endpoint": "/prices/special", "ttl_secs": 5 },
                    { "endpoint": "/prices/.+", "regex": true, "methods": ["get"], "ttl_secs": 60 }
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(config.application, "shop");
        assert_eq!(config.cleanup_interval_secs, DEFAULT_CLEANUP_SECS);

        let table = config.table();
        assert_eq!(table.rules().len(), 2);
        assert!(!table.rules()[0].is_regex());
        assert_eq!(table.rules()[1].allowed_methods(), &[Method::Get]);

        let special = table.decide(&Request::get("/prices/special").unwrap());
        assert_eq!(special.ttl, Duration::from_secs(5));
        let other = table.decide(&Request::get("/prices/42").unwrap());
        assert_eq!(other.ttl, Duration::from_secs(60));
        let post = table.decide(&Request::post("/prices/42").unwrap());
        assert!(!post.cacheable);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(matches!(
            CacheConfig::from_json(r#"{ "ttl": 5 }"#),
            Err(ConfigError::Json(_))
        ));
        assert!(CacheConfig::from_json(r#"{ "rules": [ { "regex": true } ] }"#).is_err());
    }

    #[test]
    fn missing_file() {
        let err = CacheConfig::from_file("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
