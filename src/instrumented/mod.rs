//! Metrics stage — records latency and error counts around a wrapped caller.

use tokio::time::Instant;

use crate::caller::{BoxFuture, CallError, Caller};
use crate::http::{Request, Response};
use crate::metrics::{Labels, Metrics};

/// A [`Caller`] that measures every call it delegates.
///
/// For each request the stage starts a latency timer labelled with the
/// application name, the request path and the method, delegates to the
/// wrapped caller, then records the duration and whether the call failed.
/// Only transport errors count as failures; an error status code is a
/// successful call.
///
/// The stage is a pure observer: the wrapped caller's result is returned
/// untouched. Without [`Metrics`] it only logs.
///
/// # Examples
///
/// ```rust,no_run
/// use cachet::caller::BaseClient;
/// use cachet::instrumented::Instrumented;
/// use cachet::metrics::{Metrics, Registry};
///
/// let registry = Registry::new();
/// let metrics = Metrics::new("shop", "", Some(&registry)).unwrap();
/// let client = Instrumented::new(BaseClient::new(), "checkout", Some(metrics));
/// ```
pub struct Instrumented<C> {
    inner: C,
    application: String,
    metrics: Option<Metrics>,
}

impl<C> Instrumented<C> {
    pub fn new(inner: C, application: impl Into<String>, metrics: Option<Metrics>) -> Self {
        Self {
            inner,
            application: application.into(),
            metrics,
        }
    }

    pub fn application(&self) -> &str {
        &self.application
    }

    pub fn metrics(&self) -> Option<&Metrics> {
        self.metrics.as_ref()
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }
}

impl<C: Caller> Caller for Instrumented<C> {
    fn call(&self, req: Request) -> BoxFuture<'_, Result<Response, CallError>> {
        Box::pin(async move {
            let labels = Labels::new(
                self.application.as_str(),
                req.path(),
                req.method().as_str(),
            );
            let start = Instant::now();
            let timer = self.metrics.as_ref().map(|m| m.start_timer(labels.clone()));

            let result = self.inner.call(req).await;

            if let Some(timer) = timer {
                timer.observe_duration();
            }
            if let Some(metrics) = &self.metrics {
                metrics.report_error(result.is_err(), &labels);
            }

            match &result {
                Ok(response) => tracing::debug!(
                    application = %labels.application,
                    method = %labels.method,
                    endpoint = %labels.endpoint,
                    status = response.status().as_u16(),
                    elapsed = ?start.elapsed(),
                    "call completed"
                ),
                Err(e) => tracing::debug!(
                    application = %labels.application,
                    method = %labels.method,
                    endpoint = %labels.endpoint,
                    error = %e,
                    elapsed = ?start.elapsed(),
                    "call failed"
                ),
            }

            result
        })
    }
}
