//! Client-side API call metrics.
//!
//! [`Metrics`] bundles the two series recorded around every delegated call:
//!
//! - `<namespace>_<subsystem>_api_latency` — summary of call durations in seconds.
//! - `<namespace>_<subsystem>_api_errors_total` — count of failed calls.
//!
//! Both are labelled with `application`, `endpoint` and `method`, and both are
//! registered with the [`Registry`] handed to [`Metrics::new`].

use std::sync::Arc;

use tokio::time::Instant;

mod registry;

pub use registry::{
    Collector, CounterVec, Labels, MetricFamily, MetricKind, MetricsError, Registry, Sample,
    SummaryVec, build_fq_name,
};

/// Latency and error series for outgoing API calls. Cheap to clone.
///
/// # Examples
///
/// ```
/// use cachet::metrics::{Labels, Metrics, Registry};
///
/// let registry = Registry::new();
/// let metrics = Metrics::new("shop", "upstream", Some(&registry)).unwrap();
///
/// let labels = Labels::new("checkout", "/prices", "GET");
/// let timer = metrics.start_timer(labels.clone());
/// timer.observe_duration();
/// metrics.report_error(false, &labels);
///
/// assert!(registry.render().contains("shop_upstream_api_latency_count"));
/// ```
#[derive(Debug, Clone)]
pub struct Metrics {
    latency: Arc<SummaryVec>,
    errors: Arc<CounterVec>,
}

impl Metrics {
    /// Creates the metric pair and registers it with `registry`, or with
    /// [`Registry::global`] when `registry` is `None`.
    ///
    /// # Errors
    ///
    /// [`MetricsError::AlreadyRegistered`] when the names are already taken
    /// in the target registry.
    pub fn new(
        namespace: &str,
        subsystem: &str,
        registry: Option<&Registry>,
    ) -> Result<Self, MetricsError> {
        let metrics = Self {
            latency: Arc::new(SummaryVec::new(
                build_fq_name(namespace, subsystem, "api_latency"),
                "Latency of API calls",
            )),
            errors: Arc::new(CounterVec::new(
                build_fq_name(namespace, subsystem, "api_errors_total"),
                "Number of failed API calls",
            )),
        };

        let registry = registry.unwrap_or_else(|| Registry::global());
        registry.register(metrics.latency.clone())?;
        registry.register(metrics.errors.clone())?;
        Ok(metrics)
    }

    /// Starts timing one call. The duration is recorded when the returned
    /// timer is consumed with [`LatencyTimer::observe_duration`].
    pub fn start_timer(&self, labels: Labels) -> LatencyTimer {
        LatencyTimer {
            latency: Arc::clone(&self.latency),
            labels,
            start: Instant::now(),
        }
    }

    /// Counts a call outcome: adds `1` when `failed`, otherwise `0` so the
    /// series exists even before the first failure.
    pub fn report_error(&self, failed: bool, labels: &Labels) {
        self.errors.add(labels, if failed { 1.0 } else { 0.0 });
    }

    pub fn latency(&self) -> &SummaryVec {
        &self.latency
    }

    pub fn errors(&self) -> &CounterVec {
        &self.errors
    }
}

/// An in-flight latency measurement.
#[must_use = "a timer records nothing until `observe_duration` is called"]
pub struct LatencyTimer {
    latency: Arc<SummaryVec>,
    labels: Labels,
    start: Instant,
}

impl LatencyTimer {
    /// Records the time elapsed since the timer was started.
    pub fn observe_duration(self) {
        let elapsed = self.start.elapsed();
        self.latency.observe(&self.labels, elapsed.as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn timer_records_elapsed_time() {
        let registry = Registry::new();
        let metrics = Metrics::new("foo", "", Some(&registry)).unwrap();
        let labels = Labels::new("foo", "/bar", "GET");

        let timer = metrics.start_timer(labels.clone());
        tokio::time::advance(Duration::from_millis(10)).await;
        timer.observe_duration();

        let (count, sum) = metrics.latency().get(&labels).unwrap();
        assert_eq!(count, 1);
        assert!(sum >= 0.01);

        let families = registry.gather();
        assert!(families.iter().any(|f| f.name == "foo_api_latency"));
    }

    #[test]
    fn errors_count_failures_only() {
        let registry = Registry::new();
        let metrics = Metrics::new("bar", "", Some(&registry)).unwrap();
        let labels = Labels::new("foo", "/bar", "GET");

        metrics.report_error(false, &labels);
        assert_eq!(metrics.errors().get(&labels), Some(0.0));

        metrics.report_error(true, &labels);
        assert_eq!(metrics.errors().get(&labels), Some(1.0));
    }

    #[test]
    fn same_names_twice_in_one_registry() {
        let registry = Registry::new();
        Metrics::new("dup", "", Some(&registry)).unwrap();
        assert!(matches!(
            Metrics::new("dup", "", Some(&registry)),
            Err(MetricsError::AlreadyRegistered(_))
        ));
    }

    #[test]
    fn falls_back_to_global_registry() {
        Metrics::new("cachet_global_fallback", "test", None).unwrap();
        assert!(
            Registry::global()
                .gather()
                .iter()
                .any(|f| f.name == "cachet_global_fallback_test_api_errors_total")
        );
    }
}
