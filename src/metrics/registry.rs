//! Metric collection primitives and the registry that exports them.

use std::fmt::Write as _;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;

/// Errors raised while registering collectors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MetricsError {
    #[error("a collector named `{0}` is already registered")]
    AlreadyRegistered(String),

    #[error("metric name must not be empty")]
    EmptyName,
}

/// The label triple every client metric carries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Labels {
    pub application: String,
    pub endpoint: String,
    pub method: String,
}

impl Labels {
    pub fn new(
        application: impl Into<String>,
        endpoint: impl Into<String>,
        method: impl Into<String>,
    ) -> Self {
        Self {
            application: application.into(),
            endpoint: endpoint.into(),
            method: method.into(),
        }
    }

    fn render(&self) -> String {
        format!(
            "application=\"{}\",endpoint=\"{}\",method=\"{}\"",
            escape(&self.application),
            escape(&self.endpoint),
            escape(&self.method)
        )
    }
}

fn escape(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

/// Joins the non-empty parts with `_`, e.g. `("app", "", "api_latency")` →
/// `"app_api_latency"`. An empty `name` yields an empty string.
pub fn build_fq_name(namespace: &str, subsystem: &str, name: &str) -> String {
    if name.is_empty() {
        return String::new();
    }
    [namespace, subsystem, name]
        .iter()
        .filter(|part| !part.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("_")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Counter,
    Summary,
}

/// One labelled series inside a [`MetricFamily`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sample {
    pub labels: Labels,
    /// Counter value, or the sum of observations for a summary.
    pub value: f64,
    /// Number of observations; always `0` for counters.
    pub count: u64,
}

/// A snapshot of one collector.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricFamily {
    pub name: String,
    pub help: String,
    pub kind: MetricKind,
    pub samples: Vec<Sample>,
}

/// Anything a [`Registry`] can gather.
pub trait Collector: Send + Sync {
    /// Fully-qualified metric name; unique within a registry.
    fn name(&self) -> &str;

    fn collect(&self) -> MetricFamily;
}

/// A monotonically increasing counter partitioned by [`Labels`].
#[derive(Debug)]
pub struct CounterVec {
    name: String,
    help: String,
    series: DashMap<Labels, f64>,
}

impl CounterVec {
    pub fn new(name: impl Into<String>, help: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            help: help.into(),
            series: DashMap::new(),
        }
    }

    /// Adds `value` to the series for `labels`, creating it at zero first.
    /// Negative values are ignored.
    pub fn add(&self, labels: &Labels, value: f64) {
        if value < 0.0 {
            return;
        }
        *self.series.entry(labels.clone()).or_insert(0.0) += value;
    }

    pub fn get(&self, labels: &Labels) -> Option<f64> {
        self.series.get(labels).map(|v| *v)
    }
}

impl Collector for CounterVec {
    fn name(&self) -> &str {
        &self.name
    }

    fn collect(&self) -> MetricFamily {
        let mut samples: Vec<_> = self
            .series
            .iter()
            .map(|entry| Sample {
                labels: entry.key().clone(),
                value: *entry.value(),
                count: 0,
            })
            .collect();
        samples.sort_by(|a, b| a.labels.cmp(&b.labels));
        MetricFamily {
            name: self.name.clone(),
            help: self.help.clone(),
            kind: MetricKind::Counter,
            samples,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Observations {
    count: u64,
    sum: f64,
}

/// Count and sum of observations (in seconds), partitioned by [`Labels`].
#[derive(Debug)]
pub struct SummaryVec {
    name: String,
    help: String,
    series: DashMap<Labels, Observations>,
}

impl SummaryVec {
    pub fn new(name: impl Into<String>, help: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            help: help.into(),
            series: DashMap::new(),
        }
    }

    pub fn observe(&self, labels: &Labels, value: f64) {
        let mut entry = self.series.entry(labels.clone()).or_default();
        entry.count += 1;
        entry.sum += value;
    }

    /// `(count, sum)` for `labels`, if anything was observed.
    pub fn get(&self, labels: &Labels) -> Option<(u64, f64)> {
        self.series.get(labels).map(|o| (o.count, o.sum))
    }
}

impl Collector for SummaryVec {
    fn name(&self) -> &str {
        &self.name
    }

    fn collect(&self) -> MetricFamily {
        let mut samples: Vec<_> = self
            .series
            .iter()
            .map(|entry| Sample {
                labels: entry.key().clone(),
                value: entry.value().sum,
                count: entry.value().count,
            })
            .collect();
        samples.sort_by(|a, b| a.labels.cmp(&b.labels));
        MetricFamily {
            name: self.name.clone(),
            help: self.help.clone(),
            kind: MetricKind::Summary,
            samples,
        }
    }
}

/// A set of collectors gathered together for export.
///
/// Pass a registry explicitly wherever metrics are created; tests use their
/// own instance. [`Registry::global`] exists only as the fallback for
/// callers that do not supply one.
#[derive(Default)]
pub struct Registry {
    collectors: Mutex<Vec<Arc<dyn Collector>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide default registry.
    pub fn global() -> &'static Registry {
        static GLOBAL: OnceLock<Registry> = OnceLock::new();
        GLOBAL.get_or_init(Registry::new)
    }

    /// Adds a collector.
    ///
    /// # Errors
    ///
    /// [`MetricsError::AlreadyRegistered`] if a collector with the same name
    /// is present, [`MetricsError::EmptyName`] for an unnamed collector.
    pub fn register(&self, collector: Arc<dyn Collector>) -> Result<(), MetricsError> {
        if collector.name().is_empty() {
            return Err(MetricsError::EmptyName);
        }
        let mut collectors = self
            .collectors
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if collectors.iter().any(|c| c.name() == collector.name()) {
            return Err(MetricsError::AlreadyRegistered(collector.name().to_owned()));
        }
        collectors.push(collector);
        Ok(())
    }

    /// Snapshots every registered collector, sorted by name.
    pub fn gather(&self) -> Vec<MetricFamily> {
        let collectors: Vec<_> = self
            .collectors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let mut families: Vec<_> = collectors.iter().map(|c| c.collect()).collect();
        families.sort_by(|a, b| a.name.cmp(&b.name));
        families
    }

    /// Renders [`gather`](Self::gather) in the Prometheus text exposition format.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for family in self.gather() {
            let kind = match family.kind {
                MetricKind::Counter => "counter",
                MetricKind::Summary => "summary",
            };
            let _ = writeln!(out, "# HELP {} {}", family.name, family.help);
            let _ = writeln!(out, "# TYPE {} {}", family.name, kind);
            for sample in &family.samples {
                let labels = sample.labels.render();
                match family.kind {
                    MetricKind::Counter => {
                        let _ = writeln!(out, "{}{{{}}} {}", family.name, labels, sample.value);
                    }
                    MetricKind::Summary => {
                        let _ =
                            writeln!(out, "{}_sum{{{}}} {}", family.name, labels, sample.value);
                        let _ =
                            writeln!(out, "{}_count{{{}}} {}", family.name, labels, sample.count);
                    }
                }
            }
        }
        out
    }
}
