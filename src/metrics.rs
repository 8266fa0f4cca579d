//! Measurements emitted by resource selection.
//!
//! The engine never owns a metrics registry. It is handed a [`MeasurementSink`] and
//! reports one duration per selection call, annotated with a [`TagSet`].

use std::{
    collections::{BTreeMap, HashMap},
    sync::Mutex,
    time::Duration,
};

use prometheus::{HistogramOpts, HistogramVec, Registry};
use tracing::{debug, warn};

/// Metric identifier used for the selection timer unless configured otherwise.
pub const SELECT_TIMER_NAME: &str = "resource_selector_select_duration_seconds";

pub mod tag_keys {
    pub const STATUS: &str = "status";
    pub const EXCEPTION_CLASS: &str = "exception_class";
    pub const RESOURCE_ID: &str = "resource_id";
    pub const RESOURCE_NAME: &str = "resource_name";
    pub const SELECTOR_TYPE: &str = "selector_type";

    /// Every key a selection measurement can carry.
    pub const ALL: [&str; 5] = [
        STATUS,
        EXCEPTION_CLASS,
        RESOURCE_ID,
        RESOURCE_NAME,
        SELECTOR_TYPE,
    ];
}

pub mod tag_values {
    pub const SUCCESS: &str = "success";
    pub const FAILURE: &str = "failure";
    pub const CANCELLED: &str = "cancelled";
    /// Resource id reported when nothing was selected.
    pub const NULL: &str = "null";
}

/// Key/value pairs describing a single selection call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagSet(BTreeMap<String, String>);

impl TagSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn add_success_tags(&mut self) {
        self.insert(tag_keys::STATUS, tag_values::SUCCESS);
    }

    pub fn add_failure_tags(&mut self, exception_class: &str) {
        self.insert(tag_keys::STATUS, tag_values::FAILURE);
        self.insert(tag_keys::EXCEPTION_CLASS, exception_class);
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for TagSet {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Receives measurement events. Shared by every concurrent selection call.
pub trait MeasurementSink: Send + Sync {
    fn record_duration(&self, metric: &str, tags: &TagSet, elapsed: Duration);
}

/// Latency buckets in seconds.
const LATENCY_BUCKETS: &[f64] = &[
    0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Records selection durations as Prometheus histograms on a registry owned by the caller.
///
/// Histograms are keyed by their Prometheus name. A name that could not be registered
/// stays disabled instead of being retried on every call.
pub struct PrometheusMeasurementSink {
    registry: Registry,
    histograms: Mutex<HashMap<String, Option<HistogramVec>>>,
}

impl PrometheusMeasurementSink {
    pub fn new(registry: Registry) -> Self {
        Self {
            registry,
            histograms: Mutex::new(HashMap::new()),
        }
    }

    fn histogram(&self, metric: &str) -> Option<HistogramVec> {
        let mut histograms = match self.histograms.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let name = sanitize_metric_name(metric);

        if let Some(histogram) = histograms.get(&name) {
            return histogram.clone();
        }

        let histogram = self.register_histogram(&name);
        histograms.insert(name, histogram.clone());

        histogram
    }

    fn register_histogram(&self, name: &str) -> Option<HistogramVec> {
        let opts = HistogramOpts::new(name, "Time spent selecting a resource for a job")
            .buckets(LATENCY_BUCKETS.to_vec());

        let histogram = match HistogramVec::new(opts, &tag_keys::ALL) {
            Ok(histogram) => histogram,
            Err(error) => {
                warn!(?error, %name, "unable to create histogram, measurements are dropped");
                return None;
            }
        };

        if let Err(error) = self.registry.register(Box::new(histogram.clone())) {
            warn!(?error, %name, "unable to register histogram, measurements are dropped");
            return None;
        }

        Some(histogram)
    }
}

impl MeasurementSink for PrometheusMeasurementSink {
    fn record_duration(&self, metric: &str, tags: &TagSet, elapsed: Duration) {
        let Some(histogram) = self.histogram(metric) else {
            return;
        };

        let labels: Vec<&str> = tag_keys::ALL
            .iter()
            .map(|key| tags.get(key).unwrap_or(""))
            .collect();

        match histogram.get_metric_with_label_values(&labels) {
            Ok(observer) => observer.observe(elapsed.as_secs_f64()),
            Err(error) => warn!(?error, %metric, "unable to observe selection duration"),
        }
    }
}

/// Prometheus metric names only allow `[a-zA-Z0-9_:]`.
fn sanitize_metric_name(metric: &str) -> String {
    metric
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == ':' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Emits each measurement as a debug event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMeasurementSink;

impl MeasurementSink for TracingMeasurementSink {
    fn record_duration(&self, metric: &str, tags: &TagSet, elapsed: Duration) {
        debug!(%metric, ?tags, elapsed_ms = elapsed.as_secs_f64() * 1000.0, "selection measured");
    }
}
