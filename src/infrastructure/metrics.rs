//! Metrics Registry
//!
//! Process-wide counters, gauges and histograms rendered in the Prometheus
//! text exposition format.
//!
//! Label keys are fixed per metric name at registration time. Every sample
//! must supply exactly that key set, in any order. Series are keyed by their
//! label values ordered by the sorted key list, so rendering is stable.

use crate::domain::value_objects::MetricKind;
use crate::error::MetricsError;
use crate::infrastructure::process_metrics::ProcessCollector;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Content type of `render()` output.
pub const TEXT_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";
pub const HTTP_LABELS: [&str; 3] = ["method", "route", "status"];
pub const HTTP_DURATION_BUCKETS: [f64; 9] = [0.01, 0.025, 0.05, 0.1, 0.2, 0.5, 1.0, 2.0, 5.0];

/// Buckets used when a histogram is registered without explicit bounds.
pub const DEFAULT_BUCKETS: [f64; 11] = [
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Label values ordered by the family's sorted key list.
type SeriesKey = Vec<String>;

#[derive(Debug, Default)]
struct HistogramState {
    /// Cumulative count per bucket bound
    buckets: Vec<u64>,
    count: u64,
    sum: f64,
}

enum Series {
    Counter(AtomicU64),
    /// f64 bits
    Gauge(AtomicU64),
    /// One lock per series keeps count, sum and buckets consistent for readers.
    Histogram(Mutex<HistogramState>),
}

impl Series {
    fn new(kind: MetricKind, bucket_count: usize) -> Self {
        match kind {
            MetricKind::Counter => Series::Counter(AtomicU64::new(0)),
            MetricKind::Gauge => Series::Gauge(AtomicU64::new(0f64.to_bits())),
            MetricKind::Histogram => Series::Histogram(Mutex::new(HistogramState {
                buckets: vec![0; bucket_count],
                count: 0,
                sum: 0.0,
            })),
        }
    }
}

/// Point-in-time copy of one series.
enum Snapshot {
    Counter(u64),
    Gauge(f64),
    Histogram(HistogramState),
}

struct Family {
    help: String,
    kind: MetricKind,
    /// Sorted, unique
    label_keys: Vec<String>,
    buckets: Vec<f64>,
    series: DashMap<SeriesKey, Series>,
}

impl Family {
    /// Validate a label set and turn it into a series key.
    fn series_key(&self, name: &str, labels: &[(&str, &str)]) -> Result<SeriesKey, MetricsError> {
        let mismatch = || MetricsError::LabelMismatch {
            name: name.to_string(),
            expected: self.label_keys.clone(),
        };

        if labels.len() != self.label_keys.len() {
            return Err(mismatch());
        }

        let mut sorted: Vec<&(&str, &str)> = labels.iter().collect();
        sorted.sort_by(|a, b| a.0.cmp(b.0));

        sorted
            .iter()
            .zip(&self.label_keys)
            .map(|((k, v), expected)| {
                if *k == expected.as_str() {
                    Ok(v.to_string())
                } else {
                    Err(mismatch())
                }
            })
            .collect()
    }

    fn require_kind(&self, name: &str, requested: MetricKind) -> Result<(), MetricsError> {
        if self.kind == requested {
            Ok(())
        } else {
            Err(MetricsError::KindMismatch {
                name: name.to_string(),
                actual: self.kind.as_str(),
                requested: requested.as_str(),
            })
        }
    }

    fn with_series<R>(&self, key: SeriesKey, f: impl FnOnce(&Series) -> R) -> R {
        if let Some(series) = self.series.get(&key) {
            return f(series.value());
        }
        let series = self
            .series
            .entry(key)
            .or_insert_with(|| Series::new(self.kind, self.buckets.len()));
        f(series.value())
    }

    fn snapshot(&self) -> Vec<(SeriesKey, Snapshot)> {
        let mut rows: Vec<(SeriesKey, Snapshot)> = self
            .series
            .iter()
            .map(|entry| {
                let snapshot = match entry.value() {
                    Series::Counter(v) => Snapshot::Counter(v.load(Ordering::Relaxed)),
                    Series::Gauge(v) => Snapshot::Gauge(f64::from_bits(v.load(Ordering::Relaxed))),
                    Series::Histogram(h) => {
                        let h = h.lock();
                        Snapshot::Histogram(HistogramState {
                            buckets: h.buckets.clone(),
                            count: h.count,
                            sum: h.sum,
                        })
                    }
                };
                (entry.key().clone(), snapshot)
            })
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        rows
    }
}

fn valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

fn valid_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    name != "le" && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Helper to escape label values.
fn escape_label(v: &str) -> String {
    v.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
}

fn escape_help(v: &str) -> String {
    v.replace('\\', "\\\\").replace('\n', "\\n")
}

/// Format a sample value the way Prometheus clients do.
fn format_value(v: f64) -> String {
    if v.is_nan() {
        "NaN".to_string()
    } else if v == f64::INFINITY {
        "+Inf".to_string()
    } else if v == f64::NEG_INFINITY {
        "-Inf".to_string()
    } else {
        format!("{}", v)
    }
}

fn label_pairs(keys: &[String], values: &[String]) -> Vec<String> {
    keys.iter()
        .zip(values)
        .map(|(k, v)| format!("{}=\"{}\"", k, escape_label(v)))
        .collect()
}

fn braces(pairs: &[String]) -> String {
    if pairs.is_empty() {
        String::new()
    } else {
        format!("{{{}}}", pairs.join(","))
    }
}

/// Metrics registry.
///
/// One instance per process, shared through `Arc` with every component that
/// records. Tests build their own isolated instances.
pub struct MetricsRegistry {
    families: RwLock<BTreeMap<String, Arc<Family>>>,
    process: Option<ProcessCollector>,
}

impl MetricsRegistry {
    /// Empty registry without the process catalog.
    pub fn new() -> Self {
        Self {
            families: RwLock::new(BTreeMap::new()),
            process: None,
        }
    }

    /// Registry with the process catalog and the HTTP request metrics.
    pub fn with_defaults() -> Result<Self, MetricsError> {
        let mut registry = Self::new();
        registry.process = Some(ProcessCollector::register(&registry)?);
        registry.register_http_metrics()?;
        Ok(registry)
    }

    /// Register `http_requests_total` and `http_request_duration_seconds`.
    pub fn register_http_metrics(&self) -> Result<(), MetricsError> {
        self.register(
            HTTP_REQUESTS_TOTAL,
            MetricKind::Counter,
            "Total number of HTTP requests",
            &HTTP_LABELS,
            None,
        )?;
        self.register(
            HTTP_REQUEST_DURATION_SECONDS,
            MetricKind::Histogram,
            "HTTP request duration in seconds",
            &HTTP_LABELS,
            Some(&HTTP_DURATION_BUCKETS),
        )
    }

    /// Register a metric family.
    ///
    /// Histograms take bucket upper bounds (finite, strictly increasing);
    /// `None` selects `DEFAULT_BUCKETS`. Other kinds must pass `None`.
    pub fn register(
        &self,
        name: &str,
        kind: MetricKind,
        help: &str,
        label_keys: &[&str],
        buckets: Option<&[f64]>,
    ) -> Result<(), MetricsError> {
        let invalid = |reason: &str| MetricsError::InvalidDefinition {
            name: name.to_string(),
            reason: reason.to_string(),
        };

        if !valid_metric_name(name) {
            return Err(invalid("metric name must match [a-zA-Z_:][a-zA-Z0-9_:]*"));
        }

        let mut keys: Vec<String> = label_keys.iter().map(|k| k.to_string()).collect();
        if let Some(bad) = keys.iter().find(|k| !valid_label_name(k)) {
            return Err(invalid(&format!("invalid label name {bad:?}")));
        }
        keys.sort();
        let before = keys.len();
        keys.dedup();
        if keys.len() != before {
            return Err(invalid("duplicate label name"));
        }

        let buckets = match (kind, buckets) {
            (MetricKind::Histogram, None) => DEFAULT_BUCKETS.to_vec(),
            (MetricKind::Histogram, Some(bounds)) => {
                if bounds.is_empty() || bounds.iter().any(|b| !b.is_finite()) {
                    return Err(invalid("bucket bounds must be finite and non-empty"));
                }
                if bounds.windows(2).any(|w| w[0] >= w[1]) {
                    return Err(invalid("bucket bounds must be strictly increasing"));
                }
                bounds.to_vec()
            }
            (_, Some(_)) => return Err(invalid("only histograms take buckets")),
            (_, None) => Vec::new(),
        };

        let mut families = self.families.write();
        if families.contains_key(name) {
            return Err(MetricsError::DuplicateMetricName(name.to_string()));
        }

        let family = Family {
            help: help.to_string(),
            kind,
            label_keys: keys,
            buckets,
            series: DashMap::new(),
        };
        // Unlabelled families expose their single series from the start.
        if family.label_keys.is_empty() {
            family
                .series
                .insert(Vec::new(), Series::new(kind, family.buckets.len()));
        }

        families.insert(name.to_string(), Arc::new(family));
        Ok(())
    }

    fn family(&self, name: &str) -> Result<Arc<Family>, MetricsError> {
        self.families
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| MetricsError::UnknownMetric(name.to_string()))
    }

    /// Add `delta` (at least 1) to a counter series.
    pub fn increment(&self, name: &str, labels: &[(&str, &str)], delta: u64) -> Result<(), MetricsError> {
        let family = self.family(name)?;
        family.require_kind(name, MetricKind::Counter)?;
        if delta == 0 {
            return Err(MetricsError::InvalidDelta(name.to_string()));
        }
        let key = family.series_key(name, labels)?;

        family.with_series(key, |series| {
            if let Series::Counter(v) = series {
                v.fetch_add(delta, Ordering::Relaxed);
            }
        });
        Ok(())
    }

    /// Record one histogram observation.
    ///
    /// Every bucket whose bound is >= `value` is incremented, plus the
    /// implicit `+Inf` bucket (the series count) and the running sum.
    pub fn observe(&self, name: &str, labels: &[(&str, &str)], value: f64) -> Result<(), MetricsError> {
        let family = self.family(name)?;
        family.require_kind(name, MetricKind::Histogram)?;
        let key = family.series_key(name, labels)?;

        family.with_series(key, |series| {
            if let Series::Histogram(h) = series {
                let mut h = h.lock();
                for (i, bound) in family.buckets.iter().enumerate() {
                    if value <= *bound {
                        h.buckets[i] += 1;
                    }
                }
                h.count += 1;
                h.sum += value;
            }
        });
        Ok(())
    }

    /// Set a gauge series.
    pub fn set(&self, name: &str, labels: &[(&str, &str)], value: f64) -> Result<(), MetricsError> {
        let family = self.family(name)?;
        family.require_kind(name, MetricKind::Gauge)?;
        let key = family.series_key(name, labels)?;

        family.with_series(key, |series| {
            if let Series::Gauge(v) = series {
                v.store(value.to_bits(), Ordering::Relaxed);
            }
        });
        Ok(())
    }

    /// Current value of a counter series, if it has been touched.
    pub fn counter_value(&self, name: &str, labels: &[(&str, &str)]) -> Option<u64> {
        let family = self.family(name).ok()?;
        let key = family.series_key(name, labels).ok()?;
        let series = family.series.get(&key)?;
        match series.value() {
            Series::Counter(v) => Some(v.load(Ordering::Relaxed)),
            _ => None,
        }
    }

    /// Observation count and sum of a histogram series, if it has been touched.
    pub fn histogram_totals(&self, name: &str, labels: &[(&str, &str)]) -> Option<(u64, f64)> {
        let family = self.family(name).ok()?;
        let key = family.series_key(name, labels).ok()?;
        let series = family.series.get(&key)?;
        match series.value() {
            Series::Histogram(h) => {
                let h = h.lock();
                Some((h.count, h.sum))
            }
            _ => None,
        }
    }

    /// Names of all registered families, sorted.
    pub fn names(&self) -> Vec<String> {
        self.families.read().keys().cloned().collect()
    }

    /// Render every family in the Prometheus text exposition format.
    ///
    /// Families are ordered by name and series by label values. Each series is
    /// read as a unit; different series may come from different instants.
    pub fn render(&self) -> String {
        if let Some(process) = &self.process {
            process.refresh(self);
        }

        let families: Vec<(String, Arc<Family>)> = self
            .families
            .read()
            .iter()
            .map(|(name, family)| (name.clone(), family.clone()))
            .collect();

        let mut out = String::new();
        for (name, family) in families {
            let _ = writeln!(out, "# HELP {} {}", name, escape_help(&family.help));
            let _ = writeln!(out, "# TYPE {} {}", name, family.kind);

            for (values, snapshot) in family.snapshot() {
                let pairs = label_pairs(&family.label_keys, &values);
                match snapshot {
                    Snapshot::Counter(v) => {
                        let _ = writeln!(out, "{}{} {}", name, braces(&pairs), v);
                    }
                    Snapshot::Gauge(v) => {
                        let _ = writeln!(out, "{}{} {}", name, braces(&pairs), format_value(v));
                    }
                    Snapshot::Histogram(h) => {
                        for (bound, count) in family.buckets.iter().zip(&h.buckets) {
                            let mut with_le = pairs.clone();
                            with_le.push(format!("le=\"{}\"", format_value(*bound)));
                            let _ = writeln!(out, "{}_bucket{} {}", name, braces(&with_le), count);
                        }
                        let mut with_inf = pairs.clone();
                        with_inf.push("le=\"+Inf\"".to_string());
                        let _ = writeln!(out, "{}_bucket{} {}", name, braces(&with_inf), h.count);
                        let _ = writeln!(out, "{}_sum{} {}", name, braces(&pairs), format_value(h.sum));
                        let _ = writeln!(out, "{}_count{} {}", name, braces(&pairs), h.count);
                    }
                }
            }
        }
        out
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}
