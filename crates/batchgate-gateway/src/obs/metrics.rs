//! Minimal metrics registry for the gateway.
//!
//! Counter/gauge/histogram types with dynamic labels backed by `DashMap`.
//! Labels are flattened into sorted key vectors to keep deterministic ordering.
//! Histogram buckets are integer bounds (microseconds for durations, element
//! counts for batch sizes) to avoid floating point math on the hot path.

use dashmap::DashMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

type LabelKey = Vec<(String, String)>;

fn label_key(labels: &[(&str, &str)]) -> LabelKey {
    let mut key: LabelKey = labels
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    key.sort();
    key
}

/// Helper to escape label values.
fn escape_label(v: &str) -> String {
    v.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
}

fn has_label(key: &LabelKey, name: &str, value: &str) -> bool {
    key.iter().any(|(k, v)| k == name && v == value)
}

fn label_str(key: &LabelKey) -> String {
    key.iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, escape_label(v)))
        .collect::<Vec<_>>()
        .join(",")
}

#[derive(Default)]
pub struct CounterVec {
    map: DashMap<LabelKey, AtomicU64>,
}

impl CounterVec {
    pub fn inc(&self, labels: &[(&str, &str)]) {
        self.add(labels, 1);
    }

    pub fn add(&self, labels: &[(&str, &str)], v: u64) {
        let counter = self
            .map
            .entry(label_key(labels))
            .or_insert_with(|| AtomicU64::new(0));
        counter.fetch_add(v, Ordering::Relaxed);
    }

    /// Drop every series carrying `key="value"`.
    pub fn remove_matching(&self, key: &str, value: &str) {
        self.map.retain(|k, _| !has_label(k, key, value));
    }

    /// Current value for an exact label set (0 if never touched).
    pub fn get(&self, labels: &[(&str, &str)]) -> u64 {
        self.map
            .get(&label_key(labels))
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    fn render(&self, name: &str, out: &mut String) {
        let _ = writeln!(out, "# TYPE {} counter", name);
        for r in self.map.iter() {
            let val = r.value().load(Ordering::Relaxed);
            let _ = writeln!(out, "{}{{{}}} {}", name, label_str(r.key()), val);
        }
    }
}

#[derive(Default)]
pub struct GaugeVec {
    map: DashMap<LabelKey, AtomicI64>,
}

impl GaugeVec {
    pub fn set(&self, labels: &[(&str, &str)], v: i64) {
        let gauge = self
            .map
            .entry(label_key(labels))
            .or_insert_with(|| AtomicI64::new(0));
        gauge.store(v, Ordering::Relaxed);
    }

    pub fn remove_matching(&self, key: &str, value: &str) {
        self.map.retain(|k, _| !has_label(k, key, value));
    }

    pub fn get(&self, labels: &[(&str, &str)]) -> Option<i64> {
        self.map
            .get(&label_key(labels))
            .map(|g| g.load(Ordering::Relaxed))
    }

    fn render(&self, name: &str, out: &mut String) {
        let _ = writeln!(out, "# TYPE {} gauge", name);
        for r in self.map.iter() {
            let val = r.value().load(Ordering::Relaxed);
            let _ = writeln!(out, "{}{{{}}} {}", name, label_str(r.key()), val);
        }
    }
}

// 100us, 500us, 1ms, 5ms, 10ms, 50ms, 100ms, 500ms, 1s
pub const DURATION_BUCKETS_MICROS: &[u64] = &[
    100, 500, 1_000, 5_000, 10_000, 50_000, 100_000, 500_000, 1_000_000,
];

pub const BATCH_SIZE_BUCKETS: &[u64] = &[1, 2, 4, 8, 16, 32, 64, 128];

struct AtomicHistogram {
    count: AtomicU64,
    sum: AtomicU64,
    buckets: Vec<AtomicU64>,
}

impl AtomicHistogram {
    fn new(n: usize) -> Self {
        Self {
            count: AtomicU64::new(0),
            sum: AtomicU64::new(0),
            buckets: (0..n).map(|_| AtomicU64::new(0)).collect(),
        }
    }
}

pub struct HistogramVec {
    bounds: &'static [u64],
    map: DashMap<LabelKey, AtomicHistogram>,
}

impl Default for HistogramVec {
    fn default() -> Self {
        Self::with_buckets(DURATION_BUCKETS_MICROS)
    }
}

impl HistogramVec {
    pub fn with_buckets(bounds: &'static [u64]) -> Self {
        Self {
            bounds,
            map: DashMap::new(),
        }
    }

    /// Observe a duration (microsecond scale).
    pub fn observe(&self, labels: &[(&str, &str)], duration: Duration) {
        self.observe_value(labels, duration.as_micros() as u64);
    }

    /// Observe a raw integer sample and increment cumulative buckets.
    pub fn observe_value(&self, labels: &[(&str, &str)], v: u64) {
        let hist = self
            .map
            .entry(label_key(labels))
            .or_insert_with(|| AtomicHistogram::new(self.bounds.len()));

        hist.count.fetch_add(1, Ordering::Relaxed);
        hist.sum.fetch_add(v, Ordering::Relaxed);
        for (i, &b) in self.bounds.iter().enumerate() {
            if v <= b {
                hist.buckets[i].fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn remove_matching(&self, key: &str, value: &str) {
        self.map.retain(|k, _| !has_label(k, key, value));
    }

    pub fn count(&self, labels: &[(&str, &str)]) -> u64 {
        self.map
            .get(&label_key(labels))
            .map(|h| h.count.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    fn render(&self, name: &str, out: &mut String) {
        let _ = writeln!(out, "# TYPE {} histogram", name);
        for r in self.map.iter() {
            let hist = r.value();
            let labels = label_str(r.key());
            let prefix = if labels.is_empty() {
                String::new()
            } else {
                format!("{},", labels)
            };

            for (i, &le) in self.bounds.iter().enumerate() {
                let count = hist.buckets[i].load(Ordering::Relaxed);
                let _ = writeln!(out, "{}_bucket{{{}le=\"{}\"}} {}", name, prefix, le, count);
            }
            let count = hist.count.load(Ordering::Relaxed);
            let _ = writeln!(out, "{}_bucket{{{}le=\"+Inf\"}} {}", name, prefix, count);
            let sum = hist.sum.load(Ordering::Relaxed);
            let _ = writeln!(out, "{}_sum{{{}}} {}", name, labels, sum);
            let _ = writeln!(out, "{}_count{{{}}} {}", name, labels, count);
        }
    }
}

/// Process-wide metrics for the admission and batching pipeline.
///
/// Every series is labelled with `target` (agent id or provider id).
pub struct PipelineMetrics {
    /// `{target, outcome}`; outcome is `admitted` or a client code.
    pub admission_decisions: CounterVec,
    pub batches: CounterVec,
    pub batch_failures: CounterVec,
    pub request_timeouts: CounterVec,
    pub batch_size: HistogramVec,
    /// Time from enqueue to dispatch, microseconds.
    pub queue_wait: HistogramVec,
    /// Time spent inside the forward function, microseconds.
    pub forward_duration: HistogramVec,
    /// Refreshed at scrape time from the target registry.
    pub queue_depth: GaugeVec,
    draining: AtomicBool,
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self {
            admission_decisions: CounterVec::default(),
            batches: CounterVec::default(),
            batch_failures: CounterVec::default(),
            request_timeouts: CounterVec::default(),
            batch_size: HistogramVec::with_buckets(BATCH_SIZE_BUCKETS),
            queue_wait: HistogramVec::default(),
            forward_duration: HistogramVec::default(),
            queue_depth: GaugeVec::default(),
            draining: AtomicBool::new(false),
        }
    }
}

impl PipelineMetrics {
    pub fn set_draining(&self) {
        self.draining.store(true, Ordering::Relaxed);
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Relaxed)
    }

    /// Forget every series of a removed target.
    pub fn remove_target(&self, target: &str) {
        for c in [
            &self.admission_decisions,
            &self.batches,
            &self.batch_failures,
            &self.request_timeouts,
        ] {
            c.remove_matching("target", target);
        }
        for h in [&self.batch_size, &self.queue_wait, &self.forward_duration] {
            h.remove_matching("target", target);
        }
        self.queue_depth.remove_matching("target", target);
    }

    /// Render all registered metrics plus any extra lines provided by callers.
    pub fn render(&self, extra: &[(&str, u64)]) -> String {
        let mut out = String::new();
        self.admission_decisions
            .render("batchgate_admission_decisions_total", &mut out);
        self.batches.render("batchgate_batches_total", &mut out);
        self.batch_failures
            .render("batchgate_batch_failures_total", &mut out);
        self.request_timeouts
            .render("batchgate_request_timeouts_total", &mut out);
        self.batch_size.render("batchgate_batch_size", &mut out);
        self.queue_wait
            .render("batchgate_queue_wait_micros", &mut out);
        self.forward_duration
            .render("batchgate_forward_duration_micros", &mut out);
        self.queue_depth.render("batchgate_queue_depth", &mut out);

        let _ = writeln!(
            out,
            "# TYPE batchgate_draining gauge\nbatchgate_draining {}",
            if self.is_draining() { 1 } else { 0 }
        );
        for (k, v) in extra {
            let _ = writeln!(out, "{} {}", k, v);
        }
        out
    }
}
