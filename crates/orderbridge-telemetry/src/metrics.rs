use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;

/// Metric names recorded by the bridge.
pub mod names {
    pub const EVENTS_RECEIVED: &str = "bridge.events_received";
    pub const EVENTS_MALFORMED: &str = "bridge.events_malformed";
    pub const MESSAGES_MALFORMED: &str = "bridge.messages_malformed";
    pub const NOTIFICATIONS_SENT: &str = "bridge.notifications_sent";
    pub const APPROVALS_PUBLISHED: &str = "bridge.approvals_published";
    pub const APPROVALS_FAILED: &str = "bridge.approvals_failed";
    pub const APPROVALS_DUPLICATE: &str = "bridge.approvals_duplicate";
    pub const STREAM_RECONNECTS: &str = "bridge.stream_reconnects";
    pub const SESSIONS_ACTIVE: &str = "bridge.sessions_active";
    pub const PUBLISH_LATENCY_MS: &str = "bridge.publish_latency_ms";
}

/// Observations kept per histogram; older ones are evicted first.
const HISTOGRAM_WINDOW: usize = 1024;

struct Counter(AtomicU64);

impl Counter {
    fn new() -> Self {
        Self(AtomicU64::new(0))
    }
}

/// f64 stored as raw bits so it can live in an atomic.
struct Gauge(AtomicU64);

impl Gauge {
    fn new() -> Self {
        Self(AtomicU64::new(0f64.to_bits()))
    }

    fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    fn set(&self, v: f64) {
        self.0.store(v.to_bits(), Ordering::Relaxed);
    }
}

#[derive(Default)]
struct HistogramState {
    count: u64,
    sum: f64,
    window: VecDeque<f64>,
}

struct Histogram(Mutex<HistogramState>);

impl Histogram {
    fn new() -> Self {
        Self(Mutex::new(HistogramState {
            window: VecDeque::with_capacity(HISTOGRAM_WINDOW),
            ..HistogramState::default()
        }))
    }

    fn observe(&self, value: f64) {
        let mut state = self.0.lock();
        state.count += 1;
        state.sum += value;
        if state.window.len() == HISTOGRAM_WINDOW {
            state.window.pop_front();
        }
        state.window.push_back(value);
    }

    fn summary(&self) -> HistogramSummary {
        let (count, sum, mut obs) = {
            let state = self.0.lock();
            let obs: Vec<f64> = state.window.iter().copied().collect();
            (state.count, state.sum, obs)
        };
        if obs.is_empty() {
            return HistogramSummary::default();
        }
        obs.sort_by(|a, b| a.total_cmp(b));
        let n = obs.len();
        let at = |q: f64| obs[((n as f64 * q) as usize).min(n - 1)];
        HistogramSummary {
            count,
            sum,
            p50: at(0.50),
            p95: at(0.95),
            p99: at(0.99),
        }
    }
}

/// `count` and `sum` cover every observation; percentiles cover the most
/// recent `HISTOGRAM_WINDOW` of them.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct HistogramSummary {
    pub count: u64,
    pub sum: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

/// Name plus labels, labels sorted so call-site order doesn't matter.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
struct MetricKey {
    name: String,
    labels: Vec<(String, String)>,
}

impl MetricKey {
    fn new(name: &str, labels: &[(&str, &str)]) -> Self {
        let mut labels: Vec<(String, String)> = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        labels.sort();
        Self {
            name: name.to_string(),
            labels,
        }
    }

    /// `name` or `name{k=v,k2=v2}`.
    fn render(&self) -> String {
        if self.labels.is_empty() {
            return self.name.clone();
        }
        let labels: Vec<String> =
            self.labels.iter().map(|(k, v)| format!("{k}={v}")).collect();
        format!("{}{{{}}}", self.name, labels.join(","))
    }
}

/// Point-in-time copy of every metric, keyed by rendered name.
#[derive(Clone, Debug, Default, Serialize)]
pub struct MetricsSnapshot {
    pub counters: BTreeMap<String, u64>,
    pub gauges: BTreeMap<String, f64>,
    pub histograms: BTreeMap<String, HistogramSummary>,
}

/// Thread-safe in-memory metrics recorder.
#[derive(Default)]
pub struct MetricsRecorder {
    counters: RwLock<HashMap<MetricKey, Counter>>,
    gauges: RwLock<HashMap<MetricKey, Gauge>>,
    histograms: RwLock<HashMap<MetricKey, Histogram>>,
}

/// Read-locked fast path, write lock only for a first-seen key.
fn with_entry<T>(
    map: &RwLock<HashMap<MetricKey, T>>,
    key: MetricKey,
    make: fn() -> T,
    f: impl FnOnce(&T),
) {
    if let Some(entry) = map.read().get(&key) {
        f(entry);
        return;
    }
    let mut map = map.write();
    f(map.entry(key).or_insert_with(make));
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counter_inc(&self, name: &str, labels: &[(&str, &str)], n: u64) {
        with_entry(&self.counters, MetricKey::new(name, labels), Counter::new, |c| {
            c.0.fetch_add(n, Ordering::Relaxed);
        });
    }

    pub fn counter_get(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        self.counters
            .read()
            .get(&MetricKey::new(name, labels))
            .map_or(0, |c| c.0.load(Ordering::Relaxed))
    }

    pub fn gauge_set(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        with_entry(&self.gauges, MetricKey::new(name, labels), Gauge::new, |g| {
            g.set(value)
        });
    }

    pub fn gauge_get(&self, name: &str, labels: &[(&str, &str)]) -> f64 {
        self.gauges
            .read()
            .get(&MetricKey::new(name, labels))
            .map_or(0.0, Gauge::get)
    }

    pub fn histogram_observe(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        with_entry(&self.histograms, MetricKey::new(name, labels), Histogram::new, |h| {
            h.observe(value)
        });
    }

    pub fn histogram_summary(&self, name: &str, labels: &[(&str, &str)]) -> HistogramSummary {
        self.histograms
            .read()
            .get(&MetricKey::new(name, labels))
            .map(Histogram::summary)
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            counters: self
                .counters
                .read()
                .iter()
                .map(|(k, c)| (k.render(), c.0.load(Ordering::Relaxed)))
                .collect(),
            gauges: self
                .gauges
                .read()
                .iter()
                .map(|(k, g)| (k.render(), g.get()))
                .collect(),
            histograms: self
                .histograms
                .read()
                .iter()
                .map(|(k, h)| (k.render(), h.summary()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn counters_are_keyed_by_labels() {
        let recorder = MetricsRecorder::new();
        recorder.counter_inc(names::APPROVALS_FAILED, &[("kind", "publish_failure")], 1);
        recorder.counter_inc(names::APPROVALS_FAILED, &[("kind", "publish_failure")], 1);
        recorder.counter_inc(names::APPROVALS_FAILED, &[("kind", "timeout")], 1);

        assert_eq!(
            recorder.counter_get(names::APPROVALS_FAILED, &[("kind", "publish_failure")]),
            2
        );
        assert_eq!(
            recorder.counter_get(names::APPROVALS_FAILED, &[("kind", "timeout")]),
            1
        );
        assert_eq!(recorder.counter_get(names::APPROVALS_FAILED, &[]), 0);
    }

    #[test]
    fn gauge_keeps_last_value() {
        let recorder = MetricsRecorder::new();
        assert_eq!(recorder.gauge_get(names::SESSIONS_ACTIVE, &[]), 0.0);
        recorder.gauge_set(names::SESSIONS_ACTIVE, &[], 2.0);
        recorder.gauge_set(names::SESSIONS_ACTIVE, &[], 7.0);
        assert_eq!(recorder.gauge_get(names::SESSIONS_ACTIVE, &[]), 7.0);
    }

    #[test]
    fn histogram_percentiles() {
        let recorder = MetricsRecorder::new();
        for v in 1..=100 {
            recorder.histogram_observe(names::PUBLISH_LATENCY_MS, &[], v as f64);
        }
        let summary = recorder.histogram_summary(names::PUBLISH_LATENCY_MS, &[]);
        assert_eq!(summary.count, 100);
        assert_eq!(summary.sum, 5050.0);
        assert!(summary.p50 >= 50.0 && summary.p50 <= 51.0);
        assert!(summary.p99 >= 99.0);
    }

    #[test]
    fn histogram_window_is_bounded() {
        let recorder = MetricsRecorder::new();
        for _ in 0..HISTOGRAM_WINDOW {
            recorder.histogram_observe("h", &[], 1000.0);
        }
        for _ in 0..HISTOGRAM_WINDOW {
            recorder.histogram_observe("h", &[], 1.0);
        }
        let summary = recorder.histogram_summary("h", &[]);
        assert_eq!(summary.count, 2 * HISTOGRAM_WINDOW as u64);
        assert_eq!(summary.p99, 1.0);
    }

    #[test]
    fn histogram_sum_matches_count_past_the_window() {
        let recorder = MetricsRecorder::new();
        for _ in 0..HISTOGRAM_WINDOW {
            recorder.histogram_observe("h", &[], 10.0);
        }
        for _ in 0..HISTOGRAM_WINDOW {
            recorder.histogram_observe("h", &[], 2.0);
        }
        let summary = recorder.histogram_summary("h", &[]);
        assert_eq!(summary.count, 2 * HISTOGRAM_WINDOW as u64);
        assert_eq!(summary.sum, 12.0 * HISTOGRAM_WINDOW as f64);
        assert_eq!(summary.p50, 2.0);
    }

    #[test]
    fn empty_histogram_is_zeroed() {
        let summary = MetricsRecorder::new().histogram_summary("missing", &[]);
        assert_eq!(summary, HistogramSummary::default());
    }

    #[test]
    fn label_order_independent() {
        let recorder = MetricsRecorder::new();
        recorder.counter_inc("t", &[("a", "1"), ("b", "2")], 1);
        recorder.counter_inc("t", &[("b", "2"), ("a", "1")], 1);
        assert_eq!(recorder.counter_get("t", &[("a", "1"), ("b", "2")]), 2);
    }

    #[test]
    fn snapshot_renders_labels() {
        let recorder = MetricsRecorder::new();
        recorder.counter_inc(names::EVENTS_RECEIVED, &[], 3);
        recorder.counter_inc(names::APPROVALS_FAILED, &[("kind", "timeout")], 1);
        recorder.gauge_set(names::SESSIONS_ACTIVE, &[], 2.0);
        recorder.histogram_observe(names::PUBLISH_LATENCY_MS, &[], 12.0);

        let snap = recorder.snapshot();
        assert_eq!(snap.counters["bridge.events_received"], 3);
        assert_eq!(snap.counters["bridge.approvals_failed{kind=timeout}"], 1);
        assert_eq!(snap.gauges["bridge.sessions_active"], 2.0);
        assert_eq!(snap.histograms["bridge.publish_latency_ms"].count, 1);

        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["counters"]["bridge.events_received"], 3);
    }

    #[test]
    fn concurrent_increments() {
        let recorder = Arc::new(MetricsRecorder::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let r = recorder.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        r.counter_inc(names::EVENTS_RECEIVED, &[], 1);
                        r.histogram_observe(names::PUBLISH_LATENCY_MS, &[], 1.0);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(recorder.counter_get(names::EVENTS_RECEIVED, &[]), 8000);
        let latency = recorder.histogram_summary(names::PUBLISH_LATENCY_MS, &[]);
        assert_eq!(latency.count, 8000);
        assert_eq!(latency.sum, 8000.0);
    }
}
