//! Cluster coordination metrics
//!
//! Prometheus-compatible counters for lifecycle transitions, mailbox traffic
//! and admin API requests. The registry is injected wherever it is needed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Bucket boundaries for lifecycle durations (in milliseconds)
const LIFECYCLE_BUCKETS: [f64; 8] = [
    10.0, 100.0, 500.0, 1000.0, 5000.0, 10000.0, 20000.0, 60000.0,
];

/// Cumulative histogram
#[derive(Debug)]
pub struct Histogram {
    buckets: Vec<AtomicU64>,
    boundaries: Vec<f64>,
    sum_micros: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    pub fn with_buckets(boundaries: &[f64]) -> Self {
        Self {
            buckets: (0..=boundaries.len()).map(|_| AtomicU64::new(0)).collect(),
            boundaries: boundaries.to_vec(),
            sum_micros: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Record a value in milliseconds
    pub fn observe(&self, value: f64) {
        let idx = self
            .boundaries
            .iter()
            .position(|&b| value <= b)
            .unwrap_or(self.boundaries.len());
        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
        self.sum_micros
            .fetch_add((value * 1000.0) as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// (upper bound, cumulative count), ending with +Inf
    pub fn get_buckets(&self) -> Vec<(f64, u64)> {
        let mut cumulative = 0u64;
        let mut result = Vec::with_capacity(self.buckets.len());
        for (i, bucket) in self.buckets.iter().enumerate() {
            cumulative += bucket.load(Ordering::Relaxed);
            let le = self.boundaries.get(i).copied().unwrap_or(f64::INFINITY);
            result.push((le, cumulative));
        }
        result
    }

    pub fn sum(&self) -> f64 {
        self.sum_micros.load(Ordering::Relaxed) as f64 / 1000.0
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

/// Monotonic counter
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Gauge for current values
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, v: u64) {
        self.value.store(v, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Metrics registry for one node process
#[derive(Debug)]
pub struct ClusterMetrics {
    /// Persisted state transitions, keyed by target state
    transitions: Mutex<HashMap<String, u64>>,

    pub activations: Counter,
    pub deactivations: Counter,
    pub lifecycle_failures: Counter,
    pub bounded_wait_timeouts: Counter,
    pub lifecycle_duration: Histogram,

    pub messages_sent: Counter,
    pub messages_received: Counter,
    pub messages_claimed: Counter,
    pub live_nodes: Gauge,

    pub http_requests: Counter,
    pub http_errors: Counter,

    start_time: Instant,
}

impl ClusterMetrics {
    pub fn new() -> Self {
        Self {
            transitions: Mutex::new(HashMap::new()),
            activations: Counter::new(),
            deactivations: Counter::new(),
            lifecycle_failures: Counter::new(),
            bounded_wait_timeouts: Counter::new(),
            lifecycle_duration: Histogram::with_buckets(&LIFECYCLE_BUCKETS),
            messages_sent: Counter::new(),
            messages_received: Counter::new(),
            messages_claimed: Counter::new(),
            live_nodes: Gauge::new(),
            http_requests: Counter::new(),
            http_errors: Counter::new(),
            start_time: Instant::now(),
        }
    }

    pub fn record_transition(&self, state: &str) {
        if let Ok(mut transitions) = self.transitions.lock() {
            *transitions.entry(state.to_string()).or_insert(0) += 1;
        }
    }

    pub fn transitions_to(&self, state: &str) -> u64 {
        self.transitions
            .lock()
            .map(|t| t.get(state).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn record_lifecycle(&self, duration: Duration, success: bool) {
        self.lifecycle_duration
            .observe(duration.as_secs_f64() * 1000.0);
        if !success {
            self.lifecycle_failures.inc();
        }
    }

    pub fn record_request(&self, success: bool) {
        self.http_requests.inc();
        if !success {
            self.http_errors.inc();
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Prometheus text exposition
    pub fn to_prometheus(&self) -> String {
        use std::fmt::Write;
        let mut out = String::new();

        let counters: [(&str, &str, u64); 9] = [
            ("activations_total", "Completed node activations", self.activations.get()),
            ("deactivations_total", "Completed node deactivations", self.deactivations.get()),
            ("lifecycle_failures_total", "Aborted activations or deactivations", self.lifecycle_failures.get()),
            ("bounded_wait_timeouts_total", "Deactivation waits that expired", self.bounded_wait_timeouts.get()),
            ("messages_sent_total", "Cluster messages sent", self.messages_sent.get()),
            ("messages_received_total", "Cluster messages dispatched to consumers", self.messages_received.get()),
            ("messages_claimed_total", "ANY_NODE messages claimed by this node", self.messages_claimed.get()),
            ("http_requests_total", "Admin API requests", self.http_requests.get()),
            ("http_errors_total", "Admin API errors", self.http_errors.get()),
        ];
        for (name, help, value) in counters {
            let _ = writeln!(out, "# HELP minicluster_{} {}", name, help);
            let _ = writeln!(out, "# TYPE minicluster_{} counter", name);
            let _ = writeln!(out, "minicluster_{} {}", name, value);
        }

        out.push_str("# HELP minicluster_live_nodes Nodes both registered and heartbeating\n");
        out.push_str("# TYPE minicluster_live_nodes gauge\n");
        let _ = writeln!(out, "minicluster_live_nodes {}", self.live_nodes.get());

        out.push_str("# HELP minicluster_uptime_seconds Process uptime in seconds\n");
        out.push_str("# TYPE minicluster_uptime_seconds gauge\n");
        let _ = writeln!(out, "minicluster_uptime_seconds {}", self.uptime_seconds());

        out.push_str("# HELP minicluster_transitions_total Persisted node state transitions\n");
        out.push_str("# TYPE minicluster_transitions_total counter\n");
        if let Ok(transitions) = self.transitions.lock() {
            let mut states: Vec<_> = transitions.iter().collect();
            states.sort();
            for (state, count) in states {
                let _ = writeln!(
                    out,
                    "minicluster_transitions_total{{state=\"{}\"}} {}",
                    state, count
                );
            }
        }

        out.push_str("# HELP minicluster_lifecycle_duration_ms Activation/deactivation duration\n");
        out.push_str("# TYPE minicluster_lifecycle_duration_ms histogram\n");
        for (le, count) in self.lifecycle_duration.get_buckets() {
            if le.is_infinite() {
                let _ = writeln!(
                    out,
                    "minicluster_lifecycle_duration_ms_bucket{{le=\"+Inf\"}} {}",
                    count
                );
            } else {
                let _ = writeln!(
                    out,
                    "minicluster_lifecycle_duration_ms_bucket{{le=\"{}\"}} {}",
                    le, count
                );
            }
        }
        let _ = writeln!(
            out,
            "minicluster_lifecycle_duration_ms_sum {}",
            self.lifecycle_duration.sum()
        );
        let _ = writeln!(
            out,
            "minicluster_lifecycle_duration_ms_count {}",
            self.lifecycle_duration.count()
        );

        out
    }
}

impl Default for ClusterMetrics {
    fn default() -> Self {
        Self::new()
    }
}
