//! Hand-rolled Prometheus text-exposition counters for `GET /metrics`.
//!
//! Nothing in this workspace's dependency stack speaks the Prometheus
//! wire format, so the exposition text is built by hand from a handful
//! of atomics and a couple of fixed-bucket histograms, in the spirit of
//! "in-memory caches are immutable after load" (§5): these counters are
//! the one piece of daemon state that mutates outside the database, and
//! they never need to survive a restart.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Fixed bucket boundaries, seconds. Shared by the wait-time and
/// run-duration histograms; good enough resolution for both without
/// inventing a second ladder.
const BUCKET_BOUNDS_SECONDS: [f64; 9] = [5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0, 3600.0];

#[derive(Default)]
struct HistogramInner {
    bucket_counts: Vec<u64>,
    sum: f64,
    count: u64,
}

struct Histogram {
    inner: Mutex<HistogramInner>,
}

impl Histogram {
    fn new() -> Self {
        Histogram {
            inner: Mutex::new(HistogramInner {
                bucket_counts: vec![0; BUCKET_BOUNDS_SECONDS.len()],
                sum: 0.0,
                count: 0,
            }),
        }
    }

    fn observe(&self, value_seconds: f64) {
        let mut inner = self.inner.lock().unwrap();
        for (i, bound) in BUCKET_BOUNDS_SECONDS.iter().enumerate() {
            if value_seconds <= *bound {
                inner.bucket_counts[i] += 1;
            }
        }
        inner.sum += value_seconds;
        inner.count += 1;
    }

    fn render(&self, name: &str, out: &mut String) {
        let inner = self.inner.lock().unwrap();
        out.push_str(&format!("# TYPE {name} histogram\n"));
        for (bound, count) in BUCKET_BOUNDS_SECONDS.iter().zip(&inner.bucket_counts) {
            out.push_str(&format!("{name}_bucket{{le=\"{bound}\"}} {count}\n"));
        }
        out.push_str(&format!("{name}_bucket{{le=\"+Inf\"}} {}\n", inner.count));
        out.push_str(&format!("{name}_sum {}\n", inner.sum));
        out.push_str(&format!("{name}_count {}\n", inner.count));
    }
}

/// Process-lifetime counters surfaced by `GET /metrics`. Queue depth
/// gauges are not tracked here: they are read fresh from the queue at
/// scrape time so they can never drift from the database's own state.
pub struct Metrics {
    assignments_total: AtomicU64,
    no_work_total: AtomicU64,
    results_total: Mutex<HashMap<String, u64>>,
    wait_time_seconds: Histogram,
    run_duration_seconds: Histogram,
}

impl Metrics {
    pub fn new() -> Self {
        Metrics {
            assignments_total: AtomicU64::new(0),
            no_work_total: AtomicU64::new(0),
            results_total: Mutex::new(HashMap::new()),
            wait_time_seconds: Histogram::new(),
            run_duration_seconds: Histogram::new(),
        }
    }

    pub fn record_assignment(&self, wait_seconds: f64) {
        self.assignments_total.fetch_add(1, Ordering::Relaxed);
        self.wait_time_seconds.observe(wait_seconds.max(0.0));
    }

    pub fn record_no_work(&self) {
        self.no_work_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_result(&self, result_code: &str, run_duration_seconds: Option<f64>) {
        let mut counts = self.results_total.lock().unwrap();
        *counts.entry(result_code.to_string()).or_insert(0) += 1;
        drop(counts);
        if let Some(d) = run_duration_seconds {
            self.run_duration_seconds.observe(d.max(0.0));
        }
    }

    pub fn render(&self, queue_items_by_bucket: &[(String, i64)]) -> String {
        let mut out = String::new();

        out.push_str("# TYPE queue_items_total gauge\n");
        for (bucket, count) in queue_items_by_bucket {
            out.push_str(&format!("queue_items_total{{bucket=\"{bucket}\"}} {count}\n"));
        }

        out.push_str("# TYPE assignments_total counter\n");
        out.push_str(&format!(
            "assignments_total {}\n",
            self.assignments_total.load(Ordering::Relaxed)
        ));

        out.push_str("# TYPE assignments_no_work_total counter\n");
        out.push_str(&format!(
            "assignments_no_work_total {}\n",
            self.no_work_total.load(Ordering::Relaxed)
        ));

        out.push_str("# TYPE results_total counter\n");
        for (code, count) in self.results_total.lock().unwrap().iter() {
            out.push_str(&format!("results_total{{code=\"{code}\"}} {count}\n"));
        }

        self.wait_time_seconds.render("assignment_wait_seconds", &mut out);
        self.run_duration_seconds.render("run_duration_seconds", &mut out);

        out
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn results_total_is_keyed_by_code() {
        let m = Metrics::new();
        m.record_result("success", Some(30.0));
        m.record_result("success", Some(45.0));
        m.record_result("worker-timeout", None);
        let rendered = m.render(&[]);
        assert!(rendered.contains("results_total{code=\"success\"} 2"));
        assert!(rendered.contains("results_total{code=\"worker-timeout\"} 1"));
    }

    #[test]
    fn histogram_count_matches_observations() {
        let h = Histogram::new();
        h.observe(1.0);
        h.observe(400.0);
        let mut out = String::new();
        h.render("x", &mut out);
        assert!(out.contains("x_count 2"));
    }
}
