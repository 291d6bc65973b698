//! Workflow counters
//!
//! Process-wide atomic counters for the capture workflows, with a
//! Prometheus-compatible text rendering.
//!
//! # Example
//!
//! ```rust
//! use snapwatch::metrics::{global_metrics, Counter};
//!
//! global_metrics().record(Counter::CapturesStarted);
//! let output = global_metrics().to_prometheus_format();
//! assert!(output.contains("snapwatch_captures_started_total"));
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

/// A counted workflow event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Counter {
    /// A capture workflow started
    CapturesStarted,
    /// A snapshot was persisted
    CapturesSaved,
    /// A capture failed with an error
    CapturesFailed,
    /// A capture was abandoned at the verification gate
    CapturesAborted,
    /// A capture was skipped because the tab was already mid-capture
    CapturesSkipped,
    /// The readiness probe confirmed expansion
    ProbeReady,
    /// The readiness probe ran out of attempts
    ProbeExhausted,
    /// A verification interstitial held a capture
    GateEngaged,
    /// A discovered link was opened in the background
    LinksOpened,
    /// Focus was switched back to the user's tab
    FocusCorrections,
}

impl Counter {
    /// Every counter, in rendering order
    pub const ALL: [Counter; 10] = [
        Counter::CapturesStarted,
        Counter::CapturesSaved,
        Counter::CapturesFailed,
        Counter::CapturesAborted,
        Counter::CapturesSkipped,
        Counter::ProbeReady,
        Counter::ProbeExhausted,
        Counter::GateEngaged,
        Counter::LinksOpened,
        Counter::FocusCorrections,
    ];

    /// Prometheus metric name
    pub fn name(self) -> &'static str {
        match self {
            Counter::CapturesStarted => "snapwatch_captures_started_total",
            Counter::CapturesSaved => "snapwatch_captures_saved_total",
            Counter::CapturesFailed => "snapwatch_captures_failed_total",
            Counter::CapturesAborted => "snapwatch_captures_aborted_total",
            Counter::CapturesSkipped => "snapwatch_captures_skipped_total",
            Counter::ProbeReady => "snapwatch_probe_ready_total",
            Counter::ProbeExhausted => "snapwatch_probe_exhausted_total",
            Counter::GateEngaged => "snapwatch_verification_gate_engaged_total",
            Counter::LinksOpened => "snapwatch_links_opened_total",
            Counter::FocusCorrections => "snapwatch_focus_corrections_total",
        }
    }

    fn help(self) -> &'static str {
        match self {
            Counter::CapturesStarted => "Capture workflows started",
            Counter::CapturesSaved => "Snapshots persisted",
            Counter::CapturesFailed => "Capture workflows that failed",
            Counter::CapturesAborted => "Captures abandoned at the verification gate",
            Counter::CapturesSkipped => "Captures skipped because the tab was busy",
            Counter::ProbeReady => "Readiness probes that confirmed expansion",
            Counter::ProbeExhausted => "Readiness probes that ran out of attempts",
            Counter::GateEngaged => "Captures held by a verification page",
            Counter::LinksOpened => "Discovered links opened in background tabs",
            Counter::FocusCorrections => "Corrective focus switches performed",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Thread-safe counter set
#[derive(Debug)]
pub struct Metrics {
    counters: [AtomicU64; Counter::ALL.len()],
    start_time: Instant,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    /// Create a zeroed counter set
    pub fn new() -> Self {
        Self {
            counters: std::array::from_fn(|_| AtomicU64::new(0)),
            start_time: Instant::now(),
        }
    }

    /// Increment a counter by one
    pub fn record(&self, counter: Counter) {
        self.add(counter, 1);
    }

    /// Increment a counter by `n`
    pub fn add(&self, counter: Counter, n: u64) {
        self.counters[counter.index()].fetch_add(n, Ordering::Relaxed);
    }

    /// Current value of a counter
    pub fn get(&self, counter: Counter) -> u64 {
        self.counters[counter.index()].load(Ordering::Relaxed)
    }

    /// Time since the counters were created
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Render in Prometheus text exposition format
    pub fn to_prometheus_format(&self) -> String {
        let mut output = String::with_capacity(1024);
        for counter in Counter::ALL {
            output.push_str(&format!("# HELP {} {}\n", counter.name(), counter.help()));
            output.push_str(&format!("# TYPE {} counter\n", counter.name()));
            output.push_str(&format!("{} {}\n", counter.name(), self.get(counter)));
        }
        output.push_str("# TYPE snapwatch_uptime_seconds gauge\n");
        output.push_str(&format!(
            "snapwatch_uptime_seconds {}\n",
            self.uptime().as_secs()
        ));
        output
    }
}

static GLOBAL_METRICS: OnceLock<Metrics> = OnceLock::new();

/// Get the global metrics instance
pub fn global_metrics() -> &'static Metrics {
    GLOBAL_METRICS.get_or_init(Metrics::new)
}
