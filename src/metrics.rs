//! In-process counters for API health and watchlist reconciliation.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

/// Shared metrics registry, cheap to clone
#[derive(Debug, Clone)]
pub struct Metrics {
    pub land_api_calls: Arc<Counter>,
    pub land_api_errors: Arc<Counter>,
    pub land_cache_hits: Arc<Counter>,

    pub marketplace_calls: Arc<Counter>,
    pub marketplace_errors: Arc<Counter>,

    pub reconcile_runs: Arc<Counter>,
    pub entries_resolved: Arc<Counter>,
    pub entries_failed: Arc<Counter>,
    pub entries_discarded: Arc<Counter>,

    /// Lands currently held across all watchlists
    pub watched_lands: Arc<Gauge>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            land_api_calls: Arc::new(Counter::new("land_api_calls", "Land API requests")),
            land_api_errors: Arc::new(Counter::new("land_api_errors", "Failed land API requests")),
            land_cache_hits: Arc::new(Counter::new("land_cache_hits", "Land lookups served from cache")),
            marketplace_calls: Arc::new(Counter::new("marketplace_calls", "Marketplace price requests")),
            marketplace_errors: Arc::new(Counter::new(
                "marketplace_errors",
                "Failed marketplace price requests",
            )),
            reconcile_runs: Arc::new(Counter::new("reconcile_runs", "Watchlist reconcile passes")),
            entries_resolved: Arc::new(Counter::new(
                "entries_resolved",
                "Watchlist lands resolved and priced",
            )),
            entries_failed: Arc::new(Counter::new(
                "entries_failed",
                "Watchlist lands whose pipeline failed",
            )),
            entries_discarded: Arc::new(Counter::new(
                "entries_discarded",
                "Results dropped because the session ended mid-flight",
            )),
            watched_lands: Arc::new(Gauge::new("watched_lands", "Lands held in watchlists")),
        }
    }

    fn counters(&self) -> [&Counter; 9] {
        [
            &*self.land_api_calls,
            &*self.land_api_errors,
            &*self.land_cache_hits,
            &*self.marketplace_calls,
            &*self.marketplace_errors,
            &*self.reconcile_runs,
            &*self.entries_resolved,
            &*self.entries_failed,
            &*self.entries_discarded,
        ]
    }

    /// Prometheus text exposition
    pub fn export_prometheus(&self) -> String {
        let mut output = String::new();
        for counter in self.counters() {
            let _ = write!(
                output,
                "# HELP {name} {help}\n# TYPE {name} counter\n{name} {value}\n\n",
                name = counter.name(),
                help = counter.help(),
                value = counter.get()
            );
        }
        let gauge = &self.watched_lands;
        let _ = write!(
            output,
            "# HELP {name} {help}\n# TYPE {name} gauge\n{name} {value}\n",
            name = gauge.name(),
            help = gauge.help(),
            value = gauge.get()
        );
        output
    }

    pub fn log_summary(&self) {
        tracing::info!(
            land_api_calls = self.land_api_calls.get(),
            land_api_errors = self.land_api_errors.get(),
            land_cache_hits = self.land_cache_hits.get(),
            marketplace_calls = self.marketplace_calls.get(),
            marketplace_errors = self.marketplace_errors.get(),
            reconcile_runs = self.reconcile_runs.get(),
            entries_resolved = self.entries_resolved.get(),
            entries_failed = self.entries_failed.get(),
            entries_discarded = self.entries_discarded.get(),
            watched_lands = self.watched_lands.get(),
            "metrics summary"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Monotonic counter
#[derive(Debug)]
pub struct Counter {
    name: &'static str,
    help: &'static str,
    value: AtomicU64,
}

impl Counter {
    pub fn new(name: &'static str, help: &'static str) -> Self {
        Self {
            name,
            help,
            value: AtomicU64::new(0),
        }
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

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn help(&self) -> &'static str {
        self.help
    }
}

/// Value that can move in both directions
#[derive(Debug)]
pub struct Gauge {
    name: &'static str,
    help: &'static str,
    value: AtomicI64,
}

impl Gauge {
    pub fn new(name: &'static str, help: &'static str) -> Self {
        Self {
            name,
            help,
            value: AtomicI64::new(0),
        }
    }

    pub fn set(&self, value: i64) {
        self.value.store(value, Ordering::Relaxed);
    }

    pub fn add(&self, n: i64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn help(&self) -> &'static str {
        self.help
    }
}
