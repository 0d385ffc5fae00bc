use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::info;

/// Metrics collector for matching engine operations
#[derive(Debug)]
pub struct EngineMetrics {
    // Latency tracking
    place_latency: LatencyTracker,
    cancel_latency: LatencyTracker,
    match_scan_latency: LatencyTracker,

    // Throughput counters
    orders_placed: AtomicU64,
    orders_rested: AtomicU64,
    orders_matched: AtomicU64,
    orders_cancelled: AtomicU64,
    orders_evicted: AtomicU64,
    self_trades_skipped: AtomicU64,
    mirror_failures: AtomicU64,

    // Book state
    resting_bids: AtomicU64,
    resting_asks: AtomicU64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        describe_counter!("engine_orders_total", "Orders processed by outcome");
        describe_counter!(
            "engine_evictions_total",
            "Expired resting orders evicted during scans"
        );
        describe_counter!(
            "engine_self_trades_skipped_total",
            "Resting orders skipped because they belong to the incoming owner"
        );
        describe_counter!(
            "engine_mirror_failures_total",
            "Order record mirror calls that failed after the book was updated"
        );
        describe_histogram!(
            "engine_operation_duration_seconds",
            "Duration of engine operations"
        );
        describe_gauge!("engine_resting_orders", "Resting orders per book");

        Self {
            place_latency: LatencyTracker::new("place"),
            cancel_latency: LatencyTracker::new("cancel"),
            match_scan_latency: LatencyTracker::new("match_scan"),
            orders_placed: AtomicU64::new(0),
            orders_rested: AtomicU64::new(0),
            orders_matched: AtomicU64::new(0),
            orders_cancelled: AtomicU64::new(0),
            orders_evicted: AtomicU64::new(0),
            self_trades_skipped: AtomicU64::new(0),
            mirror_failures: AtomicU64::new(0),
            resting_bids: AtomicU64::new(0),
            resting_asks: AtomicU64::new(0),
        }
    }

    // Latency recording
    pub fn record_place(&self, duration: Duration) {
        self.place_latency.record_latency(duration);
    }

    pub fn record_cancel(&self, duration: Duration) {
        self.cancel_latency.record_latency(duration);
    }

    pub fn record_match_scan(&self, duration: Duration) {
        self.match_scan_latency.record_latency(duration);
    }

    // Counter methods
    pub fn increment_orders_placed(&self) {
        self.orders_placed.fetch_add(1, Ordering::Relaxed);
        counter!("engine_orders_total", "outcome" => "placed").increment(1);
    }

    pub fn increment_orders_rested(&self) {
        self.orders_rested.fetch_add(1, Ordering::Relaxed);
        counter!("engine_orders_total", "outcome" => "rested").increment(1);
    }

    pub fn increment_orders_matched(&self) {
        self.orders_matched.fetch_add(1, Ordering::Relaxed);
        counter!("engine_orders_total", "outcome" => "matched").increment(1);
    }

    pub fn increment_orders_cancelled(&self) {
        self.orders_cancelled.fetch_add(1, Ordering::Relaxed);
        counter!("engine_orders_total", "outcome" => "cancelled").increment(1);
    }

    pub fn add_orders_evicted(&self, count: u64) {
        if count == 0 {
            return;
        }
        self.orders_evicted.fetch_add(count, Ordering::Relaxed);
        counter!("engine_evictions_total").increment(count);
    }

    pub fn add_self_trades_skipped(&self, count: u64) {
        if count == 0 {
            return;
        }
        self.self_trades_skipped.fetch_add(count, Ordering::Relaxed);
        counter!("engine_self_trades_skipped_total").increment(count);
    }

    pub fn increment_mirror_failures(&self) {
        self.mirror_failures.fetch_add(1, Ordering::Relaxed);
        counter!("engine_mirror_failures_total").increment(1);
    }

    // Gauge methods
    pub fn set_resting(&self, bids: u64, asks: u64) {
        self.resting_bids.store(bids, Ordering::Relaxed);
        self.resting_asks.store(asks, Ordering::Relaxed);
        gauge!("engine_resting_orders", "book" => "bids").set(bids as f64);
        gauge!("engine_resting_orders", "book" => "asks").set(asks as f64);
    }

    // Getters for current values
    pub fn get_orders_placed(&self) -> u64 {
        self.orders_placed.load(Ordering::Relaxed)
    }

    pub fn get_orders_rested(&self) -> u64 {
        self.orders_rested.load(Ordering::Relaxed)
    }

    pub fn get_orders_matched(&self) -> u64 {
        self.orders_matched.load(Ordering::Relaxed)
    }

    pub fn get_orders_cancelled(&self) -> u64 {
        self.orders_cancelled.load(Ordering::Relaxed)
    }

    pub fn get_orders_evicted(&self) -> u64 {
        self.orders_evicted.load(Ordering::Relaxed)
    }

    pub fn get_self_trades_skipped(&self) -> u64 {
        self.self_trades_skipped.load(Ordering::Relaxed)
    }

    pub fn get_mirror_failures(&self) -> u64 {
        self.mirror_failures.load(Ordering::Relaxed)
    }

    pub fn get_resting(&self) -> (u64, u64) {
        (
            self.resting_bids.load(Ordering::Relaxed),
            self.resting_asks.load(Ordering::Relaxed),
        )
    }

    pub fn get_latency_stats(&self) -> LatencyStats {
        LatencyStats {
            place: self.place_latency.get_stats(),
            cancel: self.cancel_latency.get_stats(),
            match_scan: self.match_scan_latency.get_stats(),
        }
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Latency tracker for individual operations
#[derive(Debug)]
struct LatencyTracker {
    operation: &'static str,
    samples: AtomicU64,
    total_nanos: AtomicU64,
    min_nanos: AtomicU64,
    max_nanos: AtomicU64,
}

impl LatencyTracker {
    fn new(operation: &'static str) -> Self {
        Self {
            operation,
            samples: AtomicU64::new(0),
            total_nanos: AtomicU64::new(0),
            min_nanos: AtomicU64::new(u64::MAX),
            max_nanos: AtomicU64::new(0),
        }
    }

    fn record_latency(&self, duration: Duration) {
        let nanos = duration.as_nanos() as u64;

        self.samples.fetch_add(1, Ordering::Relaxed);
        self.total_nanos.fetch_add(nanos, Ordering::Relaxed);
        self.min_nanos.fetch_min(nanos, Ordering::Relaxed);
        self.max_nanos.fetch_max(nanos, Ordering::Relaxed);

        histogram!("engine_operation_duration_seconds", "operation" => self.operation)
            .record(duration.as_secs_f64());
    }

    fn get_stats(&self) -> OperationLatencyStats {
        let samples = self.samples.load(Ordering::Relaxed);
        let total = self.total_nanos.load(Ordering::Relaxed);
        let min = self.min_nanos.load(Ordering::Relaxed);
        let max = self.max_nanos.load(Ordering::Relaxed);

        let avg = if samples > 0 { total / samples } else { 0 };

        OperationLatencyStats {
            operation: self.operation,
            samples,
            avg_nanos: avg,
            min_nanos: if min == u64::MAX { 0 } else { min },
            max_nanos: max,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LatencyStats {
    pub place: OperationLatencyStats,
    pub cancel: OperationLatencyStats,
    pub match_scan: OperationLatencyStats,
}

#[derive(Debug, Clone)]
pub struct OperationLatencyStats {
    pub operation: &'static str,
    pub samples: u64,
    pub avg_nanos: u64,
    pub min_nanos: u64,
    pub max_nanos: u64,
}

impl OperationLatencyStats {
    pub fn avg_micros(&self) -> f64 {
        self.avg_nanos as f64 / 1_000.0
    }

    pub fn max_micros(&self) -> f64 {
        self.max_nanos as f64 / 1_000.0
    }
}

/// Background metrics reporter
pub struct MetricsReporter {
    metrics: Arc<EngineMetrics>,
    interval: Duration,
}

impl MetricsReporter {
    pub fn new(metrics: Arc<EngineMetrics>, interval: Duration) -> Self {
        Self { metrics, interval }
    }

    pub async fn run(&self) {
        let mut interval = interval(self.interval);

        loop {
            interval.tick().await;
            self.report();
        }
    }

    pub fn report(&self) {
        let stats = self.metrics.get_latency_stats();
        let (bids, asks) = self.metrics.get_resting();

        info!(
            "Engine Metrics - Placed: {} | Matched: {} | Rested: {} | Cancelled: {} | Evicted: {} | Self-trade skips: {} | Mirror failures: {} | Resting: {} bids / {} asks | Latency (μs): place={:.2} cancel={:.2} scan={:.2}",
            self.metrics.get_orders_placed(),
            self.metrics.get_orders_matched(),
            self.metrics.get_orders_rested(),
            self.metrics.get_orders_cancelled(),
            self.metrics.get_orders_evicted(),
            self.metrics.get_self_trades_skipped(),
            self.metrics.get_mirror_failures(),
            bids,
            asks,
            stats.place.avg_micros(),
            stats.cancel.avg_micros(),
            stats.match_scan.avg_micros()
        );
    }
}
