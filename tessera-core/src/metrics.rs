//! Prometheus metrics for the block facade
//!
//! Thread-safe metrics collection using atomic types. Clones share counters,
//! so a facade and the sessions derived from it report together.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Clone, Debug)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    // Local tier
    local_hits: AtomicU64,
    local_misses: AtomicU64,
    duplicate_puts: AtomicU64,

    // Retrieval races
    races_won: AtomicU64,
    races_failed: AtomicU64,
    bytes_retrieved: AtomicU64,
    total_race_time_ms: AtomicU64,

    // Announcements
    announces_sent: AtomicU64,
    announces_failed: AtomicU64,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                local_hits: AtomicU64::new(0),
                local_misses: AtomicU64::new(0),
                duplicate_puts: AtomicU64::new(0),
                races_won: AtomicU64::new(0),
                races_failed: AtomicU64::new(0),
                bytes_retrieved: AtomicU64::new(0),
                total_race_time_ms: AtomicU64::new(0),
                announces_sent: AtomicU64::new(0),
                announces_failed: AtomicU64::new(0),
                start_time: Instant::now(),
            }),
        }
    }

    // Local tier

    pub fn local_hit(&self) {
        self.inner.local_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn local_miss(&self) {
        self.inner.local_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn duplicate_put(&self) {
        self.inner.duplicate_puts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn local_hits(&self) -> u64 {
        self.inner.local_hits.load(Ordering::Relaxed)
    }

    pub fn local_misses(&self) -> u64 {
        self.inner.local_misses.load(Ordering::Relaxed)
    }

    pub fn duplicate_puts(&self) -> u64 {
        self.inner.duplicate_puts.load(Ordering::Relaxed)
    }

    // Retrieval races

    pub fn race_won(&self, size: usize, elapsed: Duration) {
        self.inner.races_won.fetch_add(1, Ordering::Relaxed);
        self.inner
            .bytes_retrieved
            .fetch_add(size as u64, Ordering::Relaxed);
        self.inner
            .total_race_time_ms
            .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn race_failed(&self) {
        self.inner.races_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn races_won(&self) -> u64 {
        self.inner.races_won.load(Ordering::Relaxed)
    }

    pub fn races_failed(&self) -> u64 {
        self.inner.races_failed.load(Ordering::Relaxed)
    }

    pub fn bytes_retrieved(&self) -> u64 {
        self.inner.bytes_retrieved.load(Ordering::Relaxed)
    }

    pub fn avg_race_time_ms(&self) -> f64 {
        let total = self.inner.total_race_time_ms.load(Ordering::Relaxed);
        let count = self.races_won();
        if count == 0 {
            0.0
        } else {
            total as f64 / count as f64
        }
    }

    // Announcements

    pub fn announce_sent(&self) {
        self.inner.announces_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn announce_failed(&self) {
        self.inner.announces_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn announces_sent(&self) -> u64 {
        self.inner.announces_sent.load(Ordering::Relaxed)
    }

    pub fn announces_failed(&self) -> u64 {
        self.inner.announces_failed.load(Ordering::Relaxed)
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.inner.start_time.elapsed().as_secs()
    }

    /// Generate Prometheus-formatted metrics text
    pub fn to_prometheus(&self) -> String {
        format!(
            "# HELP tessera_uptime_seconds Time since the facade was created\n\
             # TYPE tessera_uptime_seconds counter\n\
             tessera_uptime_seconds {}\n\
             \n\
             # HELP tessera_local_hits_total Gets served from the local tier\n\
             # TYPE tessera_local_hits_total counter\n\
             tessera_local_hits_total {}\n\
             \n\
             # HELP tessera_local_misses_total Gets that fell through to brokers\n\
             # TYPE tessera_local_misses_total counter\n\
             tessera_local_misses_total {}\n\
             \n\
             # HELP tessera_duplicate_puts_total Puts skipped because the block was present\n\
             # TYPE tessera_duplicate_puts_total counter\n\
             tessera_duplicate_puts_total {}\n\
             \n\
             # HELP tessera_races_won_total Retrieval races that produced a verified block\n\
             # TYPE tessera_races_won_total counter\n\
             tessera_races_won_total {}\n\
             \n\
             # HELP tessera_races_failed_total Retrieval races in which every broker failed\n\
             # TYPE tessera_races_failed_total counter\n\
             tessera_races_failed_total {}\n\
             \n\
             # HELP tessera_bytes_retrieved_total Verified bytes retrieved from brokers\n\
             # TYPE tessera_bytes_retrieved_total counter\n\
             tessera_bytes_retrieved_total {}\n\
             \n\
             # HELP tessera_announces_total Successful broker announcements\n\
             # TYPE tessera_announces_total counter\n\
             tessera_announces_total {}\n\
             \n\
             # HELP tessera_announce_failures_total Failed broker announcements\n\
             # TYPE tessera_announce_failures_total counter\n\
             tessera_announce_failures_total {}\n\
             \n\
             # HELP tessera_avg_race_time_ms Average time to win a retrieval race\n\
             # TYPE tessera_avg_race_time_ms gauge\n\
             tessera_avg_race_time_ms {:.2}\n",
            self.uptime_seconds(),
            self.local_hits(),
            self.local_misses(),
            self.duplicate_puts(),
            self.races_won(),
            self.races_failed(),
            self.bytes_retrieved(),
            self.announces_sent(),
            self.announces_failed(),
            self.avg_race_time_ms(),
        )
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
