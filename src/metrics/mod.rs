use prometheus::{
    Counter, CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;
use std::time::Duration;

use crate::index::searcher::{RefreshListener, RefreshOutcome};
use crate::models::Partition;

const LATENCY_BUCKETS: &[f64] = &[0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0];

/// Prometheus metrics for one logical index
#[derive(Clone)]
pub struct IndexMetrics {
    // Counters
    pub writes_total: CounterVec,
    pub write_errors: CounterVec,
    pub commits_total: CounterVec,
    pub refreshes_total: CounterVec,
    pub searches_total: CounterVec,
    pub search_errors: Counter,

    // Gauges
    pub searching_generation: GaugeVec,

    // Histograms
    pub write_latency: HistogramVec,
    pub search_latency: HistogramVec,

    // Registry
    registry: Arc<Registry>,
}

impl IndexMetrics {
    /// Create metrics labelled with the index name, in a fresh registry
    pub fn new(index: &str) -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let opts = |name: &str, help: &str| Opts::new(name, help).const_label("index", index);
        let hopts = |name: &str, help: &str| {
            HistogramOpts::new(name, help)
                .const_label("index", index)
                .buckets(LATENCY_BUCKETS.to_vec())
        };

        // Counters
        let writes_total = CounterVec::new(
            opts("revindex_writes_total", "Write operations applied, by partition and type"),
            &["partition", "op"],
        )?;
        registry.register(Box::new(writes_total.clone()))?;

        let write_errors = CounterVec::new(
            opts("revindex_write_errors_total", "Write operations the engine rejected"),
            &["partition"],
        )?;
        registry.register(Box::new(write_errors.clone()))?;

        let commits_total = CounterVec::new(
            opts("revindex_commits_total", "Periodic commits, by result"),
            &["partition", "result"],
        )?;
        registry.register(Box::new(commits_total.clone()))?;

        let refreshes_total = CounterVec::new(
            opts("revindex_refreshes_total", "Refresh attempts, by outcome"),
            &["partition", "outcome"],
        )?;
        registry.register(Box::new(refreshes_total.clone()))?;

        let searches_total = CounterVec::new(
            opts("revindex_searches_total", "Searches, by result kind"),
            &["kind"],
        )?;
        registry.register(Box::new(searches_total.clone()))?;

        let search_errors = Counter::with_opts(opts(
            "revindex_search_errors_total",
            "Searches that failed",
        ))?;
        registry.register(Box::new(search_errors.clone()))?;

        // Gauges
        let searching_generation = GaugeVec::new(
            opts(
                "revindex_searching_generation",
                "Newest write generation visible to searchers",
            ),
            &["partition"],
        )?;
        registry.register(Box::new(searching_generation.clone()))?;

        // Histograms
        let write_latency = HistogramVec::new(
            hopts("revindex_write_latency_seconds", "Engine time per write operation"),
            &["partition"],
        )?;
        registry.register(Box::new(write_latency.clone()))?;

        let search_latency = HistogramVec::new(
            hopts("revindex_search_latency_seconds", "Search latency"),
            &["kind"],
        )?;
        registry.register(Box::new(search_latency.clone()))?;

        Ok(Self {
            writes_total,
            write_errors,
            commits_total,
            refreshes_total,
            searches_total,
            search_errors,
            searching_generation,
            write_latency,
            search_latency,
            registry: Arc::new(registry),
        })
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    /// Render every metric in the text exposition format
    pub fn render(&self) -> String {
        let mut buf = Vec::new();
        if TextEncoder::new()
            .encode(&self.registry.gather(), &mut buf)
            .is_err()
        {
            return String::new();
        }
        String::from_utf8(buf).unwrap_or_default()
    }

    /// Record one applied write
    pub fn observe_write(&self, partition: Partition, op: &str, elapsed: Duration, ok: bool) {
        self.writes_total
            .with_label_values(&[partition.as_str(), op])
            .inc();
        self.write_latency
            .with_label_values(&[partition.as_str()])
            .observe(elapsed.as_secs_f64());
        if !ok {
            self.write_errors
                .with_label_values(&[partition.as_str()])
                .inc();
        }
    }

    /// Record a periodic commit
    pub fn record_commit(&self, partition: Partition, ok: bool) {
        let result = if ok { "ok" } else { "error" };
        self.commits_total
            .with_label_values(&[partition.as_str(), result])
            .inc();
    }

    /// Record a search operation
    pub fn record_search(&self, kind: &str, elapsed: Duration) {
        self.searches_total.with_label_values(&[kind]).inc();
        self.search_latency
            .with_label_values(&[kind])
            .observe(elapsed.as_secs_f64());
    }

    /// Record a search error
    pub fn record_search_error(&self) {
        self.search_errors.inc();
    }
}

/// Counts refresh attempts of one partition
pub(crate) struct RefreshMetrics {
    pub(crate) metrics: Arc<IndexMetrics>,
    pub(crate) partition: Partition,
    pub(crate) searching: Arc<dyn Fn() -> u64 + Send + Sync>,
}

impl RefreshListener for RefreshMetrics {
    fn after_refresh(&self, outcome: RefreshOutcome) {
        let label = match outcome {
            RefreshOutcome::Refreshed => "refreshed",
            RefreshOutcome::Unchanged => "unchanged",
            RefreshOutcome::Failed => "failed",
        };
        self.metrics
            .refreshes_total
            .with_label_values(&[self.partition.as_str(), label])
            .inc();
        self.metrics
            .searching_generation
            .with_label_values(&[self.partition.as_str()])
            .set((self.searching)() as f64);
    }
}
