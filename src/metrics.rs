use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

/// One-time metrics registration (so series show up in the exposition).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "slot_requests_total",
            "Batch request attempts sent to the serving endpoint."
        );
        describe_counter!(
            "slot_request_retries_total",
            "Attempts that failed and were retried."
        );
        describe_counter!(
            "slot_batches_failed_total",
            "Batches abandoned after exhausting attempts or on malformed responses."
        );
        describe_counter!(
            "slot_transport_errors_total",
            "HTTP transport failures (network or non-success status)."
        );
        describe_counter!(
            "slot_renders_total",
            "Slot renders by outcome (item or empty)."
        );
        describe_counter!(
            "slot_views_confirmed_total",
            "Views confirmed by the visibility tracker."
        );
        describe_gauge!(
            "seen_long_term_len",
            "Length of the persisted long-term seen list after the last write."
        );
    });
}

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder for this process.
    pub fn init() -> anyhow::Result<Self> {
        // Use default buckets to avoid API differences across crate versions.
        let handle = PrometheusBuilder::new().install_recorder()?;
        ensure_metrics_described();
        Ok(Self { handle })
    }

    /// Prometheus exposition text.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}
