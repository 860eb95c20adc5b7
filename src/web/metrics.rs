use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use salvo::prelude::*;

static FEED_ITEMS_CREATED: AtomicU64 = AtomicU64::new(0);
static MESSAGES_FETCHED: AtomicU64 = AtomicU64::new(0);
static WEBHOOKS_RECEIVED: AtomicU64 = AtomicU64::new(0);
static WEBHOOKS_SKIPPED: AtomicU64 = AtomicU64::new(0);
static WEBHOOKS_REJECTED: AtomicU64 = AtomicU64::new(0);
static RELAYS_ENQUEUED: AtomicU64 = AtomicU64::new(0);
static RELAYS_RESOLVED: AtomicU64 = AtomicU64::new(0);
static RELAYS_FAILED: AtomicU64 = AtomicU64::new(0);
static CRON_RUNS: AtomicU64 = AtomicU64::new(0);
static ERROR_COUNT: AtomicU64 = AtomicU64::new(0);

pub struct Metrics {
    started_at: Instant,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
        }
    }

    pub fn feed_item_created() {
        FEED_ITEMS_CREATED.fetch_add(1, Ordering::Relaxed);
    }

    pub fn messages_fetched() {
        MESSAGES_FETCHED.fetch_add(1, Ordering::Relaxed);
    }

    pub fn webhook_received() {
        WEBHOOKS_RECEIVED.fetch_add(1, Ordering::Relaxed);
    }

    pub fn webhook_skipped() {
        WEBHOOKS_SKIPPED.fetch_add(1, Ordering::Relaxed);
    }

    pub fn webhook_rejected() {
        WEBHOOKS_REJECTED.fetch_add(1, Ordering::Relaxed);
    }

    pub fn relay_enqueued() {
        RELAYS_ENQUEUED.fetch_add(1, Ordering::Relaxed);
    }

    pub fn relay_resolved() {
        RELAYS_RESOLVED.fetch_add(1, Ordering::Relaxed);
    }

    pub fn relay_failed() {
        RELAYS_FAILED.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cron_run() {
        CRON_RUNS.fetch_add(1, Ordering::Relaxed);
    }

    pub fn error_occurred() {
        ERROR_COUNT.fetch_add(1, Ordering::Relaxed);
    }
}

pub fn format_prometheus() -> String {
    let feed_items = FEED_ITEMS_CREATED.load(Ordering::Relaxed);
    let fetched = MESSAGES_FETCHED.load(Ordering::Relaxed);
    let webhooks = WEBHOOKS_RECEIVED.load(Ordering::Relaxed);
    let skipped = WEBHOOKS_SKIPPED.load(Ordering::Relaxed);
    let rejected = WEBHOOKS_REJECTED.load(Ordering::Relaxed);
    let enqueued = RELAYS_ENQUEUED.load(Ordering::Relaxed);
    let resolved = RELAYS_RESOLVED.load(Ordering::Relaxed);
    let failed = RELAYS_FAILED.load(Ordering::Relaxed);
    let crons = CRON_RUNS.load(Ordering::Relaxed);
    let errors = ERROR_COUNT.load(Ordering::Relaxed);

    format!(
        r#"# HELP feed_items_created_total Number of feed items created
# TYPE feed_items_created_total counter
feed_items_created_total {}

# HELP messages_fetched_total Number of feed fetch requests served
# TYPE messages_fetched_total counter
messages_fetched_total {}

# HELP webhooks_received_total Number of webhook deliveries received
# TYPE webhooks_received_total counter
webhooks_received_total {}

# HELP webhooks_skipped_total Webhook deliveries ignored (wrong table or event type)
# TYPE webhooks_skipped_total counter
webhooks_skipped_total {}

# HELP webhooks_rejected_total Webhook deliveries rejected (unknown user, bad payload)
# TYPE webhooks_rejected_total counter
webhooks_rejected_total {}

# HELP relays_enqueued_total Relay events persisted to the outbox
# TYPE relays_enqueued_total counter
relays_enqueued_total {}

# HELP relays_resolved_total Relay events delivered to the global store
# TYPE relays_resolved_total counter
relays_resolved_total {}

# HELP relays_failed_total Relay events parked as permanently failed
# TYPE relays_failed_total counter
relays_failed_total {}

# HELP cron_runs_total Cron job executions
# TYPE cron_runs_total counter
cron_runs_total {}

# HELP errors_total Total number of errors encountered
# TYPE errors_total counter
errors_total {}
"#,
        feed_items, fetched, webhooks, skipped, rejected, enqueued, resolved, failed, crons,
        errors,
    )
}

#[handler]
pub async fn metrics_endpoint(res: &mut Response) {
    res.headers_mut()
        .insert("Content-Type", "text/plain; charset=utf-8".parse().unwrap());
    res.body(format_prometheus());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_increments_counters() {
        Metrics::feed_item_created();
        Metrics::webhook_received();
        Metrics::relay_enqueued();
        Metrics::relay_resolved();
        Metrics::cron_run();

        assert!(FEED_ITEMS_CREATED.load(Ordering::Relaxed) >= 1);
        assert!(WEBHOOKS_RECEIVED.load(Ordering::Relaxed) >= 1);
        assert!(RELAYS_ENQUEUED.load(Ordering::Relaxed) >= 1);
        assert!(RELAYS_RESOLVED.load(Ordering::Relaxed) >= 1);
        assert!(CRON_RUNS.load(Ordering::Relaxed) >= 1);
    }

    #[test]
    fn format_prometheus_includes_all_metrics() {
        let output = format_prometheus();
        assert!(output.contains("feed_items_created_total"));
        assert!(output.contains("webhooks_received_total"));
        assert!(output.contains("relays_enqueued_total"));
        assert!(output.contains("relays_resolved_total"));
        assert!(output.contains("relays_failed_total"));
        assert!(output.contains("cron_runs_total"));
        assert!(output.contains("errors_total"));
    }
}
