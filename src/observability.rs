use std::net::SocketAddr;

use tracing_subscriber::EnvFilter;

// ── Slot operations ─────────────────────────────────────────────

/// Counter: conditional slot transitions. Labels: op, outcome.
pub const SLOT_OPS_TOTAL: &str = "slotkeep_slot_ops_total";

/// Counter: slot rows inserted by generation.
pub const SLOTS_GENERATED_TOTAL: &str = "slotkeep_slots_generated_total";

/// Counter: generation callers that waited on another caller for the same day.
pub const GENERATION_COALESCED_TOTAL: &str = "slotkeep_generation_coalesced_total";

/// Counter: per-key generation failures in batch runs.
pub const GENERATION_FAILURES_TOTAL: &str = "slotkeep_generation_failures_total";

// ── Template cache ──────────────────────────────────────────────

pub const TEMPLATE_CACHE_HITS_TOTAL: &str = "slotkeep_template_cache_hits_total";
pub const TEMPLATE_CACHE_MISSES_TOTAL: &str = "slotkeep_template_cache_misses_total";
pub const TEMPLATE_CACHE_EVICTIONS_TOTAL: &str = "slotkeep_template_cache_evictions_total";
/// Gauge: distinct hours configurations currently cached.
pub const TEMPLATE_CACHE_ENTRIES: &str = "slotkeep_template_cache_entries";

// ── Expiry ──────────────────────────────────────────────────────

/// Counter: sweep invocations. Labels: scope (day, batch).
pub const SWEEP_RUNS_TOTAL: &str = "slotkeep_sweep_runs_total";

/// Counter: expired reservations rewritten to available.
pub const RESERVATIONS_EXPIRED_TOTAL: &str = "slotkeep_reservations_expired_total";

// ── WAL ─────────────────────────────────────────────────────────

/// Histogram: group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "slotkeep_wal_flush_duration_seconds";

/// Histogram: events per group-commit flush.
pub const WAL_FLUSH_BATCH_SIZE: &str = "slotkeep_wal_flush_batch_size";

pub const WAL_COMPACTIONS_TOTAL: &str = "slotkeep_wal_compactions_total";

/// Install the global tracing subscriber. `RUST_LOG` wins; defaults to `info`.
pub fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init_metrics(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
