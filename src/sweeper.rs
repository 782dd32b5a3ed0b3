use std::sync::Arc;
use std::time::Duration;

use chrono::{Days, Local, NaiveDate};
use tracing::{debug, error, info, warn};

use crate::directory::{BusinessDirectory, BusinessHours};
use crate::engine::{Engine, EngineError, GenerateReport};
use crate::limits::MAX_BATCH_SIZE;
use crate::model::{GenerateRequest, now_ms};

/// Periodically rewrite lapsed reservations, at most `limit` per run.
pub async fn run_sweeper(engine: Arc<Engine>, every: Duration, limit: usize) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        match engine.sweep_expired_batch(limit, now_ms()).await {
            Ok(0) => {}
            Ok(n) => info!(reclaimed = n, "swept expired reservations"),
            Err(e) => error!("expiry sweep failed: {e}"),
        }
    }
}

/// Compact the WAL once enough appends have piled up since the last rewrite.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!(appends, "WAL compacted"),
            Err(e) => error!("WAL compaction failed: {e}"),
        }
    }
}

/// Build generation requests for every business over `days` days from `start`.
pub fn horizon_requests(
    businesses: &[BusinessHours],
    start: NaiveDate,
    days: u32,
) -> Vec<GenerateRequest> {
    let mut requests = Vec::with_capacity(businesses.len() * days as usize);
    for offset in 0..days {
        let Some(date) = start.checked_add_days(Days::new(u64::from(offset))) else {
            break;
        };
        requests.extend(businesses.iter().map(|b| GenerateRequest {
            business_id: b.business_id,
            date,
            config: b.config,
        }));
    }
    requests
}

/// One pre-generation pass: materialize `days` days from `start` for every listed business.
pub async fn pregenerate(
    engine: &Engine,
    directory: &dyn BusinessDirectory,
    start: NaiveDate,
    days: u32,
) -> Result<Vec<GenerateReport>, EngineError> {
    let businesses = directory.businesses().await?;
    let requests = horizon_requests(&businesses, start, days);
    debug!(businesses = businesses.len(), requests = requests.len(), "pre-generating");

    let mut reports = Vec::with_capacity(requests.len());
    for chunk in requests.chunks(MAX_BATCH_SIZE) {
        reports.extend(engine.batch_generate(chunk.to_vec()).await?);
    }
    let failed = reports.iter().filter(|r| r.result.is_err()).count();
    if failed > 0 {
        warn!(failed, total = reports.len(), "some days failed to pre-generate");
    }
    Ok(reports)
}

/// Periodically pre-generate the next `days` days, starting from the local date.
pub async fn run_pregenerator(
    engine: Arc<Engine>,
    directory: Arc<dyn BusinessDirectory>,
    days: u32,
    every: Duration,
) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let today = Local::now().date_naive();
        if let Err(e) = pregenerate(&engine, directory.as_ref(), today, days).await {
            error!("pre-generation failed: {e}");
        }
    }
}
