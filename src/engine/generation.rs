use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use futures::future::join_all;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::limits::{GENERATION_ATTEMPTS, MAX_BATCH_SIZE};
use crate::model::*;

use super::{Engine, EngineError};

/// Per-key result of a batch run. One failing key never fails the others.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateReport {
    pub request: GenerateRequest,
    pub result: Result<GenerateOutcome, EngineError>,
}

impl Engine {
    /// Make sure slot rows exist for (business, date), inserting them at most once.
    ///
    /// Concurrent callers for the same key queue behind one gate: the first
    /// inserts, the rest re-probe and find the rows present. The store's
    /// duplicate-skipping insert backs this up across processes.
    pub async fn ensure_generated(
        &self,
        business_id: Ulid,
        date: NaiveDate,
        config: &HoursConfig,
    ) -> Result<GenerateOutcome, EngineError> {
        config.validate()?;
        if self.day_exists(business_id, date).await {
            return Ok(GenerateOutcome::AlreadyPresent);
        }

        let key = DayKey::new(business_id, date);
        let gate = self.inflight.entry(key).or_default().clone();
        let outcome = {
            let _turn = match gate.try_lock() {
                Ok(turn) => turn,
                Err(_) => {
                    metrics::counter!(crate::observability::GENERATION_COALESCED_TOTAL)
                        .increment(1);
                    debug!(day = %key, "waiting on in-flight generation");
                    gate.lock().await
                }
            };
            self.generate_locked(key, config).await
        };
        // Last one out clears the gate. Clones are taken under the shard lock,
        // so a count of one means nobody is queued.
        drop(gate);
        self.inflight
            .remove_if(&key, |_, g| Arc::strong_count(g) == 1);
        outcome
    }

    async fn generate_locked(
        &self,
        key: DayKey,
        config: &HoursConfig,
    ) -> Result<GenerateOutcome, EngineError> {
        if self.day_exists(key.business_id, key.date).await {
            return Ok(GenerateOutcome::AlreadyPresent);
        }
        let template = self.templates.get(config);
        let created = self.insert_generated(key, &template, now_ms()).await?;
        if created == 0 {
            return Ok(GenerateOutcome::AlreadyPresent);
        }
        metrics::counter!(crate::observability::SLOTS_GENERATED_TOTAL).increment(created as u64);
        debug!(day = %key, created, "slots generated");
        Ok(GenerateOutcome::Created(created))
    }

    /// Read-side generation. Idempotent, so store outages are retried a few times.
    pub(super) async fn ensure_generated_with_retry(
        &self,
        business_id: Ulid,
        date: NaiveDate,
        config: &HoursConfig,
    ) -> Result<GenerateOutcome, EngineError> {
        let mut attempt = 1;
        loop {
            match self.ensure_generated(business_id, date, config).await {
                Err(e) if e.is_retryable() && attempt < GENERATION_ATTEMPTS => {
                    warn!(%business_id, %date, attempt, "generation failed, retrying: {e}");
                    tokio::time::sleep(Duration::from_millis(20 * u64::from(attempt))).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Generate many (business, date) keys. Requests sharing an hours config
    /// are grouped so each template is computed once; every key runs
    /// concurrently. Reports come back in request order.
    pub async fn batch_generate(
        &self,
        requests: Vec<GenerateRequest>,
    ) -> Result<Vec<GenerateReport>, EngineError> {
        if requests.len() > MAX_BATCH_SIZE {
            return Err(EngineError::LimitExceeded("batch too large"));
        }
        let total = requests.len();

        let mut groups: HashMap<HoursConfig, Vec<(usize, GenerateRequest)>> = HashMap::new();
        for (idx, req) in requests.into_iter().enumerate() {
            groups.entry(req.config).or_default().push((idx, req));
        }
        let group_count = groups.len();

        let runs = groups.into_iter().map(|(config, members)| async move {
            if config.validate().is_ok() {
                self.templates.get(&config);
            }
            join_all(members.into_iter().map(|(idx, request)| async move {
                let result = self
                    .ensure_generated(request.business_id, request.date, &request.config)
                    .await;
                if let Err(e) = &result {
                    metrics::counter!(crate::observability::GENERATION_FAILURES_TOTAL).increment(1);
                    warn!(
                        business_id = %request.business_id,
                        date = %request.date,
                        "generation failed: {e}"
                    );
                }
                (idx, GenerateReport { request, result })
            }))
            .await
        });

        let mut reports: Vec<(usize, GenerateReport)> =
            join_all(runs).await.into_iter().flatten().collect();
        reports.sort_by_key(|(idx, _)| *idx);

        let created: usize = reports
            .iter()
            .filter_map(|(_, r)| match r.result {
                Ok(GenerateOutcome::Created(n)) => Some(n),
                _ => None,
            })
            .sum();
        info!(requests = total, groups = group_count, created, "batch generation finished");

        Ok(reports.into_iter().map(|(_, r)| r).collect())
    }
}
