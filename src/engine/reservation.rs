use std::time::Duration;

use tracing::debug;
use ulid::Ulid;

use crate::model::*;

use super::transition::{Transition, validate_ttl};
use super::{Engine, EngineError};

fn record_outcome(op: &'static str, result: &Result<SlotInfo, EngineError>) {
    let outcome = match result {
        Ok(_) => "ok",
        Err(e) => {
            debug!(op, kind = e.kind().label(), "slot operation refused: {e}");
            e.kind().label()
        }
    };
    metrics::counter!(crate::observability::SLOT_OPS_TOTAL, "op" => op, "outcome" => outcome)
        .increment(1);
}

impl Engine {
    /// Hold a slot for `ttl`. On contention the caller should re-read
    /// availability, not retry this slot.
    pub async fn hold_slot(
        &self,
        slot_id: Ulid,
        business_id: Ulid,
        ttl: Duration,
    ) -> Result<SlotInfo, EngineError> {
        let ttl_ms = validate_ttl(ttl)?;
        let now = now_ms();
        let result = self
            .apply_transition(
                slot_id,
                business_id,
                Transition::Reserve {
                    until: now + ttl_ms,
                },
                now,
            )
            .await;
        record_outcome("hold", &result);
        let info = result?;

        // Opportunistic tidy of the same day while we're writing to it.
        match self.sweep_expired(business_id, info.date, now).await {
            Ok(0) => {}
            Ok(n) => debug!(%business_id, date = %info.date, reclaimed = n, "swept after hold"),
            Err(e) => debug!(%business_id, date = %info.date, "post-hold sweep skipped: {e}"),
        }
        Ok(info)
    }

    /// Held → booked, when the business accepts.
    pub async fn confirm(&self, slot_id: Ulid, business_id: Ulid) -> Result<SlotInfo, EngineError> {
        let result = self.confirm_booking(slot_id, business_id).await;
        record_outcome("confirm", &result);
        result
    }

    /// Held → available, for a rejected or withdrawn pending booking.
    pub async fn cancel_held(
        &self,
        slot_id: Ulid,
        business_id: Ulid,
    ) -> Result<SlotInfo, EngineError> {
        let result = self.release(slot_id, business_id).await;
        record_outcome("cancel_held", &result);
        result
    }

    /// Booked → available, for a confirmed booking that is later cancelled.
    pub async fn cancel_booked(
        &self,
        slot_id: Ulid,
        business_id: Ulid,
    ) -> Result<SlotInfo, EngineError> {
        let result = self.release_from_booked(slot_id, business_id).await;
        record_outcome("cancel_booked", &result);
        result
    }
}
