use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::{RwLock, oneshot};
use tracing::debug;
use ulid::Ulid;

use crate::limits::MAX_SWEEP_LIMIT;
use crate::model::*;

use super::transition::{Transition, validate_range};
use super::{Engine, EngineError, SharedDay, WalCommand};

impl Engine {
    /// Run one conditional transition against a slot under its day's write lock.
    ///
    /// Exactly one of any set of racing callers can observe the prior state the
    /// transition needs; the rest get `Contention` with the state they lost to.
    pub(super) async fn apply_transition(
        &self,
        slot_id: Ulid,
        business_id: Ulid,
        transition: Transition,
        now: Ms,
    ) -> Result<SlotInfo, EngineError> {
        let _gate = self.compaction_gate.read().await;
        let mut guard = self.resolve_slot_write(slot_id, business_id).await?;
        let slot = guard.get(&slot_id).ok_or(EngineError::NotFound(slot_id))?;
        if !transition.permits(slot, now) {
            return Err(EngineError::Contention {
                slot_id,
                status: slot.effective_status(now),
            });
        }

        let event = transition.event(slot_id, business_id);
        self.persist_and_apply(&mut guard, &event).await?;

        let key = guard.key;
        let slot = guard.get(&slot_id).ok_or(EngineError::NotFound(slot_id))?;
        debug!(%slot_id, day = %key, op = transition.label(), "slot transition applied");
        Ok(SlotInfo::from_slot(&key, slot, now))
    }

    /// Reserve until `reserved_until`. Succeeds from available, or from a
    /// reservation that has already lapsed, reclaiming it in the same step.
    pub async fn reserve(
        &self,
        slot_id: Ulid,
        business_id: Ulid,
        reserved_until: Ms,
    ) -> Result<SlotInfo, EngineError> {
        let transition = Transition::Reserve {
            until: reserved_until,
        };
        self.apply_transition(slot_id, business_id, transition, now_ms())
            .await
    }

    pub async fn confirm_booking(
        &self,
        slot_id: Ulid,
        business_id: Ulid,
    ) -> Result<SlotInfo, EngineError> {
        self.apply_transition(slot_id, business_id, Transition::Confirm, now_ms())
            .await
    }

    pub async fn release(&self, slot_id: Ulid, business_id: Ulid) -> Result<SlotInfo, EngineError> {
        self.apply_transition(slot_id, business_id, Transition::Release, now_ms())
            .await
    }

    pub async fn release_from_booked(
        &self,
        slot_id: Ulid,
        business_id: Ulid,
    ) -> Result<SlotInfo, EngineError> {
        self.apply_transition(slot_id, business_id, Transition::ReleaseBooked, now_ms())
            .await
    }

    /// Booked windows plus reservations still live at `now`. Lapsed
    /// reservations are left out without being rewritten.
    pub async fn occupied_intervals(
        &self,
        business_id: Ulid,
        date: NaiveDate,
        now: Ms,
    ) -> Vec<TimeWindow> {
        let Some(day) = self.get_day(&DayKey::new(business_id, date)) else {
            return Vec::new();
        };
        let guard = day.read().await;
        guard
            .slots
            .iter()
            .filter(|s| s.is_occupied(now))
            .map(|s| s.window)
            .collect()
    }

    /// Rewrite lapsed reservations on one day back to available.
    pub async fn sweep_expired(
        &self,
        business_id: Ulid,
        date: NaiveDate,
        now: Ms,
    ) -> Result<usize, EngineError> {
        metrics::counter!(crate::observability::SWEEP_RUNS_TOTAL, "scope" => "day").increment(1);
        let Some(day) = self.get_day(&DayKey::new(business_id, date)) else {
            return Ok(0);
        };
        let _gate = self.compaction_gate.read().await;
        let mut guard = day.write().await;
        let expired: Vec<Ulid> = guard
            .slots
            .iter()
            .filter(|s| Transition::Expire.permits(s, now))
            .map(|s| s.id)
            .collect();
        for id in &expired {
            let event = Transition::Expire.event(*id, business_id);
            self.persist_and_apply(&mut guard, &event).await?;
        }
        if !expired.is_empty() {
            metrics::counter!(crate::observability::RESERVATIONS_EXPIRED_TOTAL)
                .increment(expired.len() as u64);
            debug!(day = %guard.key, count = expired.len(), "reclaimed lapsed reservations");
        }
        Ok(expired.len())
    }

    /// Rewrite up to `limit` lapsed reservations across all businesses.
    pub async fn sweep_expired_batch(&self, limit: usize, now: Ms) -> Result<usize, EngineError> {
        if limit > MAX_SWEEP_LIMIT {
            return Err(EngineError::LimitExceeded("sweep limit too large"));
        }
        metrics::counter!(crate::observability::SWEEP_RUNS_TOTAL, "scope" => "batch").increment(1);
        if limit == 0 {
            return Ok(0);
        }

        let days: Vec<SharedDay> = self.days.iter().map(|e| e.value().clone()).collect();
        let mut candidates: Vec<(SharedDay, Vec<Ulid>)> = Vec::new();
        let mut found = 0usize;
        for day in days {
            if found >= limit {
                break;
            }
            let ids: Vec<Ulid> = {
                let guard = day.read().await;
                guard
                    .slots
                    .iter()
                    .filter(|s| s.hold_expired(now))
                    .map(|s| s.id)
                    .take(limit - found)
                    .collect()
            };
            if !ids.is_empty() {
                found += ids.len();
                candidates.push((day, ids));
            }
        }

        let _gate = self.compaction_gate.read().await;
        let mut reclaimed = 0usize;
        for (day, ids) in candidates {
            let mut guard = day.write().await;
            let business_id = guard.key.business_id;
            for id in ids {
                // Re-check under the write lock; a reserve may have reclaimed it meanwhile.
                let still_expired = guard
                    .get(&id)
                    .is_some_and(|s| Transition::Expire.permits(s, now));
                if !still_expired {
                    continue;
                }
                let event = Transition::Expire.event(id, business_id);
                self.persist_and_apply(&mut guard, &event).await?;
                reclaimed += 1;
            }
        }

        if reclaimed > 0 {
            metrics::counter!(crate::observability::RESERVATIONS_EXPIRED_TOTAL)
                .increment(reclaimed as u64);
        }
        Ok(reclaimed)
    }

    /// Effective view of one slot, scoped to its owning business.
    pub async fn get_slot(&self, slot_id: Ulid, business_id: Ulid) -> Result<SlotInfo, EngineError> {
        let key = self
            .slot_index
            .get(&slot_id)
            .map(|e| *e.value())
            .filter(|key| key.business_id == business_id)
            .ok_or(EngineError::NotFound(slot_id))?;
        let day = self.get_day(&key).ok_or(EngineError::NotFound(slot_id))?;
        let guard = day.read().await;
        let slot = guard.get(&slot_id).ok_or(EngineError::NotFound(slot_id))?;
        Ok(SlotInfo::from_slot(&key, slot, now_ms()))
    }

    /// All generated slots for a business over `[from, to]`, ordered by date then window.
    pub async fn slots_in_range(
        &self,
        business_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<SlotInfo>, EngineError> {
        validate_range(from, to)?;
        let now = now_ms();
        let mut out = Vec::new();
        for date in from.iter_days().take_while(|d| *d <= to) {
            let key = DayKey::new(business_id, date);
            if let Some(day) = self.get_day(&key) {
                let guard = day.read().await;
                out.extend(guard.slots.iter().map(|s| SlotInfo::from_slot(&key, s, now)));
            }
        }
        Ok(out)
    }

    /// Existence probe: has any row been generated for this day?
    pub async fn day_exists(&self, business_id: Ulid, date: NaiveDate) -> bool {
        match self.get_day(&DayKey::new(business_id, date)) {
            Some(day) => !day.read().await.is_empty(),
            None => false,
        }
    }

    /// Window → slot id for a day's rows.
    pub(super) async fn slot_ids(&self, key: &DayKey) -> HashMap<TimeWindow, Ulid> {
        let Some(day) = self.get_day(key) else {
            return HashMap::new();
        };
        let guard = day.read().await;
        guard.slots.iter().map(|s| (s.window, s.id)).collect()
    }

    /// Insert available rows for every window not already present. Windows that
    /// exist are skipped, so a repeated insert is a no-op returning 0.
    pub(super) async fn insert_generated(
        &self,
        key: DayKey,
        windows: &[TimeWindow],
        created_at: Ms,
    ) -> Result<usize, EngineError> {
        let _gate = self.compaction_gate.read().await;
        let day = self
            .days
            .entry(key)
            .or_insert_with(|| Arc::new(RwLock::new(DaySlots::new(key))))
            .clone();
        let mut guard = day.write().await;

        let slots: Vec<(Ulid, TimeWindow)> = windows
            .iter()
            .filter(|w| !guard.contains_window(w))
            .map(|w| (Ulid::new(), *w))
            .collect();
        if slots.is_empty() {
            return Ok(0);
        }

        let count = slots.len();
        let event = Event::SlotsGenerated {
            business_id: key.business_id,
            date: key.date,
            created_at,
            slots,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(count)
    }

    /// Rewrite the WAL as the minimal event set that recreates current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _exclusive = self.compaction_gate.write().await;
        let days: Vec<SharedDay> = self.days.iter().map(|e| e.value().clone()).collect();
        let mut events = Vec::new();

        for day in days {
            let guard = day.read().await;
            if guard.is_empty() {
                continue;
            }
            let key = guard.key;

            let mut batches: BTreeMap<Ms, Vec<(Ulid, TimeWindow)>> = BTreeMap::new();
            for slot in &guard.slots {
                batches
                    .entry(slot.created_at)
                    .or_default()
                    .push((slot.id, slot.window));
            }
            for (created_at, slots) in batches {
                events.push(Event::SlotsGenerated {
                    business_id: key.business_id,
                    date: key.date,
                    created_at,
                    slots,
                });
            }

            for slot in &guard.slots {
                match (slot.status, slot.reserved_until) {
                    (SlotStatus::Reserved, Some(until)) => events.push(Event::SlotReserved {
                        id: slot.id,
                        business_id: key.business_id,
                        reserved_until: until,
                    }),
                    (SlotStatus::Booked, _) => events.push(Event::SlotBooked {
                        id: slot.id,
                        business_id: key.business_id,
                    }),
                    _ => {}
                }
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Infrastructure("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Infrastructure("WAL writer dropped response".into()))??;
        metrics::counter!(crate::observability::WAL_COMPACTIONS_TOTAL).increment(1);
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
