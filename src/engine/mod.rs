mod availability;
mod error;
mod generation;
mod reservation;
mod store;
mod template;
mod transition;

pub use availability::subtract_occupied;
pub use error::{EngineError, ErrorKind};
pub use generation::GenerateReport;
pub use template::{CacheStats, Template, TemplateCache, build_template};
pub use transition::Transition;

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedRwLockWriteGuard, RwLock, mpsc, oneshot};
use tracing::{info, warn};
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedDay = Arc<RwLock<DaySlots>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Owns the WAL. Blocks for the first append, drains whatever else is already
/// queued, then commits the whole batch with one fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                commit_batch(&mut wal, &mut batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();

    let mut result = Ok(());
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            result = Err(e);
            break;
        }
    }
    // Flush even after an append error so half-buffered bytes don't leak into the next batch.
    let flushed = wal.flush_sync();
    if result.is_ok() {
        result = flushed;
    }

    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());

    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the caller"),
    }
}

/// The slot engine: durable slot state plus the coordinators built on it.
pub struct Engine {
    pub(super) days: DashMap<DayKey, SharedDay>,
    /// Reverse lookup: slot id → owning (business, date).
    pub(super) slot_index: DashMap<Ulid, DayKey>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub(super) templates: Arc<TemplateCache>,
    /// Single-flight gates for generation, keyed by (business, date).
    pub(super) inflight: DashMap<DayKey, Arc<Mutex<()>>>,
    /// Writers hold this shared, taken before any day lock; compaction holds it
    /// exclusively so its snapshot cannot miss an append.
    pub(super) compaction_gate: RwLock<()>,
}

/// Apply an event to one day's rows. Caller holds the day's write lock.
fn apply_to_day(day: &mut DaySlots, event: &Event, index: &DashMap<Ulid, DayKey>) {
    let set = |day: &mut DaySlots, id: &Ulid, status: SlotStatus, until: Option<Ms>| {
        if let Some(slot) = day.get_mut(id) {
            slot.status = status;
            slot.reserved_until = until;
        }
    };
    match event {
        Event::SlotsGenerated {
            created_at, slots, ..
        } => {
            for (id, window) in slots {
                if day.insert_slot(Slot::available(*id, *window, *created_at)) {
                    index.insert(*id, day.key);
                }
            }
        }
        Event::SlotReserved {
            id, reserved_until, ..
        } => set(day, id, SlotStatus::Reserved, Some(*reserved_until)),
        Event::SlotBooked { id, .. } => set(day, id, SlotStatus::Booked, None),
        Event::SlotReleased { id, .. }
        | Event::BookingReleased { id, .. }
        | Event::ReservationExpired { id, .. } => set(day, id, SlotStatus::Available, None),
    }
}

impl Engine {
    /// Replay the WAL at `wal_path`, dropping any torn tail, and start the
    /// group-commit writer.
    /// Must be called inside a tokio runtime.
    pub fn new(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        templates: Arc<TemplateCache>,
    ) -> io::Result<Self> {
        let events = Wal::recover(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        // Rebuild without locks; nothing else can see these rows yet.
        let slot_index = DashMap::new();
        let mut rebuilt: HashMap<DayKey, DaySlots> = HashMap::new();
        let mut orphans = 0usize;
        for event in &events {
            let key = match event {
                Event::SlotsGenerated {
                    business_id, date, ..
                } => DayKey::new(*business_id, *date),
                other => match other.slot_id().and_then(|id| slot_index.get(&id).map(|k| *k)) {
                    Some(key) => key,
                    None => {
                        orphans += 1;
                        continue;
                    }
                },
            };
            let day = rebuilt.entry(key).or_insert_with(|| DaySlots::new(key));
            apply_to_day(day, event, &slot_index);
        }
        if orphans > 0 {
            warn!(orphans, "ignored WAL events for unknown slots");
        }

        let days = DashMap::new();
        for (key, day) in rebuilt {
            days.insert(key, Arc::new(RwLock::new(day)));
        }
        info!(
            days = days.len(),
            slots = slot_index.len(),
            events = events.len(),
            "slot state replayed from {}",
            wal_path.display()
        );

        Ok(Self {
            days,
            slot_index,
            wal_tx,
            notify,
            templates,
            inflight: DashMap::new(),
            compaction_gate: RwLock::new(()),
        })
    }

    pub fn templates(&self) -> &TemplateCache {
        &self.templates
    }

    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Infrastructure("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Infrastructure("WAL writer dropped response".into()))?
            .map_err(EngineError::from)
    }

    /// Durably record, then apply and publish. Nothing changes if the append fails.
    pub(super) async fn persist_and_apply(
        &self,
        day: &mut DaySlots,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_day(day, event, &self.slot_index);
        self.notify.send(event);
        Ok(())
    }

    pub(super) fn get_day(&self, key: &DayKey) -> Option<SharedDay> {
        self.days.get(key).map(|e| e.value().clone())
    }

    /// Resolve a slot to its day and write-lock it. A slot owned by another
    /// business is reported as not found.
    pub(super) async fn resolve_slot_write(
        &self,
        slot_id: Ulid,
        business_id: Ulid,
    ) -> Result<OwnedRwLockWriteGuard<DaySlots>, EngineError> {
        let key = self
            .slot_index
            .get(&slot_id)
            .map(|e| *e.value())
            .filter(|key| key.business_id == business_id)
            .ok_or(EngineError::NotFound(slot_id))?;
        let day = self.get_day(&key).ok_or(EngineError::NotFound(slot_id))?;
        Ok(day.write_owned().await)
    }
}
