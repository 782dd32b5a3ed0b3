use std::fmt;

use chrono::{NaiveDate, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::engine::EngineError;

/// Unix milliseconds. The only timestamp type.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;

/// Current wall-clock time in unix milliseconds.
pub fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or_default()
}

/// Drop sub-second precision so every stored time-of-day reads as `HH:MM:SS`.
pub fn normalize_time(t: NaiveTime) -> NaiveTime {
    t.with_nanosecond(0).unwrap_or(t)
}

/// Parse a business-local time of day, `HH:MM` or `HH:MM:SS`.
pub fn parse_time(s: &str) -> Option<NaiveTime> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .ok()
        .map(normalize_time)
}

/// Half-open window `[start, end)` on a business's local clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        debug_assert!(start < end, "window start must be before end");
        Self {
            start: normalize_time(start),
            end: normalize_time(end),
        }
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start.format("%H:%M:%S"), self.end.format("%H:%M:%S"))
    }
}

/// A business's operating hours and slot size. Doubles as the template cache key.
///
/// Overnight windows (closing before opening) are not supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HoursConfig {
    pub opening: NaiveTime,
    pub closing: NaiveTime,
    pub slot_minutes: u32,
}

impl HoursConfig {
    pub fn new(opening: NaiveTime, closing: NaiveTime, slot_minutes: u32) -> Self {
        Self {
            opening: normalize_time(opening),
            closing: normalize_time(closing),
            slot_minutes,
        }
    }

    /// Build a validated config from the strings a business profile carries.
    pub fn parse(opening: &str, closing: &str, slot_minutes: u32) -> Result<Self, EngineError> {
        let open = parse_time(opening)
            .ok_or_else(|| EngineError::InvalidConfig(format!("unparseable opening time {opening:?}")))?;
        let close = parse_time(closing)
            .ok_or_else(|| EngineError::InvalidConfig(format!("unparseable closing time {closing:?}")))?;
        let config = Self::new(open, close, slot_minutes);
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.slot_minutes == 0 {
            return Err(EngineError::InvalidConfig("slot duration must be positive".into()));
        }
        if self.opening >= self.closing {
            return Err(EngineError::InvalidConfig(format!(
                "opening {} must be before closing {}",
                self.opening, self.closing
            )));
        }
        if self.window_count() == 0 {
            return Err(EngineError::InvalidConfig(format!(
                "{}-minute slots do not fit between {} and {}",
                self.slot_minutes, self.opening, self.closing
            )));
        }
        Ok(())
    }

    /// Number of full windows between opening and closing.
    pub fn window_count(&self) -> usize {
        if self.slot_minutes == 0 || self.opening >= self.closing {
            return 0;
        }
        let open_secs = (self.closing - self.opening).num_seconds();
        (open_secs / (i64::from(self.slot_minutes) * 60)) as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SlotStatus {
    Available,
    Reserved,
    Booked,
}

impl fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SlotStatus::Available => "available",
            SlotStatus::Reserved => "reserved",
            SlotStatus::Booked => "booked",
        })
    }
}

/// One stored slot row. `reserved_until` is set exactly when `status` is `Reserved`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    pub id: Ulid,
    pub window: TimeWindow,
    pub status: SlotStatus,
    pub reserved_until: Option<Ms>,
    pub created_at: Ms,
}

impl Slot {
    pub fn available(id: Ulid, window: TimeWindow, created_at: Ms) -> Self {
        Self {
            id,
            window,
            status: SlotStatus::Available,
            reserved_until: None,
            created_at,
        }
    }

    /// Reserved, but the reservation lapsed strictly before `now`.
    ///
    /// Read paths treat such a row as available; sweeps and `reserve` reclaim it.
    pub fn hold_expired(&self, now: Ms) -> bool {
        self.status == SlotStatus::Reserved && self.reserved_until.is_some_and(|until| until < now)
    }

    pub fn is_occupied(&self, now: Ms) -> bool {
        match self.status {
            SlotStatus::Available => false,
            SlotStatus::Booked => true,
            SlotStatus::Reserved => !self.hold_expired(now),
        }
    }

    pub fn effective_status(&self, now: Ms) -> SlotStatus {
        if self.hold_expired(now) {
            SlotStatus::Available
        } else {
            self.status
        }
    }
}

/// Partition key for slot rows: one business on one local calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DayKey {
    pub business_id: Ulid,
    pub date: NaiveDate,
}

impl DayKey {
    pub fn new(business_id: Ulid, date: NaiveDate) -> Self {
        Self { business_id, date }
    }
}

impl fmt::Display for DayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.business_id, self.date)
    }
}

#[derive(Debug, Clone)]
pub struct DaySlots {
    pub key: DayKey,
    /// Sorted by window; at most one row per window.
    pub slots: Vec<Slot>,
}

impl DaySlots {
    pub fn new(key: DayKey) -> Self {
        Self {
            key,
            slots: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn contains_window(&self, window: &TimeWindow) -> bool {
        self.slots.binary_search_by(|s| s.window.cmp(window)).is_ok()
    }

    /// Insert keeping window order. Returns false (and drops the row) if the window already exists.
    pub fn insert_slot(&mut self, slot: Slot) -> bool {
        match self.slots.binary_search_by(|s| s.window.cmp(&slot.window)) {
            Ok(_) => false,
            Err(pos) => {
                self.slots.insert(pos, slot);
                true
            }
        }
    }

    pub fn get(&self, id: &Ulid) -> Option<&Slot> {
        self.slots.iter().find(|s| s.id == *id)
    }

    pub fn get_mut(&mut self, id: &Ulid) -> Option<&mut Slot> {
        self.slots.iter_mut().find(|s| s.id == *id)
    }
}

/// WAL record format. Every durable change to slot state is one of these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    SlotsGenerated {
        business_id: Ulid,
        date: NaiveDate,
        created_at: Ms,
        slots: Vec<(Ulid, TimeWindow)>,
    },
    SlotReserved {
        id: Ulid,
        business_id: Ulid,
        reserved_until: Ms,
    },
    SlotBooked {
        id: Ulid,
        business_id: Ulid,
    },
    SlotReleased {
        id: Ulid,
        business_id: Ulid,
    },
    BookingReleased {
        id: Ulid,
        business_id: Ulid,
    },
    ReservationExpired {
        id: Ulid,
        business_id: Ulid,
    },
}

impl Event {
    pub fn business_id(&self) -> Ulid {
        match self {
            Event::SlotsGenerated { business_id, .. }
            | Event::SlotReserved { business_id, .. }
            | Event::SlotBooked { business_id, .. }
            | Event::SlotReleased { business_id, .. }
            | Event::BookingReleased { business_id, .. }
            | Event::ReservationExpired { business_id, .. } => *business_id,
        }
    }

    /// Slot touched by a transition event; `None` for generation.
    pub fn slot_id(&self) -> Option<Ulid> {
        match self {
            Event::SlotsGenerated { .. } => None,
            Event::SlotReserved { id, .. }
            | Event::SlotBooked { id, .. }
            | Event::SlotReleased { id, .. }
            | Event::BookingReleased { id, .. }
            | Event::ReservationExpired { id, .. } => Some(*id),
        }
    }
}

// ── Query result types ───────────────────────────────────────────

/// Caller-facing view of a slot, with lazy expiry applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotInfo {
    pub id: Ulid,
    pub business_id: Ulid,
    pub date: NaiveDate,
    pub window: TimeWindow,
    pub status: SlotStatus,
    pub reserved_until: Option<Ms>,
    pub created_at: Ms,
}

impl SlotInfo {
    pub fn from_slot(key: &DayKey, slot: &Slot, now: Ms) -> Self {
        let status = slot.effective_status(now);
        Self {
            id: slot.id,
            business_id: key.business_id,
            date: key.date,
            window: slot.window,
            status,
            reserved_until: if status == SlotStatus::Reserved {
                slot.reserved_until
            } else {
                None
            },
            created_at: slot.created_at,
        }
    }
}

/// A bookable window together with the slot id a caller holds it by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OpenSlot {
    pub id: Ulid,
    pub window: TimeWindow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerateRequest {
    pub business_id: Ulid,
    pub date: NaiveDate,
    pub config: HoursConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerateOutcome {
    /// This call inserted `n` rows.
    Created(usize),
    /// Rows already existed (or a concurrent caller inserted them).
    AlreadyPresent,
}
