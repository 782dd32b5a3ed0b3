use std::time::Duration;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::{MAX_HOLD_TTL_MS, MAX_RANGE_DAYS};
use crate::model::*;

use super::EngineError;

/// A conditional slot write: which prior states it accepts, and what it records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// available, or reserved-and-lapsed → reserved until `until`.
    Reserve { until: Ms },
    /// live reservation → booked.
    Confirm,
    /// live reservation → available.
    Release,
    /// booked → available.
    ReleaseBooked,
    /// reserved-and-lapsed → available.
    Expire,
}

impl Transition {
    /// The `status in {...}` half of "update where id = X and status in {...}".
    pub fn permits(&self, slot: &Slot, now: Ms) -> bool {
        match self {
            Transition::Reserve { .. } => {
                slot.status == SlotStatus::Available || slot.hold_expired(now)
            }
            Transition::Confirm | Transition::Release => {
                slot.status == SlotStatus::Reserved && !slot.hold_expired(now)
            }
            Transition::ReleaseBooked => slot.status == SlotStatus::Booked,
            Transition::Expire => slot.hold_expired(now),
        }
    }

    pub fn event(&self, id: Ulid, business_id: Ulid) -> Event {
        match *self {
            Transition::Reserve { until } => Event::SlotReserved {
                id,
                business_id,
                reserved_until: until,
            },
            Transition::Confirm => Event::SlotBooked { id, business_id },
            Transition::Release => Event::SlotReleased { id, business_id },
            Transition::ReleaseBooked => Event::BookingReleased { id, business_id },
            Transition::Expire => Event::ReservationExpired { id, business_id },
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Transition::Reserve { .. } => "reserve",
            Transition::Confirm => "confirm",
            Transition::Release => "release",
            Transition::ReleaseBooked => "release_booked",
            Transition::Expire => "expire",
        }
    }
}

pub(crate) fn validate_ttl(ttl: Duration) -> Result<Ms, EngineError> {
    let ms = Ms::try_from(ttl.as_millis()).unwrap_or(Ms::MAX);
    if ms <= 0 {
        return Err(EngineError::LimitExceeded("hold ttl must be positive"));
    }
    if ms > MAX_HOLD_TTL_MS {
        return Err(EngineError::LimitExceeded("hold ttl too long"));
    }
    Ok(ms)
}

pub(crate) fn validate_range(from: NaiveDate, to: NaiveDate) -> Result<(), EngineError> {
    if to < from {
        return Err(EngineError::LimitExceeded("date range ends before it starts"));
    }
    if (to - from).num_days() >= MAX_RANGE_DAYS {
        return Err(EngineError::LimitExceeded("date range too wide"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;

    fn slot(status: SlotStatus, reserved_until: Option<Ms>) -> Slot {
        let window = TimeWindow::new(
            NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
        );
        Slot {
            status,
            reserved_until,
            ..Slot::available(Ulid::new(), window, 0)
        }
    }

    #[test]
    fn reserve_accepts_available_and_lapsed_holds_only() {
        let reserve = Transition::Reserve { until: 10_000 };
        let now = 5_000;
        assert!(reserve.permits(&slot(SlotStatus::Available, None), now));
        assert!(reserve.permits(&slot(SlotStatus::Reserved, Some(4_999)), now));
        assert!(!reserve.permits(&slot(SlotStatus::Reserved, Some(5_000)), now));
        assert!(!reserve.permits(&slot(SlotStatus::Booked, None), now));
    }

    #[test]
    fn booked_is_only_left_through_release_booked() {
        let booked = slot(SlotStatus::Booked, None);
        for t in [
            Transition::Reserve { until: 1 },
            Transition::Confirm,
            Transition::Release,
            Transition::Expire,
        ] {
            assert!(!t.permits(&booked, 0), "{} must not leave booked", t.label());
        }
        assert!(Transition::ReleaseBooked.permits(&booked, 0));
    }

    #[test]
    fn available_cannot_be_confirmed_or_released() {
        let available = slot(SlotStatus::Available, None);
        assert!(!Transition::Confirm.permits(&available, 0));
        assert!(!Transition::Release.permits(&available, 0));
        assert!(!Transition::ReleaseBooked.permits(&available, 0));
        assert!(!Transition::Expire.permits(&available, 0));
    }

    #[test]
    fn lapsed_hold_cannot_be_confirmed_or_released() {
        let lapsed = slot(SlotStatus::Reserved, Some(4_999));
        assert!(!Transition::Confirm.permits(&lapsed, 5_000));
        assert!(!Transition::Release.permits(&lapsed, 5_000));

        let live = slot(SlotStatus::Reserved, Some(5_000));
        assert!(Transition::Confirm.permits(&live, 5_000));
        assert!(Transition::Release.permits(&live, 5_000));
    }

    #[test]
    fn expire_matches_lazy_expiry_predicate() {
        let live = slot(SlotStatus::Reserved, Some(100));
        assert_eq!(Transition::Expire.permits(&live, 100), live.hold_expired(100));
        assert_eq!(Transition::Expire.permits(&live, 101), live.hold_expired(101));
    }

    #[test]
    fn ttl_bounds() {
        assert!(validate_ttl(Duration::ZERO).is_err());
        assert!(validate_ttl(Duration::from_micros(500)).is_err());
        assert_eq!(validate_ttl(Duration::from_secs(600)).unwrap(), 600_000);
        assert!(validate_ttl(Duration::from_secs(60 * 60 * 25)).is_err());
    }

    #[test]
    fn range_bounds() {
        let d = |day| NaiveDate::from_ymd_opt(2026, 1, day).unwrap();
        assert!(validate_range(d(1), d(1)).is_ok());
        assert!(validate_range(d(2), d(1)).is_err());
        let far = d(1) + chrono::Days::new(MAX_RANGE_DAYS as u64);
        assert!(validate_range(d(1), far).is_err());
    }
}
