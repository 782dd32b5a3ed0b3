use std::collections::HashSet;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError};

/// Template windows not matched exactly by any occupied window, in template order.
pub fn subtract_occupied(template: &[TimeWindow], occupied: &[TimeWindow]) -> Vec<TimeWindow> {
    if occupied.is_empty() {
        return template.to_vec();
    }
    let taken: HashSet<&TimeWindow> = occupied.iter().collect();
    template
        .iter()
        .filter(|w| !taken.contains(w))
        .copied()
        .collect()
}

impl Engine {
    /// What can be booked for this business on `date`, right now.
    ///
    /// Generates the day on first request. Lapsed reservations count as open
    /// even if no sweep has rewritten them yet. Windows that exist in the
    /// template but have no stored row (hours changed after generation) are
    /// not offered, since there is nothing to hold.
    pub async fn available_slots(
        &self,
        business_id: Ulid,
        date: NaiveDate,
        config: &HoursConfig,
    ) -> Result<Vec<OpenSlot>, EngineError> {
        config.validate()?;
        self.ensure_generated_with_retry(business_id, date, config)
            .await?;

        let key = DayKey::new(business_id, date);
        let occupied = self.occupied_intervals(business_id, date, now_ms()).await;
        let template = self.templates.get(config);
        let open = subtract_occupied(&template, &occupied);

        let ids = self.slot_ids(&key).await;
        Ok(open
            .into_iter()
            .filter_map(|window| ids.get(&window).map(|&id| OpenSlot { id, window }))
            .collect())
    }
}
