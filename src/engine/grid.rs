use serde::Serialize;

use crate::model::*;

use super::calendar::BlockSnapshot;
use super::{Engine, EngineError};

// ── Occupancy grid ───────────────────────────────────────────────

/// Day-by-day occupancy of one room for one month.
///
/// Both maps hold every day of the month. A non-zero value in `reservations`
/// is the id of the reservation covering that day; a non-zero value in
/// `blocks` is the id of the owner-block restriction covering it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonthGrid {
    pub room_id: RoomId,
    pub month: YearMonth,
    pub reservations: DayMap,
    pub blocks: DayMap,
}

impl MonthGrid {
    /// The "before" state for the next calendar edit of this room.
    pub fn block_snapshot(&self) -> BlockSnapshot {
        BlockSnapshot {
            room_id: self.room_id,
            month: self.month,
            blocks: self.blocks.clone(),
        }
    }

    pub fn is_free(&self, day: &chrono::NaiveDate) -> bool {
        self.reservations.get(day).copied().unwrap_or(0) == 0 && self.blocks.get(day).copied().unwrap_or(0) == 0
    }
}

/// Stamp each restriction overlapping the month into the matching map.
/// Days outside the month are skipped. The builder reflects whatever the
/// room holds; it does not itself check that restrictions are disjoint.
pub fn build_grid(rs: &RoomState, month: YearMonth) -> MonthGrid {
    let mut reservations: DayMap = month.days().map(|d| (d, 0)).collect();
    let mut blocks = reservations.clone();

    let window = month.range();
    for restriction in rs.overlapping(&window) {
        let Some(visible) = restriction.range.clamp_to(&window) else {
            continue;
        };
        let (target, tag) = match restriction.reservation_id {
            Some(reservation_id) => (&mut reservations, reservation_id),
            None => (&mut blocks, restriction.id),
        };
        for day in visible.days() {
            target.insert(day, tag);
        }
    }

    MonthGrid {
        room_id: rs.room.id,
        month,
        reservations,
        blocks,
    }
}

impl Engine {
    pub async fn build_month_grid(&self, room_id: RoomId, month: YearMonth) -> Result<MonthGrid, EngineError> {
        let guard = self.read_room(room_id).await?;
        Ok(build_grid(&guard, month))
    }
}
