use crate::model::*;
use crate::observability;

use super::conflict::validate_query;
use super::{Engine, EngineError};

// ── Availability ─────────────────────────────────────────────────

/// Number of restrictions on the room overlapping `range`.
pub fn overlap_count(rs: &RoomState, range: &DateRange) -> usize {
    rs.overlapping(range).count()
}

/// A room is available when no restriction of any kind overlaps the range.
pub fn is_available(rs: &RoomState, range: &DateRange) -> bool {
    overlap_count(rs, range) == 0
}

impl Engine {
    pub async fn overlap_count(&self, room_id: RoomId, range: DateRange) -> Result<usize, EngineError> {
        validate_query(&range)?;
        let guard = self.read_room(room_id).await?;
        Ok(overlap_count(&guard, &range))
    }

    pub async fn is_room_available(&self, room_id: RoomId, range: DateRange) -> Result<bool, EngineError> {
        validate_query(&range)?;
        let guard = self.read_room(room_id).await?;
        let free = is_available(&guard, &range);
        metrics::counter!(observability::AVAILABILITY_CHECKS_TOTAL, "scope" => "room").increment(1);
        Ok(free)
    }

    /// Every room with no overlapping restriction, sorted by name then id.
    pub async fn find_available_rooms(&self, range: DateRange) -> Result<Vec<Room>, EngineError> {
        validate_query(&range)?;
        // Collect the Arcs first: never hold a DashMap shard across an await.
        let states: Vec<_> = self.rooms.iter().map(|e| e.value().clone()).collect();

        let mut free = Vec::new();
        for rs in states {
            let guard = tokio::time::timeout(self.store_timeout, rs.read_owned())
                .await
                .map_err(|_| self.timed_out("room read lock"))?;
            if is_available(&guard, &range) {
                free.push(guard.room.clone());
            }
        }
        free.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        metrics::counter!(observability::AVAILABILITY_CHECKS_TOTAL, "scope" => "all").increment(1);
        Ok(free)
    }
}
