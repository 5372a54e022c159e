use crate::model::*;

use super::conflict::validate_query;
use super::{Engine, EngineError};

impl Engine {
    pub async fn get_room(&self, id: RoomId) -> Result<Room, EngineError> {
        let guard = self.read_room(id).await?;
        Ok(guard.room.clone())
    }

    /// All rooms, sorted by name.
    pub async fn list_rooms(&self) -> Result<Vec<Room>, EngineError> {
        let states: Vec<_> = self.rooms.iter().map(|e| e.value().clone()).collect();
        let mut rooms = Vec::with_capacity(states.len());
        for rs in states {
            let guard = tokio::time::timeout(self.store_timeout, rs.read_owned())
                .await
                .map_err(|_| self.timed_out("room read lock"))?;
            rooms.push(guard.room.clone());
        }
        rooms.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(rooms)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Restrictions of the room overlapping `range`, in start order.
    pub async fn restrictions_for_room_in_range(
        &self,
        room_id: RoomId,
        range: DateRange,
    ) -> Result<Vec<RoomRestriction>, EngineError> {
        validate_query(&range)?;
        let guard = self.read_room(room_id).await?;
        Ok(guard.overlapping(&range).cloned().collect())
    }

    pub fn get_reservation(&self, id: ReservationId) -> Result<Reservation, EngineError> {
        self.reservations
            .get(&id)
            .map(|r| r.clone())
            .ok_or(EngineError::ReservationNotFound(id))
    }

    /// Every reservation, ordered by arrival date.
    pub fn all_reservations(&self) -> Vec<Reservation> {
        self.sorted_reservations(|_| true)
    }

    /// Reservations staff have not processed yet, ordered by arrival date.
    pub fn new_reservations(&self) -> Vec<Reservation> {
        self.sorted_reservations(|r| !r.processed)
    }

    pub fn reservation_count(&self) -> usize {
        self.reservations.len()
    }

    fn sorted_reservations(&self, keep: impl Fn(&Reservation) -> bool) -> Vec<Reservation> {
        let mut out: Vec<Reservation> = self
            .reservations
            .iter()
            .filter(|e| keep(e.value()))
            .map(|e| e.value().clone())
            .collect();
        out.sort_by_key(|r| (r.stay.start(), r.id));
        out
    }
}
