use std::sync::Arc;
use std::sync::atomic::Ordering;

use tokio::sync::{mpsc, oneshot, RwLock};

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::conflict::{check_no_conflict, now_ms, validate_guest, validate_room_name, validate_stay};
use super::{Engine, EngineError, WalCommand};

impl Engine {
    pub async fn create_room(&self, id: RoomId, name: impl Into<String>) -> Result<Room, EngineError> {
        let name = name.into();
        if id == 0 {
            return Err(EngineError::InvalidInput("room id must be positive"));
        }
        validate_room_name(&name)?;

        let _catalog = tokio::time::timeout(self.store_timeout, self.catalog.lock())
            .await
            .map_err(|_| self.timed_out("catalog lock"))?;
        if self.rooms.len() >= MAX_ROOMS {
            return Err(EngineError::LimitExceeded("too many rooms"));
        }
        if self.rooms.contains_key(&id) {
            return Err(EngineError::RoomExists(id));
        }

        let now = now_ms();
        let room = Room { id, name, created_at: now, updated_at: now };
        let event = Event::RoomCreated { room: room.clone() };
        self.wal_append(&event).await?;
        self.rooms.insert(id, Arc::new(RwLock::new(RoomState::new(room.clone()))));
        self.notify.send(&event);
        metrics::gauge!(observability::ROOMS).set(self.rooms.len() as f64);
        Ok(room)
    }

    /// Persist a reservation and its booking restriction as one atomic write.
    ///
    /// The overlap check runs under the room's write lock, so two requests
    /// racing for the same days cannot both commit: the loser gets
    /// `EngineError::Conflict`.
    pub async fn create_reservation(&self, new: NewReservation) -> Result<Reservation, EngineError> {
        validate_guest(&new.guest)?;
        validate_stay(&new.stay)?;

        let mut guard = self.write_room(new.room_id).await?;
        if guard.restrictions.len() >= MAX_RESTRICTIONS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many restrictions on room"));
        }
        if let Err(e) = check_no_conflict(&guard, &new.stay) {
            metrics::counter!(observability::RESERVATION_CONFLICTS_TOTAL).increment(1);
            return Err(e);
        }

        let now = now_ms();
        let reservation = Reservation {
            id: self.allocate_reservation_id(),
            guest: new.guest,
            stay: new.stay,
            room_id: new.room_id,
            processed: false,
            created_at: now,
            updated_at: now,
        };
        let restriction_id = self.allocate_restriction_id();
        let event = Event::ReservationCreated {
            reservation: reservation.clone(),
            restriction_id,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(observability::RESERVATIONS_CREATED_TOTAL).increment(1);
        Ok(reservation)
    }

    /// Replace the guest details of a reservation. Dates and room are fixed.
    pub async fn update_reservation(&self, id: ReservationId, guest: Guest) -> Result<Reservation, EngineError> {
        validate_guest(&guest)?;
        let room_id = self.reservation_room(id)?;
        let mut guard = self.write_room(room_id).await?;
        let event = Event::ReservationUpdated { id, room_id, guest, updated_at: now_ms() };
        self.persist_and_apply(&mut guard, &event).await?;
        self.get_reservation(id)
    }

    pub async fn mark_processed(&self, id: ReservationId, processed: bool) -> Result<Reservation, EngineError> {
        let room_id = self.reservation_room(id)?;
        let mut guard = self.write_room(room_id).await?;
        let event = Event::ReservationProcessed { id, room_id, processed, updated_at: now_ms() };
        self.persist_and_apply(&mut guard, &event).await?;
        self.get_reservation(id)
    }

    /// Delete a reservation together with its booking restriction.
    pub async fn delete_reservation(&self, id: ReservationId) -> Result<Reservation, EngineError> {
        let room_id = self.reservation_room(id)?;
        let mut guard = self.write_room(room_id).await?;
        let reservation = self.get_reservation(id)?;
        let restriction_id = guard.restriction_for_reservation(id).map(|r| r.id);
        let event = Event::ReservationDeleted { id, room_id, restriction_id };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(reservation)
    }

    /// Add an owner block. Refused if any restriction already covers one of
    /// its days.
    pub async fn add_block(&self, room_id: RoomId, range: DateRange) -> Result<RoomRestriction, EngineError> {
        validate_stay(&range)?;
        let mut guard = self.write_room(room_id).await?;
        if guard.restrictions.len() >= MAX_RESTRICTIONS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many restrictions on room"));
        }
        check_no_conflict(&guard, &range)?;

        let restriction = RoomRestriction::block(self.allocate_restriction_id(), room_id, range, now_ms());
        let event = Event::BlockAdded { restriction: restriction.clone() };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(restriction)
    }

    /// Delete an owner block by restriction id. Booking restrictions are
    /// removed only through `delete_reservation`.
    pub async fn remove_block(&self, id: RestrictionId) -> Result<RoomRestriction, EngineError> {
        let room_id = self
            .room_for_restriction(&id)
            .ok_or(EngineError::RestrictionNotFound(id))?;
        let mut guard = self.write_room(room_id).await?;
        // Re-check under the lock: it may have gone while we waited.
        let restriction = guard
            .restriction(id)
            .cloned()
            .ok_or(EngineError::RestrictionNotFound(id))?;
        if !restriction.is_block() {
            return Err(EngineError::NotABlock(id));
        }
        let event = Event::BlockRemoved { id, room_id };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(restriction)
    }

    fn reservation_room(&self, id: ReservationId) -> Result<RoomId, EngineError> {
        self.reservations
            .get(&id)
            .map(|r| r.room_id)
            .ok_or(EngineError::ReservationNotFound(id))
    }

    /// Rewrite the WAL with only the events needed to recreate current state.
    ///
    /// Holds the catalog lock and every room's read lock until the writer has
    /// swapped files, so no append can land in the old file after the
    /// snapshot was taken. Acquiring all of them is bounded by one store
    /// timeout.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let (_catalog, guards) = tokio::time::timeout(self.store_timeout, async {
            let catalog = self.catalog.lock().await;
            let mut room_ids: Vec<RoomId> = self.rooms.iter().map(|e| *e.key()).collect();
            room_ids.sort_unstable();
            let mut guards = Vec::with_capacity(room_ids.len());
            for id in &room_ids {
                if let Some(rs) = self.room_state(id) {
                    guards.push(rs.read_owned().await);
                }
            }
            (catalog, guards)
        })
        .await
        .map_err(|_| self.timed_out("compaction locks"))?;

        let mut events = vec![Event::IdSequences {
            next_reservation_id: self.next_reservation_id.load(Ordering::SeqCst),
            next_restriction_id: self.next_restriction_id.load(Ordering::SeqCst),
        }];
        for guard in &guards {
            events.push(Event::RoomCreated { room: guard.room.clone() });
            for restriction in &guard.restrictions {
                match restriction.reservation_id {
                    Some(reservation_id) => {
                        let Some(reservation) = self.reservations.get(&reservation_id).map(|r| r.clone()) else {
                            tracing::warn!("compaction: booking restriction {} has no reservation", restriction.id);
                            continue;
                        };
                        events.push(Event::ReservationCreated {
                            reservation,
                            restriction_id: restriction.id,
                        });
                    }
                    None => events.push(Event::BlockAdded { restriction: restriction.clone() }),
                }
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send_timeout(WalCommand::Compact { events, response: tx }, self.store_timeout)
            .await
            .map_err(|e| match e {
                mpsc::error::SendTimeoutError::Timeout(_) => self.timed_out("wal compact"),
                mpsc::error::SendTimeoutError::Closed(_) => EngineError::WalError("WAL writer shut down".into()),
            })?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
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
