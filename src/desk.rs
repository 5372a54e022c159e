use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{info, warn};

use crate::engine::{diff_blocks, parse_form_range, CalendarEditReport, Engine, EngineError, MonthGrid};
use crate::model::*;
use crate::session::{SessionId, SnapshotStore};

/// Reservation form as submitted by a visitor. Dates are `YYYY-MM-DD`.
#[derive(Debug, Clone, Default)]
pub struct ReservationForm {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub start_date: String,
    pub end_date: String,
    pub room_id: RoomId,
}

/// Every room's grid for one month, with navigation.
#[derive(Debug, Clone, Serialize)]
pub struct AdminCalendar {
    pub month: YearMonth,
    pub prev: Option<YearMonth>,
    pub next: Option<YearMonth>,
    pub rooms: Vec<(Room, MonthGrid)>,
}

/// Entry point for request handlers: visitor search and booking, and the
/// staff calendar and reservation screens.
///
/// The staff calendar is a two-request exchange. `admin_calendar` renders
/// each room's grid and stores its block map in the session;
/// `submit_calendar` reads those snapshots back as the "before" state for
/// the edit. Submitting without a prior render is `MissingSnapshot`.
pub struct ReservationDesk {
    engine: Arc<Engine>,
    snapshots: Arc<SnapshotStore>,
}

impl ReservationDesk {
    pub fn new(engine: Arc<Engine>, snapshots: Arc<SnapshotStore>) -> Self {
        Self { engine, snapshots }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub async fn search_availability(&self, start: &str, end: &str) -> Result<Vec<Room>, EngineError> {
        let range = parse_form_range(start, end)?;
        self.engine.find_available_rooms(range).await
    }

    pub async fn check_room(&self, room_id: RoomId, start: &str, end: &str) -> Result<bool, EngineError> {
        let range = parse_form_range(start, end)?;
        self.engine.is_room_available(room_id, range).await
    }

    pub async fn reserve(&self, form: ReservationForm) -> Result<Reservation, EngineError> {
        let stay = parse_form_range(&form.start_date, &form.end_date)?;
        let new = NewReservation {
            guest: Guest {
                first_name: form.first_name.trim().to_string(),
                last_name: form.last_name.trim().to_string(),
                email: form.email.trim().to_string(),
                phone: form.phone.trim().to_string(),
            },
            stay,
            room_id: form.room_id,
        };
        match self.engine.create_reservation(new).await {
            Ok(reservation) => {
                info!("reservation {} booked room {} for {}", reservation.id, reservation.room_id, reservation.stay);
                Ok(reservation)
            }
            Err(e) => {
                if e.is_conflict() {
                    warn!("room {} lost race for {stay}: {e}", form.room_id);
                } else if e.is_retryable() {
                    warn!("reservation for room {} failed: {e}", form.room_id);
                }
                Err(e)
            }
        }
    }

    /// Render every room for `month` and snapshot its blocks into the session.
    pub async fn admin_calendar(&self, session: SessionId, month: YearMonth) -> Result<AdminCalendar, EngineError> {
        let mut rooms = Vec::new();
        for room in self.engine.list_rooms().await? {
            let grid = self.engine.build_month_grid(room.id, month).await?;
            self.snapshots
                .put(session, &grid.block_snapshot())
                .map_err(|_| EngineError::InvalidInput("calendar snapshot could not be serialized"))?;
            rooms.push((room, grid));
        }
        Ok(AdminCalendar {
            month,
            prev: month.prev(),
            next: month.next(),
            rooms,
        })
    }

    /// Apply the staff's "block this day" selections for `month`, one room at
    /// a time. Rooms absent from `selections` have every day unselected.
    ///
    /// Every room's snapshot and selections are checked before any write, so
    /// an input error leaves all rooms and snapshots as they were. Each room's
    /// snapshot is consumed by its edit; a repeat submission needs a fresh
    /// render.
    pub async fn submit_calendar(
        &self,
        session: SessionId,
        month: YearMonth,
        selections: &BTreeMap<RoomId, BTreeSet<NaiveDate>>,
    ) -> Result<Vec<CalendarEditReport>, EngineError> {
        let rooms = self.engine.list_rooms().await?;
        if let Some(unknown) = selections.keys().find(|id| !rooms.iter().any(|r| r.id == **id)) {
            return Err(EngineError::RoomNotFound(*unknown));
        }

        let mut snapshots = Vec::with_capacity(rooms.len());
        for room in &rooms {
            match self.snapshots.get(session, room.id) {
                Some(snapshot) if snapshot.month == month => snapshots.push(snapshot),
                _ => return Err(EngineError::MissingSnapshot(room.id)),
            }
        }

        let empty = BTreeSet::new();
        let mut diffs = Vec::with_capacity(snapshots.len());
        for snapshot in &snapshots {
            let submitted = selections.get(&snapshot.room_id).unwrap_or(&empty);
            diffs.push(diff_blocks(snapshot, submitted)?);
        }

        let mut reports = Vec::with_capacity(snapshots.len());
        for (snapshot, diff) in snapshots.iter().zip(diffs) {
            let report = self.engine.apply_calendar_diff(snapshot, diff).await?;
            self.snapshots.remove(session, snapshot.room_id);
            if report.is_partial() {
                warn!(
                    "calendar edit room {} {}: partial, {} applied, {} failed",
                    report.room_id,
                    report.month,
                    report.change_count(),
                    report.failures.len()
                );
            } else if !report.is_complete() {
                warn!("calendar edit room {} {}: all {} writes failed", report.room_id, report.month, report.failures.len());
            } else if report.change_count() > 0 {
                info!("calendar edit room {} {}: {} changes", report.room_id, report.month, report.change_count());
            }
            reports.push(report);
        }
        Ok(reports)
    }

    pub fn all_reservations(&self) -> Vec<Reservation> {
        self.engine.all_reservations()
    }

    pub fn new_reservations(&self) -> Vec<Reservation> {
        self.engine.new_reservations()
    }

    pub fn reservation(&self, id: ReservationId) -> Result<Reservation, EngineError> {
        self.engine.get_reservation(id)
    }

    pub async fn update_guest(&self, id: ReservationId, guest: Guest) -> Result<Reservation, EngineError> {
        self.engine.update_reservation(id, guest).await
    }

    pub async fn mark_processed(&self, id: ReservationId, processed: bool) -> Result<Reservation, EngineError> {
        let reservation = self.engine.mark_processed(id, processed).await?;
        info!("reservation {id} marked {}", if processed { "processed" } else { "new" });
        Ok(reservation)
    }

    pub async fn delete_reservation(&self, id: ReservationId) -> Result<Reservation, EngineError> {
        let reservation = self.engine.delete_reservation(id).await?;
        info!("reservation {id} deleted, room {} freed for {}", reservation.room_id, reservation.stay);
        Ok(reservation)
    }
}
