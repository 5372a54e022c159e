mod availability;
mod calendar;
mod conflict;
mod error;
mod grid;
mod mutations;
mod queries;

pub use calendar::{diff_blocks, BlockSnapshot, CalendarChange, CalendarDiff, CalendarEditReport, CalendarFailure};
pub use conflict::{parse_form_date, parse_form_range, range_of};
pub use error::EngineError;
pub use grid::{build_grid, MonthGrid};

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

use crate::model::*;
use crate::notify::NotifyHub;
use crate::observability;
use crate::wal::Wal;

pub type SharedRoomState = Arc<RwLock<RoomState>>;

/// Default bound on how long a store operation may wait for a room lock or
/// for space in the WAL writer queue.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(3);

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

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task owning the WAL. Appends that queue up while a flush is in
/// progress are written together and share one fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd else {
            handle_control(&mut wal, cmd);
            continue;
        };

        let mut batch = vec![(event, response)];
        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    deferred = Some(other);
                    break;
                }
            }
        }

        commit_batch(&mut wal, batch);
        if let Some(cmd) = deferred {
            handle_control(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: Vec<PendingAppend>) {
    metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = Instant::now();

    let (events, responders): (Vec<Event>, Vec<_>) = batch.into_iter().unzip();
    // All or nothing: a failed batch is cut back out of the file.
    let result = wal.append_batch(&events);
    metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS).record(started.elapsed().as_secs_f64());

    for tx in responders {
        let reply = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(reply);
    }
}

fn handle_control(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

/// The availability and restriction-calendar store for one property.
///
/// Rooms hold their restrictions behind a per-room `RwLock`; every mutation
/// of a room runs under that room's write lock, so the overlap check and the
/// write it guards form one critical section.
pub struct Engine {
    pub(super) rooms: DashMap<RoomId, SharedRoomState>,
    pub(super) reservations: DashMap<ReservationId, Reservation>,
    /// Reverse lookup: restriction id → room id.
    pub(super) restriction_to_room: DashMap<RestrictionId, RoomId>,
    pub(super) next_reservation_id: AtomicU64,
    pub(super) next_restriction_id: AtomicU64,
    /// Serialises room creation against compaction.
    pub(super) catalog: Mutex<()>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub(super) store_timeout: Duration,
}

/// Apply a room-scoped event. Caller holds the room's write lock.
fn apply_to_room(
    rs: &mut RoomState,
    event: &Event,
    restriction_to_room: &DashMap<RestrictionId, RoomId>,
    reservations: &DashMap<ReservationId, Reservation>,
) {
    match event {
        Event::ReservationCreated { reservation, restriction_id } => {
            rs.insert_restriction(RoomRestriction::booking(
                *restriction_id,
                reservation.room_id,
                reservation.id,
                reservation.stay,
                reservation.created_at,
            ));
            restriction_to_room.insert(*restriction_id, reservation.room_id);
            reservations.insert(reservation.id, reservation.clone());
        }
        Event::ReservationUpdated { id, guest, updated_at, .. } => {
            if let Some(mut r) = reservations.get_mut(id) {
                r.guest = guest.clone();
                r.updated_at = *updated_at;
            }
        }
        Event::ReservationProcessed { id, processed, updated_at, .. } => {
            if let Some(mut r) = reservations.get_mut(id) {
                r.processed = *processed;
                r.updated_at = *updated_at;
            }
        }
        Event::ReservationDeleted { id, restriction_id, .. } => {
            if let Some(rid) = restriction_id {
                rs.remove_restriction(*rid);
                restriction_to_room.remove(rid);
            }
            reservations.remove(id);
        }
        Event::BlockAdded { restriction } => {
            restriction_to_room.insert(restriction.id, restriction.room_id);
            rs.insert_restriction(restriction.clone());
        }
        Event::BlockRemoved { id, .. } => {
            rs.remove_restriction(*id);
            restriction_to_room.remove(id);
        }
        // Room creation and id sequences are handled at the engine level.
        Event::RoomCreated { .. } | Event::IdSequences { .. } => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>, store_timeout: Duration) -> io::Result<Self> {
        let events = Wal::recover(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            rooms: DashMap::new(),
            reservations: DashMap::new(),
            restriction_to_room: DashMap::new(),
            next_reservation_id: AtomicU64::new(1),
            next_restriction_id: AtomicU64::new(1),
            catalog: Mutex::new(()),
            wal_tx,
            notify,
            store_timeout,
        };

        // Sole owner of every lock during replay, so try_write always succeeds.
        // Never block here: this may run inside an async context.
        for event in &events {
            match event {
                Event::RoomCreated { room } => {
                    engine
                        .rooms
                        .insert(room.id, Arc::new(RwLock::new(RoomState::new(room.clone()))));
                }
                Event::IdSequences { next_reservation_id, next_restriction_id } => {
                    engine.next_reservation_id.fetch_max(*next_reservation_id, Ordering::SeqCst);
                    engine.next_restriction_id.fetch_max(*next_restriction_id, Ordering::SeqCst);
                }
                other => {
                    if let Some(room_id) = other.room_id()
                        && let Some(rs) = engine.room_state(&room_id)
                    {
                        let mut guard = rs.try_write().expect("replay: uncontended write");
                        apply_to_room(&mut guard, other, &engine.restriction_to_room, &engine.reservations);
                    }
                    engine.advance_sequences_past(other);
                }
            }
        }
        metrics::gauge!(observability::ROOMS).set(engine.rooms.len() as f64);

        Ok(engine)
    }

    fn advance_sequences_past(&self, event: &Event) {
        match event {
            Event::ReservationCreated { reservation, restriction_id } => {
                self.next_reservation_id.fetch_max(reservation.id + 1, Ordering::SeqCst);
                self.next_restriction_id.fetch_max(restriction_id + 1, Ordering::SeqCst);
            }
            Event::BlockAdded { restriction } => {
                self.next_restriction_id.fetch_max(restriction.id + 1, Ordering::SeqCst);
            }
            _ => {}
        }
    }

    pub(super) fn allocate_reservation_id(&self) -> ReservationId {
        self.next_reservation_id.fetch_add(1, Ordering::SeqCst)
    }

    pub(super) fn allocate_restriction_id(&self) -> RestrictionId {
        self.next_restriction_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Hand an event to the group-commit writer and wait until it is durable.
    ///
    /// Only queueing is bounded by the store timeout: once the writer has
    /// the event the caller waits for the fsync outcome, so in-memory state
    /// never disagrees with what a replay would rebuild.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        let command = WalCommand::Append { event: event.clone(), response: tx };
        self.wal_tx
            .send_timeout(command, self.store_timeout)
            .await
            .map_err(|e| match e {
                mpsc::error::SendTimeoutError::Timeout(_) => self.timed_out("wal append"),
                mpsc::error::SendTimeoutError::Closed(_) => EngineError::WalError("WAL writer shut down".into()),
            })?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub(super) fn timed_out(&self, op: &'static str) -> EngineError {
        metrics::counter!(observability::STORE_TIMEOUTS_TOTAL, "op" => op).increment(1);
        EngineError::Timeout(op)
    }

    pub(super) fn room_state(&self, id: &RoomId) -> Option<SharedRoomState> {
        self.rooms.get(id).map(|e| e.value().clone())
    }

    pub(super) fn room_for_restriction(&self, id: &RestrictionId) -> Option<RoomId> {
        self.restriction_to_room.get(id).map(|e| *e.value())
    }

    /// Acquire a room's write lock within the store timeout.
    pub(super) async fn write_room(&self, room_id: RoomId) -> Result<OwnedRwLockWriteGuard<RoomState>, EngineError> {
        let rs = self.room_state(&room_id).ok_or(EngineError::RoomNotFound(room_id))?;
        tokio::time::timeout(self.store_timeout, rs.write_owned())
            .await
            .map_err(|_| self.timed_out("room write lock"))
    }

    /// Acquire a room's read lock within the store timeout.
    pub(super) async fn read_room(&self, room_id: RoomId) -> Result<OwnedRwLockReadGuard<RoomState>, EngineError> {
        let rs = self.room_state(&room_id).ok_or(EngineError::RoomNotFound(room_id))?;
        tokio::time::timeout(self.store_timeout, rs.read_owned())
            .await
            .map_err(|_| self.timed_out("room read lock"))
    }

    /// WAL-append, apply, notify. Caller holds the room's write lock.
    pub(super) async fn persist_and_apply(&self, rs: &mut RoomState, event: &Event) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_room(rs, event, &self.restriction_to_room, &self.reservations);
        self.notify.send(event);
        Ok(())
    }
}
