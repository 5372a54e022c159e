use dashmap::DashMap;
use ulid::Ulid;

use crate::engine::BlockSnapshot;
use crate::model::RoomId;

pub type SessionId = Ulid;

/// Session-scoped storage for calendar block snapshots.
///
/// The admin calendar render stores one snapshot per room; the matching
/// submit reads it back as the "before" state of the diff. Snapshots are
/// kept in their serialized JSON form, as a cookie- or store-backed session
/// would hold them.
#[derive(Default)]
pub struct SnapshotStore {
    entries: DashMap<(SessionId, RoomId), String>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_session() -> SessionId {
        Ulid::new()
    }

    /// Replace the room's snapshot for this session.
    pub fn put(&self, session: SessionId, snapshot: &BlockSnapshot) -> Result<(), serde_json::Error> {
        let json = snapshot.to_json()?;
        self.entries.insert((session, snapshot.room_id), json);
        Ok(())
    }

    /// The stored snapshot, if any. An entry that no longer decodes is
    /// dropped and reported as missing.
    pub fn get(&self, session: SessionId, room_id: RoomId) -> Option<BlockSnapshot> {
        let key = (session, room_id);
        let json = self.entries.get(&key)?.value().clone();
        match BlockSnapshot::from_json(&json) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                tracing::warn!("session {session}: dropping unreadable snapshot for room {room_id}: {e}");
                self.entries.remove(&key);
                None
            }
        }
    }

    pub fn remove(&self, session: SessionId, room_id: RoomId) {
        self.entries.remove(&(session, room_id));
    }

    /// Forget everything stored for a session (logout, expiry).
    pub fn clear_session(&self, session: SessionId) {
        self.entries.retain(|(s, _), _| *s != session);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;

    fn snapshot(room_id: RoomId) -> BlockSnapshot {
        let month = YearMonth::new(2024, 2).unwrap();
        let mut blocks: DayMap = month.days().map(|d| (d, 0)).collect();
        blocks.insert(parse_date("2024-02-29").unwrap(), 12);
        BlockSnapshot { room_id, month, blocks }
    }

    #[test]
    fn put_get_per_session_and_room() {
        let store = SnapshotStore::new();
        let a = SnapshotStore::new_session();
        let b = SnapshotStore::new_session();

        store.put(a, &snapshot(1)).unwrap();
        store.put(a, &snapshot(2)).unwrap();
        assert_eq!(store.get(a, 1), Some(snapshot(1)));
        assert_eq!(store.get(b, 1), None);

        store.clear_session(a);
        assert!(store.is_empty());
    }

    #[test]
    fn unreadable_entry_is_dropped() {
        let store = SnapshotStore::new();
        let s = SnapshotStore::new_session();
        store.entries.insert((s, 1), "{not json".into());
        assert_eq!(store.get(s, 1), None);
        assert_eq!(store.len(), 0);
    }
}
