use std::collections::BTreeMap;
use std::fmt;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

/// Unix milliseconds, for row timestamps only. Stays are whole days.
pub type Ms = i64;

pub type RoomId = u64;
pub type ReservationId = u64;
pub type RestrictionId = u64;

/// Textual date format wherever a date crosses into or out of a human-facing form.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), DATE_FORMAT).ok()
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Inclusive range of whole days `[start, end]`. `start <= end` always holds,
/// including for ranges read back from the WAL or a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawDateRange")]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

#[derive(Deserialize)]
struct RawDateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl TryFrom<RawDateRange> for DateRange {
    type Error = String;

    fn try_from(raw: RawDateRange) -> Result<Self, Self::Error> {
        DateRange::new(raw.start, raw.end)
            .ok_or_else(|| format!("end {} is before start {}", raw.end, raw.start))
    }
}

impl DateRange {
    /// Returns `None` when `end` is before `start`.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    /// Builds a range without the ordering check, to exercise the guards at
    /// the engine boundary.
    #[cfg(test)]
    pub(crate) fn unchecked(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn is_ordered(&self) -> bool {
        self.start <= self.end
    }

    pub fn single_day(day: NaiveDate) -> Self {
        Self { start: day, end: day }
    }

    /// Two ranges overlap unless one starts after the other ends.
    /// Ranges that share a boundary day overlap: a stay cannot start on the
    /// day another one ends.
    pub fn overlaps(&self, other: &DateRange) -> bool {
        !(other.start > self.end || other.end < self.start)
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        self.start <= day && day <= self.end
    }

    /// Number of calendar days covered, both ends included.
    pub fn num_days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + use<> {
        let end = self.end;
        self.start.iter_days().take_while(move |d| *d <= end)
    }

    /// The part of `self` inside `other`, if any.
    pub fn clamp_to(&self, other: &DateRange) -> Option<DateRange> {
        DateRange::new(self.start.max(other.start), self.end.min(other.end))
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", format_date(self.start), format_date(self.end))
    }
}

/// A calendar month, stored as its first day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct YearMonth {
    first: NaiveDate,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, 1).map(|first| Self { first })
    }

    pub fn containing(day: NaiveDate) -> Self {
        Self { first: day.with_day0(0).unwrap_or(day) }
    }

    /// Parse `YYYY-MM`.
    pub fn parse(s: &str) -> Option<Self> {
        let (y, m) = s.trim().split_once('-')?;
        if y.len() != 4 || m.len() != 2 {
            return None;
        }
        Self::new(y.parse().ok()?, m.parse().ok()?)
    }

    pub fn year(&self) -> i32 {
        self.first.year()
    }

    pub fn month(&self) -> u32 {
        self.first.month()
    }

    pub fn first_day(&self) -> NaiveDate {
        self.first
    }

    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + use<> {
        let month = self.first.month();
        self.first.iter_days().take_while(move |d| d.month() == month)
    }

    pub fn last_day(&self) -> NaiveDate {
        self.days().last().unwrap_or(self.first)
    }

    pub fn num_days(&self) -> usize {
        self.days().count()
    }

    pub fn range(&self) -> DateRange {
        DateRange { start: self.first, end: self.last_day() }
    }

    pub fn next(&self) -> Option<Self> {
        self.last_day().succ_opt().map(|first| Self { first })
    }

    pub fn prev(&self) -> Option<Self> {
        self.first.pred_opt().map(Self::containing)
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year(), self.month())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    pub created_at: Ms,
    pub updated_at: Ms,
}

/// Why a room is restricted on a range of days. Reference data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RestrictionKind {
    /// Confirmed guest booking; always carries a reservation reference.
    Reservation,
    /// Manual administrative hold; never carries a reservation reference.
    OwnerBlock,
}

impl RestrictionKind {
    pub fn id(self) -> u32 {
        match self {
            RestrictionKind::Reservation => 1,
            RestrictionKind::OwnerBlock => 2,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            RestrictionKind::Reservation => "Reservation",
            RestrictionKind::OwnerBlock => "Owner Block",
        }
    }

    pub fn from_id(id: u32) -> Option<Self> {
        match id {
            1 => Some(RestrictionKind::Reservation),
            2 => Some(RestrictionKind::OwnerBlock),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomRestriction {
    pub id: RestrictionId,
    pub range: DateRange,
    pub room_id: RoomId,
    pub reservation_id: Option<ReservationId>,
    pub kind: RestrictionKind,
    pub created_at: Ms,
    pub updated_at: Ms,
}

impl RoomRestriction {
    pub fn booking(id: RestrictionId, room_id: RoomId, reservation_id: ReservationId, range: DateRange, now: Ms) -> Self {
        Self {
            id,
            range,
            room_id,
            reservation_id: Some(reservation_id),
            kind: RestrictionKind::Reservation,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn block(id: RestrictionId, room_id: RoomId, range: DateRange, now: Ms) -> Self {
        Self {
            id,
            range,
            room_id,
            reservation_id: None,
            kind: RestrictionKind::OwnerBlock,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_block(&self) -> bool {
        self.reservation_id.is_none()
    }
}

/// Guest identity as submitted on the reservation form.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Guest {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
}

impl Guest {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub guest: Guest,
    pub stay: DateRange,
    pub room_id: RoomId,
    /// Set once staff have reviewed the reservation.
    pub processed: bool,
    pub created_at: Ms,
    pub updated_at: Ms,
}

/// A reservation request before the store has assigned it an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReservation {
    pub guest: Guest,
    pub stay: DateRange,
    pub room_id: RoomId,
}

/// Per-room state: reference data plus its restrictions sorted by start day.
#[derive(Debug, Clone)]
pub struct RoomState {
    pub room: Room,
    pub restrictions: Vec<RoomRestriction>,
}

impl RoomState {
    pub fn new(room: Room) -> Self {
        Self { room, restrictions: Vec::new() }
    }

    /// Insert maintaining sort order by range start.
    pub fn insert_restriction(&mut self, restriction: RoomRestriction) {
        let pos = self
            .restrictions
            .binary_search_by_key(&restriction.range.start, |r| r.range.start)
            .unwrap_or_else(|e| e);
        self.restrictions.insert(pos, restriction);
    }

    pub fn remove_restriction(&mut self, id: RestrictionId) -> Option<RoomRestriction> {
        let pos = self.restrictions.iter().position(|r| r.id == id)?;
        Some(self.restrictions.remove(pos))
    }

    pub fn restriction(&self, id: RestrictionId) -> Option<&RoomRestriction> {
        self.restrictions.iter().find(|r| r.id == id)
    }

    pub fn restriction_for_reservation(&self, reservation_id: ReservationId) -> Option<&RoomRestriction> {
        self.restrictions
            .iter()
            .find(|r| r.reservation_id == Some(reservation_id))
    }

    /// Restrictions overlapping `query`, boundary days included.
    /// Everything at index >= right_bound starts after `query.end`.
    pub fn overlapping(&self, query: &DateRange) -> impl Iterator<Item = &RoomRestriction> {
        let right_bound = self
            .restrictions
            .partition_point(|r| r.range.start <= query.end);
        self.restrictions[..right_bound]
            .iter()
            .filter(move |r| r.range.end >= query.start)
    }
}

/// Day-indexed occupancy tags; 0 means free.
pub type DayMap = BTreeMap<NaiveDate, u64>;

/// WAL record. Each variant is one atomic state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RoomCreated {
        room: Room,
    },
    /// Reservation and its booking restriction, committed together.
    ReservationCreated {
        reservation: Reservation,
        restriction_id: RestrictionId,
    },
    ReservationUpdated {
        id: ReservationId,
        room_id: RoomId,
        guest: Guest,
        updated_at: Ms,
    },
    ReservationProcessed {
        id: ReservationId,
        room_id: RoomId,
        processed: bool,
        updated_at: Ms,
    },
    ReservationDeleted {
        id: ReservationId,
        room_id: RoomId,
        restriction_id: Option<RestrictionId>,
    },
    BlockAdded {
        restriction: RoomRestriction,
    },
    BlockRemoved {
        id: RestrictionId,
        room_id: RoomId,
    },
    /// Written by compaction so ids of deleted rows are never issued again.
    IdSequences {
        next_reservation_id: ReservationId,
        next_restriction_id: RestrictionId,
    },
}

impl Event {
    /// Room whose restriction list the event changes, if any.
    pub fn room_id(&self) -> Option<RoomId> {
        match self {
            Event::RoomCreated { room } => Some(room.id),
            Event::ReservationCreated { reservation, .. } => Some(reservation.room_id),
            Event::ReservationUpdated { room_id, .. }
            | Event::ReservationProcessed { room_id, .. }
            | Event::ReservationDeleted { room_id, .. }
            | Event::BlockRemoved { room_id, .. } => Some(*room_id),
            Event::BlockAdded { restriction } => Some(restriction.room_id),
            Event::IdSequences { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        parse_date(s).unwrap()
    }

    fn range(a: &str, b: &str) -> DateRange {
        DateRange::new(d(a), d(b)).unwrap()
    }

    #[test]
    fn range_rejects_end_before_start() {
        assert!(DateRange::new(d("2024-01-05"), d("2024-01-04")).is_none());
        assert!(DateRange::new(d("2024-01-05"), d("2024-01-05")).is_some());
    }

    #[test]
    fn deserialized_range_keeps_ordering() {
        let ok: DateRange = serde_json::from_str(r#"{"start":"2024-03-10","end":"2024-03-12"}"#).unwrap();
        assert_eq!(ok, range("2024-03-10", "2024-03-12"));
        assert!(serde_json::from_str::<DateRange>(r#"{"start":"2024-03-14","end":"2024-03-11"}"#).is_err());

        let bytes = bincode::serialize(&DateRange::unchecked(d("2024-03-14"), d("2024-03-11"))).unwrap();
        assert!(bincode::deserialize::<DateRange>(&bytes).is_err());
    }

    #[test]
    fn range_touching_boundary_overlaps() {
        let a = range("2024-01-01", "2024-01-05");
        let b = range("2024-01-05", "2024-01-10");
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
    }

    #[test]
    fn range_disjoint() {
        let a = range("2024-01-01", "2024-01-05");
        let b = range("2024-01-06", "2024-01-10");
        assert!(!a.overlaps(&b));
        assert!(!b.overlaps(&a));
    }

    #[test]
    fn range_days_inclusive() {
        let r = range("2024-02-27", "2024-03-02");
        let days: Vec<_> = r.days().map(format_date).collect();
        assert_eq!(days, ["2024-02-27", "2024-02-28", "2024-02-29", "2024-03-01", "2024-03-02"]);
        assert_eq!(r.num_days(), 5);
    }

    #[test]
    fn clamp_to_month() {
        let r = range("2024-02-27", "2024-03-02");
        let march = YearMonth::new(2024, 3).unwrap().range();
        assert_eq!(r.clamp_to(&march), Some(range("2024-03-01", "2024-03-02")));
        let april = YearMonth::new(2024, 4).unwrap().range();
        assert_eq!(r.clamp_to(&april), None);
    }

    #[test]
    fn parse_date_format() {
        assert_eq!(parse_date("2024-03-10"), NaiveDate::from_ymd_opt(2024, 3, 10));
        assert_eq!(parse_date(" 2024-03-10 "), NaiveDate::from_ymd_opt(2024, 3, 10));
        assert!(parse_date("10/03/2024").is_none());
        assert!(parse_date("2024-02-30").is_none());
        assert_eq!(format_date(d("2024-03-01")), "2024-03-01");
    }

    #[test]
    fn month_lengths() {
        assert_eq!(YearMonth::new(2024, 3).unwrap().num_days(), 31);
        assert_eq!(YearMonth::new(2024, 2).unwrap().num_days(), 29);
        assert_eq!(YearMonth::new(2023, 2).unwrap().num_days(), 28);
        assert_eq!(YearMonth::new(2024, 4).unwrap().last_day(), d("2024-04-30"));
        assert!(YearMonth::new(2024, 13).is_none());
    }

    #[test]
    fn month_navigation() {
        let dec = YearMonth::new(2023, 12).unwrap();
        let jan = dec.next().unwrap();
        assert_eq!(jan, YearMonth::new(2024, 1).unwrap());
        assert_eq!(jan.prev().unwrap(), dec);
        assert_eq!(YearMonth::containing(d("2024-03-17")).to_string(), "2024-03");
    }

    #[test]
    fn month_parse() {
        assert_eq!(YearMonth::parse("2024-03"), YearMonth::new(2024, 3));
        assert!(YearMonth::parse("2024-3").is_none());
        assert!(YearMonth::parse("2024-00").is_none());
        assert!(YearMonth::parse("march").is_none());
    }

    #[test]
    fn restriction_kind_reference_data() {
        assert_eq!(RestrictionKind::Reservation.id(), 1);
        assert_eq!(RestrictionKind::OwnerBlock.id(), 2);
        assert_eq!(RestrictionKind::from_id(2), Some(RestrictionKind::OwnerBlock));
        assert_eq!(RestrictionKind::from_id(9), None);
        assert_eq!(RestrictionKind::OwnerBlock.name(), "Owner Block");
    }

    fn room_state() -> RoomState {
        RoomState::new(Room { id: 1, name: "Suite".into(), created_at: 0, updated_at: 0 })
    }

    #[test]
    fn restrictions_stay_sorted() {
        let mut rs = room_state();
        rs.insert_restriction(RoomRestriction::block(1, 1, range("2024-03-20", "2024-03-20"), 0));
        rs.insert_restriction(RoomRestriction::booking(2, 1, 7, range("2024-03-01", "2024-03-03"), 0));
        rs.insert_restriction(RoomRestriction::block(3, 1, range("2024-03-10", "2024-03-10"), 0));
        let starts: Vec<_> = rs.restrictions.iter().map(|r| r.id).collect();
        assert_eq!(starts, [2, 3, 1]);
    }

    #[test]
    fn overlapping_includes_boundary_days() {
        let mut rs = room_state();
        rs.insert_restriction(RoomRestriction::booking(1, 1, 7, range("2024-01-01", "2024-01-05"), 0));
        rs.insert_restriction(RoomRestriction::block(2, 1, range("2024-01-10", "2024-01-10"), 0));
        rs.insert_restriction(RoomRestriction::block(3, 1, range("2024-01-20", "2024-01-20"), 0));

        let hits: Vec<_> = rs.overlapping(&range("2024-01-05", "2024-01-10")).map(|r| r.id).collect();
        assert_eq!(hits, [1, 2]);

        let none: Vec<_> = rs.overlapping(&range("2024-01-11", "2024-01-19")).collect();
        assert!(none.is_empty());
    }

    #[test]
    fn overlapping_long_restriction_spanning_query() {
        let mut rs = room_state();
        rs.insert_restriction(RoomRestriction::block(1, 1, range("2024-01-01", "2024-12-31"), 0));
        assert_eq!(rs.overlapping(&range("2024-06-01", "2024-06-02")).count(), 1);
    }

    #[test]
    fn remove_restriction_by_id() {
        let mut rs = room_state();
        rs.insert_restriction(RoomRestriction::block(1, 1, range("2024-01-01", "2024-01-01"), 0));
        assert!(rs.remove_restriction(99).is_none());
        assert_eq!(rs.remove_restriction(1).map(|r| r.id), Some(1));
        assert!(rs.restrictions.is_empty());
    }

    #[test]
    fn event_bincode_roundtrip_with_dates() {
        let event = Event::BlockAdded {
            restriction: RoomRestriction::block(4, 2, range("2024-03-11", "2024-03-11"), 1_700_000_000_000),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
