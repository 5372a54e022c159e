use chrono::NaiveDate;

use crate::model::*;

#[derive(Debug)]
pub enum EngineError {
    RoomNotFound(RoomId),
    ReservationNotFound(ReservationId),
    RestrictionNotFound(RestrictionId),
    RoomExists(RoomId),
    InvalidRange {
        start: NaiveDate,
        end: NaiveDate,
    },
    InvalidDate(String),
    InvalidInput(&'static str),
    OutsideMonth {
        day: NaiveDate,
        month: YearMonth,
    },
    /// The room already has a restriction overlapping the requested days.
    Conflict {
        room_id: RoomId,
        restriction_id: RestrictionId,
    },
    NotABlock(RestrictionId),
    MissingSnapshot(RoomId),
    LimitExceeded(&'static str),
    Timeout(&'static str),
    WalError(String),
}

impl EngineError {
    /// Rejected before any store access; the caller should re-prompt.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            EngineError::RoomNotFound(_)
                | EngineError::InvalidRange { .. }
                | EngineError::InvalidDate(_)
                | EngineError::InvalidInput(_)
                | EngineError::OutsideMonth { .. }
                | EngineError::LimitExceeded(_)
        )
    }

    /// Lost a race for the same days; the caller should send the user back to search.
    pub fn is_conflict(&self) -> bool {
        matches!(self, EngineError::Conflict { .. })
    }

    /// Store unavailable or slow; the user may resubmit.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Timeout(_) | EngineError::WalError(_))
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::RoomNotFound(id) => write!(f, "room not found: {id}"),
            EngineError::ReservationNotFound(id) => write!(f, "reservation not found: {id}"),
            EngineError::RestrictionNotFound(id) => write!(f, "restriction not found: {id}"),
            EngineError::RoomExists(id) => write!(f, "room already exists: {id}"),
            EngineError::InvalidRange { start, end } => write!(
                f,
                "invalid date range: end {} is before start {}",
                format_date(*end),
                format_date(*start)
            ),
            EngineError::InvalidDate(s) => write!(f, "invalid date {s:?}: expected YYYY-MM-DD"),
            EngineError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            EngineError::OutsideMonth { day, month } => {
                write!(f, "{} is outside {month}", format_date(*day))
            }
            EngineError::Conflict { room_id, restriction_id } => write!(
                f,
                "room {room_id} is not available: conflicts with restriction {restriction_id}"
            ),
            EngineError::NotABlock(id) => {
                write!(f, "restriction {id} belongs to a reservation, not an owner block")
            }
            EngineError::MissingSnapshot(room_id) => {
                write!(f, "no calendar snapshot for room {room_id}: render the calendar first")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Timeout(op) => write!(f, "store timeout during {op}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
