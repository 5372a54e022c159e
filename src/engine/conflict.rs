use chrono::{Datelike, NaiveDate};

use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

/// Parse a `YYYY-MM-DD` date coming from a form field.
pub fn parse_form_date(s: &str) -> Result<NaiveDate, EngineError> {
    let day = parse_date(s).ok_or_else(|| EngineError::InvalidDate(s.to_string()))?;
    validate_day(day)?;
    Ok(day)
}

/// Build a checked range from two form fields.
pub fn parse_form_range(start: &str, end: &str) -> Result<DateRange, EngineError> {
    range_of(parse_form_date(start)?, parse_form_date(end)?)
}

pub fn range_of(start: NaiveDate, end: NaiveDate) -> Result<DateRange, EngineError> {
    DateRange::new(start, end).ok_or(EngineError::InvalidRange { start, end })
}

pub(crate) fn validate_day(day: NaiveDate) -> Result<(), EngineError> {
    if !(MIN_YEAR..=MAX_YEAR).contains(&day.year()) {
        return Err(EngineError::LimitExceeded("date out of range"));
    }
    Ok(())
}

fn validate_order(range: &DateRange) -> Result<(), EngineError> {
    let (start, end) = (range.start(), range.end());
    if !range.is_ordered() {
        return Err(EngineError::InvalidRange { start, end });
    }
    validate_day(start)?;
    validate_day(end)
}

pub(crate) fn validate_query(range: &DateRange) -> Result<(), EngineError> {
    validate_order(range)?;
    if range.num_days() > MAX_QUERY_DAYS {
        return Err(EngineError::LimitExceeded("query range too wide"));
    }
    Ok(())
}

pub(crate) fn validate_stay(range: &DateRange) -> Result<(), EngineError> {
    validate_order(range)?;
    if range.num_days() > MAX_STAY_DAYS {
        return Err(EngineError::LimitExceeded("stay too long"));
    }
    Ok(())
}

pub(crate) fn validate_room_name(name: &str) -> Result<(), EngineError> {
    if name.trim().is_empty() {
        return Err(EngineError::InvalidInput("room name is required"));
    }
    if name.len() > MAX_ROOM_NAME_LEN {
        return Err(EngineError::LimitExceeded("room name too long"));
    }
    Ok(())
}

/// Reservation form rules: names and email required, first name at least
/// three characters, email shaped like `local@domain.tld`.
pub(crate) fn validate_guest(guest: &Guest) -> Result<(), EngineError> {
    let fields = [&guest.first_name, &guest.last_name, &guest.email, &guest.phone];
    if fields.iter().any(|f| f.len() > MAX_GUEST_FIELD_LEN) {
        return Err(EngineError::LimitExceeded("guest field too long"));
    }
    if guest.first_name.trim().is_empty() {
        return Err(EngineError::InvalidInput("first name is required"));
    }
    if guest.last_name.trim().is_empty() {
        return Err(EngineError::InvalidInput("last name is required"));
    }
    if guest.email.trim().is_empty() {
        return Err(EngineError::InvalidInput("email is required"));
    }
    if guest.first_name.trim().chars().count() < MIN_FIRST_NAME_LEN {
        return Err(EngineError::InvalidInput("first name must be at least 3 characters long"));
    }
    if !looks_like_email(guest.email.trim()) {
        return Err(EngineError::InvalidInput("invalid email address"));
    }
    Ok(())
}

fn looks_like_email(s: &str) -> bool {
    let Some((local, domain)) = s.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') || s.chars().any(char::is_whitespace) {
        return false;
    }
    match domain.rsplit_once('.') {
        Some((host, tld)) => !host.is_empty() && tld.len() >= 2,
        None => false,
    }
}

/// Any restriction on the room overlapping `range`, boundary days included,
/// is a conflict. Bookings and owner blocks are treated alike.
pub(crate) fn check_no_conflict(rs: &RoomState, range: &DateRange) -> Result<(), EngineError> {
    match rs.overlapping(range).next() {
        Some(existing) => Err(EngineError::Conflict {
            room_id: rs.room.id,
            restriction_id: existing.id,
        }),
        None => Ok(()),
    }
}
