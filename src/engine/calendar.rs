use std::collections::{BTreeSet, HashSet};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::limits::MAX_CALENDAR_SELECTIONS;
use crate::model::*;
use crate::observability;

use super::{Engine, EngineError};

// ── Calendar editing ─────────────────────────────────────────────

/// The block map of one room/month as it was when staff were shown the
/// calendar. A later edit is diffed against this, not against live state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSnapshot {
    pub room_id: RoomId,
    pub month: YearMonth,
    pub blocks: DayMap,
}

impl BlockSnapshot {
    /// Serialized form kept in a session between render and submit.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    pub fn blocked_days(&self) -> BTreeSet<NaiveDate> {
        self.blocks
            .iter()
            .filter(|(_, id)| **id != 0)
            .map(|(day, _)| *day)
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalendarChange {
    /// Insert a single-day owner block.
    Block(NaiveDate),
    /// Delete an owner-block restriction. `day` is the first day it covered
    /// in the snapshot, if it covered any.
    Unblock { day: Option<NaiveDate>, restriction_id: RestrictionId },
}

/// Minimal set of writes turning the snapshot into the submission.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CalendarDiff {
    pub deletes: Vec<RestrictionId>,
    pub inserts: Vec<NaiveDate>,
}

impl CalendarDiff {
    pub fn is_empty(&self) -> bool {
        self.deletes.is_empty() && self.inserts.is_empty()
    }
}

/// Per-day diff of a snapshot against the submitted "block this day" set.
///
/// - blocked in the snapshot, absent from the submission: delete its row.
/// - submitted, free in the snapshot: insert a single-day block.
/// - unchanged days: nothing.
///
/// Deleting a multi-day block row also frees its other days, so any of those
/// still submitted are re-inserted as single-day blocks.
pub fn diff_blocks(snapshot: &BlockSnapshot, submitted: &BTreeSet<NaiveDate>) -> Result<CalendarDiff, EngineError> {
    if submitted.len() > MAX_CALENDAR_SELECTIONS {
        return Err(EngineError::LimitExceeded("too many calendar selections"));
    }
    if let Some(day) = submitted.iter().find(|d| !snapshot.blocks.contains_key(d)) {
        return Err(EngineError::OutsideMonth { day: *day, month: snapshot.month });
    }

    let mut deletes = Vec::new();
    let mut deleted: HashSet<RestrictionId> = HashSet::new();
    for (day, id) in &snapshot.blocks {
        if *id != 0 && !submitted.contains(day) && deleted.insert(*id) {
            deletes.push(*id);
        }
    }

    let inserts = submitted
        .iter()
        .filter(|day| {
            let id = snapshot.blocks.get(day).copied().unwrap_or(0);
            id == 0 || deleted.contains(&id)
        })
        .copied()
        .collect();

    Ok(CalendarDiff { deletes, inserts })
}

#[derive(Debug)]
pub struct CalendarFailure {
    pub change: CalendarChange,
    pub error: EngineError,
}

/// Outcome of one calendar submission for one room. Each write is applied
/// on its own; a report with both applied writes and failures is a partial
/// success and the room is left in the mixed state it describes.
#[derive(Debug)]
pub struct CalendarEditReport {
    pub room_id: RoomId,
    pub month: YearMonth,
    pub added: Vec<(NaiveDate, RestrictionId)>,
    pub removed: Vec<RestrictionId>,
    pub failures: Vec<CalendarFailure>,
}

impl CalendarEditReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty() && (!self.added.is_empty() || !self.removed.is_empty())
    }

    pub fn change_count(&self) -> usize {
        self.added.len() + self.removed.len()
    }
}

impl Engine {
    /// Apply staff calendar selections for one room against the snapshot
    /// taken when the calendar was rendered.
    ///
    /// Input errors abort before any write. After that, deletes run first
    /// and then inserts, each as an independent write.
    pub async fn apply_calendar_edit(
        &self,
        snapshot: &BlockSnapshot,
        submitted: &BTreeSet<NaiveDate>,
    ) -> Result<CalendarEditReport, EngineError> {
        let diff = diff_blocks(snapshot, submitted)?;
        self.apply_calendar_diff(snapshot, diff).await
    }

    /// Apply a diff already computed by `diff_blocks` for `snapshot`.
    /// Only an unknown room is an error; every write failure goes in the
    /// report.
    pub async fn apply_calendar_diff(
        &self,
        snapshot: &BlockSnapshot,
        diff: CalendarDiff,
    ) -> Result<CalendarEditReport, EngineError> {
        if self.room_state(&snapshot.room_id).is_none() {
            return Err(EngineError::RoomNotFound(snapshot.room_id));
        }

        let mut report = CalendarEditReport {
            room_id: snapshot.room_id,
            month: snapshot.month,
            added: Vec::new(),
            removed: Vec::new(),
            failures: Vec::new(),
        };

        for id in diff.deletes {
            match self.remove_block(id).await {
                Ok(_) => {
                    metrics::counter!(observability::CALENDAR_CHANGES_TOTAL, "op" => "unblock", "outcome" => "ok").increment(1);
                    report.removed.push(id);
                }
                Err(error) => {
                    metrics::counter!(observability::CALENDAR_CHANGES_TOTAL, "op" => "unblock", "outcome" => "error").increment(1);
                    let day = snapshot.blocks.iter().find(|(_, v)| **v == id).map(|(day, _)| *day);
                    report.failures.push(CalendarFailure {
                        change: CalendarChange::Unblock { day, restriction_id: id },
                        error,
                    });
                }
            }
        }

        for day in diff.inserts {
            match self.add_block(snapshot.room_id, DateRange::single_day(day)).await {
                Ok(restriction) => {
                    metrics::counter!(observability::CALENDAR_CHANGES_TOTAL, "op" => "block", "outcome" => "ok").increment(1);
                    report.added.push((day, restriction.id));
                }
                Err(error) => {
                    metrics::counter!(observability::CALENDAR_CHANGES_TOTAL, "op" => "block", "outcome" => "error").increment(1);
                    report.failures.push(CalendarFailure { change: CalendarChange::Block(day), error });
                }
            }
        }

        Ok(report)
    }
}
