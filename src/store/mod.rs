//! Shift store adapter: translates persisted shift rows into tagged time intervals.
//!
//! Sources are injected handles. The engine never reaches a store through
//! global state; callers pass `&impl ShiftSource` into every validation pass.

mod memory;
mod postgres;

pub use memory::InMemoryStore;
pub use postgres::{PgShiftSource, parse_member_kind};

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::model::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Backing store unreachable. Never retried here.
    Unavailable(String),
    /// A row could be read but not decoded.
    Malformed(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Unavailable(e) => write!(f, "store unavailable: {e}"),
            StoreError::Malformed(e) => write!(f, "malformed row: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Which part of the rota a pass reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    All,
    Project(ProjectId),
    Member(MemberId),
}

/// Shifts and roster read at one instant, so every shift is judged against
/// the roster that existed alongside it.
#[derive(Debug, Clone)]
pub struct RotaSnapshot {
    pub shifts: ShiftSnapshot,
    pub roster: Roster,
}

/// Read-only access to a snapshot of shifts and the member roster.
#[async_trait]
pub trait ShiftSource: Send + Sync {
    /// Load every shift, or only those of `member_id`.
    async fn load(&self, member_id: Option<MemberId>) -> Result<ShiftSnapshot, StoreError>;

    async fn roster(&self) -> Result<Roster, StoreError>;

    /// Shifts and roster for `scope`, consistent with each other.
    async fn snapshot(&self, scope: Scope) -> Result<RotaSnapshot, StoreError>;
}

/// Immutable, cheaply clonable set of shift rows ordered by shift id.
///
/// Iterating never consumes the snapshot, so a pass can walk it as often as it needs.
#[derive(Debug, Clone)]
pub struct ShiftSnapshot {
    rows: Arc<[ShiftRow]>,
}

impl ShiftSnapshot {
    pub fn new(mut rows: Vec<ShiftRow>) -> Self {
        rows.sort_by_key(|r| r.id);
        Self { rows: rows.into() }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[ShiftRow] {
        &self.rows
    }

    /// Lazily translate each row; malformed rows come back as `Err`.
    pub fn intervals(&self) -> impl Iterator<Item = Result<TaggedInterval, RejectedShift>> + '_ {
        self.rows.iter().map(tag)
    }

    /// Rows stored against `day`. Rows with an out-of-range day are excluded.
    pub fn for_day(&self, day: Day) -> ShiftSnapshot {
        let rows = self
            .rows
            .iter()
            .filter(|r| r.day == i16::from(day))
            .copied()
            .collect::<Vec<_>>();
        Self { rows: rows.into() }
    }

    /// Rows whose day is not a valid day of the week.
    pub fn without_day(&self) -> ShiftSnapshot {
        let rows = self
            .rows
            .iter()
            .filter(|r| Day::try_from(r.day).is_err())
            .copied()
            .collect::<Vec<_>>();
        Self { rows: rows.into() }
    }
}

/// Translate one stored row into a tagged interval.
pub fn tag(row: &ShiftRow) -> Result<TaggedInterval, RejectedShift> {
    row.normalize()
        .map(|interval| TaggedInterval {
            shift_id: row.id,
            member_id: row.member_id,
            interval,
        })
        .map_err(|e| RejectedShift {
            shift_id: row.id,
            member_id: row.member_id,
            reason: RejectReason::InvalidInterval(e),
        })
}
