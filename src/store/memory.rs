use std::io;
use std::path::Path;
use std::sync::{Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::journal::Journal;
use crate::limits::DEFAULT_COMPACT_THRESHOLD;
use crate::model::*;

use super::{RotaSnapshot, Scope, ShiftSnapshot, ShiftSource, StoreError};

/// Concurrent in-memory shift store, optionally backed by an edit journal.
///
/// Every mutation holds `gate` for writing and every snapshot holds it for
/// reading, so a snapshot never observes half of a batch.
pub struct InMemoryStore {
    shifts: DashMap<ShiftId, ShiftRow>,
    members: DashMap<MemberId, Membership>,
    gate: RwLock<()>,
    journal: Option<Mutex<Journal>>,
    compact_threshold: u64,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            shifts: DashMap::new(),
            members: DashMap::new(),
            gate: RwLock::new(()),
            journal: None,
            compact_threshold: DEFAULT_COMPACT_THRESHOLD,
        }
    }

    /// Rebuild a store from the journal at `path` and keep journaling to it.
    pub fn open_journal(path: &Path) -> io::Result<Self> {
        let (journal, replay) = Journal::open(path)?;
        let mut store = Self::new();
        for event in &replay.events {
            store.apply_unlocked(event);
        }
        tracing::info!(
            "replayed {} journal events from {}: {} members, {} shifts",
            replay.events.len(),
            path.display(),
            store.member_count(),
            store.shift_count()
        );
        store.journal = Some(Mutex::new(journal));
        Ok(store)
    }

    /// Rewrite the journal once this many records accumulate.
    pub fn with_compact_threshold(mut self, threshold: u64) -> Self {
        self.compact_threshold = threshold.max(1);
        self
    }

    fn read_gate(&self) -> RwLockReadGuard<'_, ()> {
        self.gate.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_gate(&self) -> RwLockWriteGuard<'_, ()> {
        self.gate.write().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Members ──────────────────────────────────────────────

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn register_member(&self, id: MemberId, membership: Membership) {
        let _gate = self.write_gate();
        self.members.insert(id, membership);
    }

    pub fn remove_member(&self, id: &MemberId) -> Option<Membership> {
        let _gate = self.write_gate();
        self.members.remove(id).map(|(_, m)| m)
    }

    // ── Shifts ───────────────────────────────────────────────

    pub fn shift_count(&self) -> usize {
        self.shifts.len()
    }

    pub fn get_shift(&self, id: &ShiftId) -> Option<ShiftRow> {
        self.shifts.get(id).map(|e| *e.value())
    }

    pub fn upsert_shift(&self, row: ShiftRow) -> Option<ShiftRow> {
        let _gate = self.write_gate();
        self.shifts.insert(row.id, row)
    }

    pub fn remove_shift(&self, id: &ShiftId) -> Option<ShiftRow> {
        let _gate = self.write_gate();
        self.shifts.remove(id).map(|(_, row)| row)
    }

    // ── Edits ────────────────────────────────────────────────

    /// Apply one edit without journaling it.
    pub fn apply_event(&self, event: &Event) {
        let _gate = self.write_gate();
        self.apply_unlocked(event);
    }

    fn apply_unlocked(&self, event: &Event) {
        match event {
            Event::MemberRegistered { id, project_id, kind } => {
                self.members.insert(
                    *id,
                    Membership {
                        project_id: *project_id,
                        kind: *kind,
                    },
                );
            }
            Event::MemberRemoved { id } => {
                self.members.remove(id);
            }
            Event::ShiftAdded { .. } | Event::ShiftUpdated { .. } => {
                if let Some(row) = event.shift_row() {
                    self.shifts.insert(row.id, row);
                }
            }
            Event::ShiftRemoved { id } => {
                self.shifts.remove(id);
            }
        }
    }

    /// Journal a batch of edits, then apply it as one step.
    ///
    /// Nothing is applied if the journal write fails. Once the journal holds
    /// more than the compaction threshold it is rewritten to the minimal
    /// history of the current state.
    pub fn record(&self, events: &[Event]) -> io::Result<()> {
        let Some(journal) = &self.journal else {
            let _gate = self.write_gate();
            events.iter().for_each(|e| self.apply_unlocked(e));
            return Ok(());
        };

        let mut journal = journal.lock().unwrap_or_else(PoisonError::into_inner);
        journal.record(events)?;
        {
            let _gate = self.write_gate();
            events.iter().for_each(|e| self.apply_unlocked(e));
        }

        if journal.records_since_rewrite() > self.compact_threshold {
            let before = journal.records_since_rewrite();
            let current = self.compacted_events();
            match journal.rewrite(&current) {
                Ok(()) => tracing::info!(
                    "compacted journal {}: {before} -> {} records",
                    journal.path().display(),
                    current.len()
                ),
                Err(e) => tracing::warn!("journal compaction failed, keeping full history: {e}"),
            }
        }
        Ok(())
    }

    /// Minimal event list that recreates the current state.
    pub fn compacted_events(&self) -> Vec<Event> {
        let _gate = self.read_gate();
        let mut members: Vec<(MemberId, Membership)> =
            self.members.iter().map(|e| (*e.key(), *e.value())).collect();
        members.sort_by_key(|(id, _)| *id);
        let mut rows: Vec<ShiftRow> = self.shifts.iter().map(|e| *e.value()).collect();
        rows.sort_by_key(|r| r.id);

        members
            .into_iter()
            .map(|(id, m)| Event::member_registered(id, m))
            .chain(rows.into_iter().map(Event::shift_added))
            .collect()
    }

    // ── Reads ────────────────────────────────────────────────

    pub fn shift_snapshot(&self, member_id: Option<MemberId>) -> ShiftSnapshot {
        let _gate = self.read_gate();
        self.shifts_where(|r| member_id.is_none_or(|m| r.member_id == m))
    }

    pub fn roster_snapshot(&self) -> Roster {
        let _gate = self.read_gate();
        self.members.iter().map(|e| (*e.key(), *e.value())).collect()
    }

    /// Shifts and roster of `scope` under one read of the gate.
    ///
    /// Project scope only returns shifts of that project's members, so shifts
    /// of unregistered members appear in [`Scope::All`] only.
    pub fn scoped_snapshot(&self, scope: Scope) -> RotaSnapshot {
        let _gate = self.read_gate();
        let roster: Roster = self
            .members
            .iter()
            .filter(|e| match scope {
                Scope::All => true,
                Scope::Project(p) => e.value().project_id == p,
                Scope::Member(m) => *e.key() == m,
            })
            .map(|e| (*e.key(), *e.value()))
            .collect();
        let shifts = match scope {
            Scope::All => self.shifts_where(|_| true),
            Scope::Project(_) => self.shifts_where(|r| roster.get(&r.member_id).is_some()),
            Scope::Member(m) => self.shifts_where(|r| r.member_id == m),
        };
        RotaSnapshot { shifts, roster }
    }

    fn shifts_where(&self, keep: impl Fn(&ShiftRow) -> bool) -> ShiftSnapshot {
        ShiftSnapshot::new(self.shifts.iter().map(|e| *e.value()).filter(|r| keep(r)).collect())
    }
}

#[async_trait]
impl ShiftSource for InMemoryStore {
    async fn load(&self, member_id: Option<MemberId>) -> Result<ShiftSnapshot, StoreError> {
        Ok(self.shift_snapshot(member_id))
    }

    async fn roster(&self) -> Result<Roster, StoreError> {
        Ok(self.roster_snapshot())
    }

    async fn snapshot(&self, scope: Scope) -> Result<RotaSnapshot, StoreError> {
        Ok(self.scoped_snapshot(scope))
    }
}
