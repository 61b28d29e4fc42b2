use std::collections::{BTreeMap, HashMap};

use crate::limits::DAYS_PER_WEEK;
use crate::model::*;
use crate::observability::LIVE_DAYS_REVALIDATED_TOTAL;
use crate::store::ShiftSnapshot;

use super::assemble::validate_snapshot;
use super::ratio::{RatioPolicy, RatioRules};
use super::report::ValidationReport;

/// A rota kept in memory with per-day cached results.
///
/// Conflicts and ratio windows never cross midnight, so each day validates on
/// its own. An edit only invalidates the days it touches and [`LiveRota::report`]
/// recomputes just those.
pub struct LiveRota {
    rules: RatioRules,
    policy: RatioPolicy,
    roster: Roster,
    rows: HashMap<ShiftId, ShiftRow>,
    days: [BTreeMap<ShiftId, ShiftRow>; DAYS_PER_WEEK],
    /// Rows whose stored day is outside 0..=6.
    undated: BTreeMap<ShiftId, ShiftRow>,
    cache: [Option<ValidationReport>; DAYS_PER_WEEK],
}

impl LiveRota {
    pub fn new(rules: RatioRules, policy: RatioPolicy) -> Self {
        Self {
            rules,
            policy,
            roster: Roster::new(),
            rows: HashMap::new(),
            days: Default::default(),
            undated: BTreeMap::new(),
            cache: Default::default(),
        }
    }

    pub fn from_snapshot(snapshot: &ShiftSnapshot, roster: Roster, rules: RatioRules, policy: RatioPolicy) -> Self {
        let mut live = Self::new(rules, policy);
        live.roster = roster;
        for row in snapshot.rows() {
            live.insert_row(*row);
        }
        live
    }

    pub fn shift_count(&self) -> usize {
        self.rows.len()
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn apply(&mut self, event: &Event) {
        match event {
            Event::MemberRegistered { id, project_id, kind } => {
                self.roster.insert(
                    *id,
                    Membership {
                        project_id: *project_id,
                        kind: *kind,
                    },
                );
                self.invalidate_member(id);
            }
            Event::MemberRemoved { id } => {
                self.roster.remove(id);
                self.invalidate_member(id);
            }
            Event::ShiftAdded { .. } | Event::ShiftUpdated { .. } => {
                if let Some(row) = event.shift_row() {
                    self.remove_row(&row.id);
                    self.insert_row(row);
                }
            }
            Event::ShiftRemoved { id } => self.remove_row(id),
        }
    }

    /// Days whose cached result is stale.
    pub fn dirty_days(&self) -> Vec<Day> {
        Day::ALL
            .into_iter()
            .filter(|d| self.cache[d.index()].is_none())
            .collect()
    }

    /// Current report, revalidating only dirty days.
    pub fn report(&mut self) -> ValidationReport {
        for day in Day::ALL {
            if self.cache[day.index()].is_some() {
                continue;
            }
            let snapshot = ShiftSnapshot::new(self.days[day.index()].values().copied().collect());
            let report = validate_snapshot(&snapshot, &self.roster, &self.rules, self.policy);
            tracing::debug!("revalidated {day}: {} findings", report.findings.len());
            metrics::counter!(LIVE_DAYS_REVALIDATED_TOTAL).increment(1);
            self.cache[day.index()] = Some(report);
        }

        let undated = ShiftSnapshot::new(self.undated.values().copied().collect());
        let undated_report = validate_snapshot(&undated, &self.roster, &self.rules, self.policy);

        ValidationReport::merge(
            self.cache
                .iter()
                .flatten()
                .cloned()
                .chain(std::iter::once(undated_report)),
        )
    }

    fn insert_row(&mut self, row: ShiftRow) {
        match Day::try_from(row.day) {
            Ok(day) => {
                self.days[day.index()].insert(row.id, row);
                self.cache[day.index()] = None;
            }
            Err(_) => {
                self.undated.insert(row.id, row);
            }
        }
        self.rows.insert(row.id, row);
    }

    fn remove_row(&mut self, id: &ShiftId) {
        let Some(old) = self.rows.remove(id) else {
            return;
        };
        match Day::try_from(old.day) {
            Ok(day) => {
                self.days[day.index()].remove(id);
                self.cache[day.index()] = None;
            }
            Err(_) => {
                self.undated.remove(id);
            }
        }
    }

    fn invalidate_member(&mut self, member: &MemberId) {
        for day in Day::ALL {
            if self.days[day.index()].values().any(|r| r.member_id == *member) {
                self.cache[day.index()] = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn row(id: u128, member: u128, day: i16, in_time: Minute, out_time: Minute) -> ShiftRow {
        ShiftRow {
            id: Uuid::from_u128(id),
            member_id: Uuid::from_u128(member),
            day,
            in_time,
            out_time,
        }
    }

    fn live() -> LiveRota {
        let mut live = LiveRota::new(RatioRules::default(), RatioPolicy::PerBand);
        live.apply(&Event::member_registered(Uuid::from_u128(1), Membership::staff(Uuid::from_u128(1000))));
        live
    }

    #[test]
    fn fresh_rota_is_all_dirty() {
        let live = live();
        assert_eq!(live.dirty_days().len(), 7);
    }

    #[test]
    fn edit_dirties_only_touched_days() {
        let mut live = live();
        live.apply(&Event::shift_added(row(10, 1, 1, 480, 720)));
        live.report();
        assert!(live.dirty_days().is_empty());

        live.apply(&Event::shift_updated(row(10, 1, 3, 480, 720)));
        assert_eq!(live.dirty_days(), vec![Day::Monday, Day::Wednesday]);

        live.report();
        live.apply(&Event::ShiftRemoved { id: Uuid::from_u128(10) });
        assert_eq!(live.dirty_days(), vec![Day::Wednesday]);
    }

    #[test]
    fn member_edit_dirties_days_worked() {
        let mut live = live();
        live.apply(&Event::shift_added(row(10, 1, 2, 480, 720)));
        live.apply(&Event::shift_added(row(11, 1, 5, 480, 720)));
        live.report();

        live.apply(&Event::MemberRemoved { id: Uuid::from_u128(1) });
        assert!(live.roster().is_empty());
        assert_eq!(live.dirty_days(), vec![Day::Tuesday, Day::Friday]);
        assert_eq!(live.report().summary().rejected, 2);
    }

    #[test]
    fn moving_child_between_projects_changes_coverage() {
        let mut live = live();
        let kid = Uuid::from_u128(2);
        live.apply(&Event::member_registered(kid, Membership::child(Uuid::from_u128(2000), AgeBand::ThreePlus)));
        live.apply(&Event::shift_added(row(10, 1, 4, 480, 720)));
        live.apply(&Event::shift_added(row(11, 2, 4, 480, 720)));
        assert_eq!(live.report().summary().ratio_violations, 1);

        live.apply(&Event::member_registered(kid, Membership::child(Uuid::from_u128(1000), AgeBand::ThreePlus)));
        assert_eq!(live.dirty_days(), vec![Day::Thursday]);
        assert!(live.report().is_clean());
    }

    #[test]
    fn undated_rows_are_reported_as_rejected() {
        let mut live = live();
        live.apply(&Event::shift_added(row(10, 1, 8, 480, 720)));
        let report = live.report();
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(
            report.rejected[0].reason,
            RejectReason::InvalidInterval(InvalidInterval::DayOutOfRange(8))
        );

        live.apply(&Event::ShiftRemoved { id: Uuid::from_u128(10) });
        assert_eq!(live.shift_count(), 0);
        assert!(live.report().is_clean());
    }

    #[test]
    fn removing_unknown_shift_is_noop() {
        let mut live = live();
        live.report();
        live.apply(&Event::ShiftRemoved { id: Uuid::from_u128(99) });
        assert!(live.dirty_days().is_empty());
    }
}
