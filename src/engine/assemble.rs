use std::collections::BTreeMap;

use crate::model::*;
use crate::store::ShiftSnapshot;

use super::conflict::find_conflicts;
use super::ratio::{RatioPolicy, RatioRules, validate_ratios};
use super::report::{Finding, ValidationReport};

/// Intervals of one project, split by role.
#[derive(Debug, Clone, Default)]
pub struct Crew {
    pub staff: Vec<TaggedInterval>,
    pub children: Vec<ChildInterval>,
}

/// Snapshot rows grouped by project and role, plus the rows left out.
#[derive(Debug, Clone, Default)]
pub struct Ingested {
    pub crews: BTreeMap<ProjectId, Crew>,
    pub rejected: Vec<RejectedShift>,
}

impl Ingested {
    /// Staff intervals of every project.
    pub fn staff(&self) -> impl Iterator<Item = &TaggedInterval> {
        self.crews.values().flat_map(|c| c.staff.iter())
    }
}

/// Normalize every row and file it under its member's project and role.
/// Malformed rows and rows of members not on the roster are collected, not dropped.
pub fn ingest(snapshot: &ShiftSnapshot, roster: &Roster) -> Ingested {
    let mut out = Ingested::default();
    for item in snapshot.intervals() {
        let tagged = match item {
            Ok(t) => t,
            Err(rejected) => {
                tracing::warn!(
                    "rejected shift {} of member {}: {}",
                    rejected.shift_id,
                    rejected.member_id,
                    rejected.reason
                );
                out.rejected.push(rejected);
                continue;
            }
        };
        let Some(Membership { project_id, kind }) = roster.get(&tagged.member_id) else {
            tracing::warn!(
                "rejected shift {}: member {} not on roster",
                tagged.shift_id,
                tagged.member_id
            );
            out.rejected.push(RejectedShift {
                shift_id: tagged.shift_id,
                member_id: tagged.member_id,
                reason: RejectReason::UnknownMember,
            });
            continue;
        };
        let crew = out.crews.entry(project_id).or_default();
        match kind {
            MemberKind::Staff => crew.staff.push(tagged),
            MemberKind::Child { age_band } => crew.children.push(ChildInterval { tagged, age_band }),
        }
    }
    out
}

/// Staff conflicts plus per-day ratio violations of one project, in report order.
///
/// Children are headcount only: a child booked twice is counted once and never
/// reported as a conflict.
pub fn assemble(
    project_id: ProjectId,
    staff: &[TaggedInterval],
    children: &[ChildInterval],
    rules: &RatioRules,
    policy: RatioPolicy,
) -> ValidationReport {
    let mut findings: Vec<Finding> = find_conflicts(staff).into_iter().map(Finding::Conflict).collect();

    for day in Day::ALL {
        let violations = validate_ratios(project_id, day, staff, children, rules, policy);
        if !violations.is_empty() {
            tracing::debug!("project {project_id} {day}: {} ratio violations", violations.len());
        }
        findings.extend(violations.into_iter().map(Finding::RatioViolation));
    }

    ValidationReport::new(findings, Vec::new())
}

/// Ingest, then assemble each project separately; rejected rows end up in the report.
pub fn validate_snapshot(
    snapshot: &ShiftSnapshot,
    roster: &Roster,
    rules: &RatioRules,
    policy: RatioPolicy,
) -> ValidationReport {
    let Ingested { crews, rejected } = ingest(snapshot, roster);
    ValidationReport::merge(
        crews
            .iter()
            .map(|(project_id, crew)| assemble(*project_id, &crew.staff, &crew.children, rules, policy)),
    )
    .with_rejected(rejected)
}
