mod assemble;
mod conflict;
mod error;
mod live;
mod ratio;
mod report;

pub use assemble::{Crew, Ingested, assemble, ingest, validate_snapshot};
pub use conflict::{find_conflicts, find_conflicts_pairwise};
pub use error::EngineError;
pub use live::LiveRota;
pub use ratio::{CoverageSlice, RatioPolicy, RatioRules, coverage, merge_overlapping, required_staff, validate_ratios};
pub use report::{ConflictFinding, Finding, RatioViolation, ReportSummary, ValidationReport};

use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use crate::limits::DEFAULT_MAX_SHIFTS_PER_PASS;
use crate::model::*;
use crate::observability;
use crate::store::{RotaSnapshot, Scope, ShiftSource};

/// Validation entry point. Holds only immutable settings; every pass gets its
/// source handle from the caller and works on a private snapshot.
#[derive(Debug, Clone, Copy)]
pub struct Engine {
    pub rules: RatioRules,
    pub policy: RatioPolicy,
    pub max_shifts: usize,
}

impl Engine {
    pub fn new(rules: RatioRules, policy: RatioPolicy) -> Self {
        Self {
            rules,
            policy,
            max_shifts: DEFAULT_MAX_SHIFTS_PER_PASS,
        }
    }

    pub fn with_max_shifts(mut self, max_shifts: usize) -> Self {
        self.max_shifts = max_shifts;
        self
    }

    /// Read shifts and roster of `scope` as one snapshot. Failures are counted and passed up untouched.
    async fn load(
        &self,
        source: &impl ShiftSource,
        scope: Scope,
        label: &'static str,
    ) -> Result<RotaSnapshot, EngineError> {
        let snapshot = match source.snapshot(scope).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("{label} pass abandoned: {e}");
                metrics::counter!(observability::STORE_FAILURES_TOTAL).increment(1);
                observability::record_failure(label);
                return Err(e.into());
            }
        };
        if snapshot.shifts.len() > self.max_shifts {
            observability::record_failure(label);
            return Err(EngineError::LimitExceeded("too many shifts in one pass"));
        }
        Ok(snapshot)
    }

    /// Full-week validation of everything the source holds.
    pub async fn validate(&self, source: &impl ShiftSource) -> Result<ValidationReport, EngineError> {
        let started = Instant::now();
        let RotaSnapshot { shifts, roster } = self.load(source, Scope::All, "week").await?;
        let report = validate_snapshot(&shifts, &roster, &self.rules, self.policy);
        self.finish("week", &report, started);
        Ok(report)
    }

    /// Full-week validation of one project's members and their shifts.
    pub async fn validate_project(
        &self,
        source: &impl ShiftSource,
        project_id: ProjectId,
    ) -> Result<ValidationReport, EngineError> {
        let started = Instant::now();
        let RotaSnapshot { shifts, roster } = self.load(source, Scope::Project(project_id), "project").await?;
        let report = validate_snapshot(&shifts, &roster, &self.rules, self.policy);
        self.finish("project", &report, started);
        Ok(report)
    }

    /// Conflict detection for one member. Ratios need the whole day so they are not checked,
    /// and a child member never has conflicts.
    pub async fn validate_member(
        &self,
        source: &impl ShiftSource,
        member_id: MemberId,
    ) -> Result<ValidationReport, EngineError> {
        let started = Instant::now();
        let RotaSnapshot { shifts, roster } = self.load(source, Scope::Member(member_id), "member").await?;
        let ingested = ingest(&shifts, &roster);
        let staff: Vec<TaggedInterval> = ingested
            .staff()
            .filter(|t| t.member_id == member_id)
            .copied()
            .collect();
        let findings = find_conflicts(&staff).into_iter().map(Finding::Conflict).collect();
        let report = ValidationReport::new(findings, ingested.rejected);
        self.finish("member", &report, started);
        Ok(report)
    }

    pub async fn validate_day(&self, source: &impl ShiftSource, day: Day) -> Result<ValidationReport, EngineError> {
        let started = Instant::now();
        let RotaSnapshot { shifts, roster } = self.load(source, Scope::All, "day").await?;
        let report = validate_snapshot(&shifts.for_day(day), &roster, &self.rules, self.policy);
        self.finish("day", &report, started);
        Ok(report)
    }

    /// Same result as [`Engine::validate`], with each day on its own blocking worker.
    pub async fn validate_week_parallel(
        &self,
        source: &impl ShiftSource,
    ) -> Result<ValidationReport, EngineError> {
        let started = Instant::now();
        let RotaSnapshot { shifts: snapshot, roster } = self.load(source, Scope::All, "week_parallel").await?;
        let roster = Arc::new(roster);

        let workers = Day::ALL.into_iter().map(|day| {
            let day_snapshot = snapshot.for_day(day);
            let roster = roster.clone();
            let (rules, policy) = (self.rules, self.policy);
            tokio::task::spawn_blocking(move || validate_snapshot(&day_snapshot, &roster, &rules, policy))
        });
        let mut parts = futures::future::try_join_all(workers).await.map_err(|e| {
            observability::record_failure("week_parallel");
            EngineError::WorkerFailed(e.to_string())
        })?;
        parts.push(validate_snapshot(&snapshot.without_day(), &roster, &self.rules, self.policy));

        let report = ValidationReport::merge(parts);
        self.finish("week_parallel", &report, started);
        Ok(report)
    }

    fn finish(&self, scope: &'static str, report: &ValidationReport, started: Instant) {
        let summary = report.summary();
        info!(
            "{scope} pass: {} conflicts, {} ratio violations, {} rejected in {:?}",
            summary.conflicts,
            summary.ratio_violations,
            summary.rejected,
            started.elapsed()
        );
        observability::record_report(scope, report, started.elapsed().as_secs_f64());
    }
}
