use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::*;

/// Two shifts of the same member that overlap on the same day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictFinding {
    pub member_id: MemberId,
    pub day: Day,
    /// The shift that starts first (ties broken by shift id).
    pub first: ShiftId,
    pub second: ShiftId,
    pub overlap: TimeInterval,
}

/// A maximal window in which fewer staff are present than the ratio rules require.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatioViolation {
    pub project_id: ProjectId,
    pub day: Day,
    pub window: TimeInterval,
    /// Peak required staff within the window.
    pub required: u32,
    /// Lowest staff headcount within the window.
    pub actual: u32,
    /// Largest `required - actual` at any point in the window.
    pub shortfall: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Finding {
    Conflict(ConflictFinding),
    RatioViolation(RatioViolation),
}

impl Finding {
    pub fn window(&self) -> TimeInterval {
        match self {
            Finding::Conflict(c) => c.overlap,
            Finding::RatioViolation(v) => v.window,
        }
    }

    /// Report order: day, window start, kind, then window end and ids.
    fn sort_key(&self) -> (Day, Minute, u8, Minute, Uuid, Uuid, Uuid) {
        let w = self.window();
        match self {
            Finding::Conflict(c) => (w.day, w.start, 0, w.end, c.member_id, c.first, c.second),
            Finding::RatioViolation(v) => (w.day, w.start, 1, w.end, v.project_id, Uuid::nil(), Uuid::nil()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReportSummary {
    pub conflicts: usize,
    pub ratio_violations: usize,
    pub rejected: usize,
}

/// Findings of one validation run, in a fixed order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub findings: Vec<Finding>,
    pub rejected: Vec<RejectedShift>,
}

impl ValidationReport {
    pub fn new(mut findings: Vec<Finding>, mut rejected: Vec<RejectedShift>) -> Self {
        findings.sort_by_key(Finding::sort_key);
        rejected.sort_by_key(|r| (r.shift_id, r.member_id));
        Self { findings, rejected }
    }

    pub fn with_rejected(self, rejected: Vec<RejectedShift>) -> Self {
        let mut all = self.rejected;
        all.extend(rejected);
        Self::new(self.findings, all)
    }

    /// Combine reports from disjoint partitions (e.g. one per day).
    pub fn merge(parts: impl IntoIterator<Item = ValidationReport>) -> Self {
        let mut findings = Vec::new();
        let mut rejected = Vec::new();
        for part in parts {
            findings.extend(part.findings);
            rejected.extend(part.rejected);
        }
        Self::new(findings, rejected)
    }

    pub fn is_clean(&self) -> bool {
        self.findings.is_empty() && self.rejected.is_empty()
    }

    pub fn conflicts(&self) -> impl Iterator<Item = &ConflictFinding> {
        self.findings.iter().filter_map(|f| match f {
            Finding::Conflict(c) => Some(c),
            Finding::RatioViolation(_) => None,
        })
    }

    pub fn ratio_violations(&self) -> impl Iterator<Item = &RatioViolation> {
        self.findings.iter().filter_map(|f| match f {
            Finding::RatioViolation(v) => Some(v),
            Finding::Conflict(_) => None,
        })
    }

    pub fn summary(&self) -> ReportSummary {
        ReportSummary {
            conflicts: self.conflicts().count(),
            ratio_violations: self.ratio_violations().count(),
            rejected: self.rejected.len(),
        }
    }

    /// Stable JSON rendering; identical reports give identical bytes.
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conflict(day: Day, start: Minute, end: Minute, first: u128) -> Finding {
        Finding::Conflict(ConflictFinding {
            member_id: Uuid::from_u128(1),
            day,
            first: Uuid::from_u128(first),
            second: Uuid::from_u128(first + 1),
            overlap: TimeInterval::new(day, start, end),
        })
    }

    fn violation(day: Day, start: Minute, end: Minute) -> Finding {
        Finding::RatioViolation(RatioViolation {
            project_id: Uuid::from_u128(1000),
            day,
            window: TimeInterval::new(day, start, end),
            required: 2,
            actual: 1,
            shortfall: 1,
        })
    }

    #[test]
    fn findings_ordered_by_day_start_kind() {
        let report = ValidationReport::new(
            vec![
                violation(Day::Monday, 0, 600),
                conflict(Day::Tuesday, 10, 20, 5),
                conflict(Day::Monday, 0, 30, 7),
                violation(Day::Sunday, 100, 200),
            ],
            vec![],
        );
        let windows: Vec<_> = report.findings.iter().map(|f| (f.window().day, f.window().start)).collect();
        assert_eq!(
            windows,
            vec![(Day::Sunday, 100), (Day::Monday, 0), (Day::Monday, 0), (Day::Tuesday, 10)]
        );
        assert!(matches!(report.findings[1], Finding::Conflict(_)));
        assert!(matches!(report.findings[2], Finding::RatioViolation(_)));
    }

    #[test]
    fn merge_equals_single_report() {
        let a = ValidationReport::new(vec![conflict(Day::Friday, 0, 10, 1)], vec![]);
        let b = ValidationReport::new(vec![violation(Day::Monday, 0, 10)], vec![]);
        let merged = ValidationReport::merge([a.clone(), b.clone()]);
        let direct = ValidationReport::new(
            vec![violation(Day::Monday, 0, 10), conflict(Day::Friday, 0, 10, 1)],
            vec![],
        );
        assert_eq!(merged, direct);
        assert_eq!(merged.to_json().unwrap(), ValidationReport::merge([b, a]).to_json().unwrap());
    }

    #[test]
    fn summary_counts() {
        let report = ValidationReport::new(
            vec![conflict(Day::Friday, 0, 10, 1), violation(Day::Monday, 0, 10)],
            vec![RejectedShift {
                shift_id: Uuid::from_u128(9),
                member_id: Uuid::from_u128(1),
                reason: RejectReason::UnknownMember,
            }],
        );
        assert_eq!(
            report.summary(),
            ReportSummary { conflicts: 1, ratio_violations: 1, rejected: 1 }
        );
        assert!(!report.is_clean());
        assert!(ValidationReport::default().is_clean());
    }

    #[test]
    fn json_tags_finding_kind() {
        let report = ValidationReport::new(vec![violation(Day::Sunday, 0, 600)], vec![]);
        let json = String::from_utf8(report.to_json().unwrap()).unwrap();
        assert!(json.contains(r#""kind": "ratio_violation""#), "{json}");
    }
}
