use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::limits::MAX_CHILDREN_PER_STAFF;
use crate::model::*;

use super::report::RatioViolation;

/// Children each staff member may supervise, per age band (1:N).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RatioRules {
    pub under_two: u32,
    pub two_year_old: u32,
    pub three_plus: u32,
}

impl Default for RatioRules {
    fn default() -> Self {
        Self {
            under_two: 3,
            two_year_old: 4,
            three_plus: 8,
        }
    }
}

impl RatioRules {
    pub fn children_per_staff(&self, band: AgeBand) -> u32 {
        match band {
            AgeBand::UnderTwo => self.under_two,
            AgeBand::TwoYearOld => self.two_year_old,
            AgeBand::ThreePlus => self.three_plus,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for band in AgeBand::ALL {
            let n = self.children_per_staff(band);
            if n == 0 || n > MAX_CHILDREN_PER_STAFF {
                return Err(ConfigError::InvalidRules(format!(
                    "{band}: 1:{n} outside 1:1..=1:{MAX_CHILDREN_PER_STAFF}"
                )));
            }
        }
        Ok(())
    }
}

/// How a mixed group of children is turned into a staff requirement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RatioPolicy {
    /// Round up within each age band, then add the bands.
    #[default]
    PerBand,
    /// Add the fractional need of every band, then round up once.
    Pooled,
}

impl FromStr for RatioPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "per_band" => Ok(RatioPolicy::PerBand),
            "pooled" => Ok(RatioPolicy::Pooled),
            other => Err(format!("unknown ratio policy: {other}")),
        }
    }
}

impl fmt::Display for RatioPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RatioPolicy::PerBand => write!(f, "per_band"),
            RatioPolicy::Pooled => write!(f, "pooled"),
        }
    }
}

fn gcd(a: u64, b: u64) -> u64 {
    if b == 0 { a } else { gcd(b, a % b) }
}

/// Minimum staff for the given children per band (indexed by [`AgeBand::index`]).
/// Partial coverage is never enough, so every division rounds up.
pub fn required_staff(children: &[u32; 3], rules: &RatioRules, policy: RatioPolicy) -> u32 {
    match policy {
        RatioPolicy::PerBand => AgeBand::ALL
            .iter()
            .map(|&band| children[band.index()].div_ceil(rules.children_per_staff(band)))
            .sum(),
        RatioPolicy::Pooled => {
            // Exact integer sum of count/ratio over a common denominator.
            let lcm = AgeBand::ALL.iter().fold(1u64, |acc, &band| {
                let r = u64::from(rules.children_per_staff(band).max(1));
                acc / gcd(acc, r) * r
            });
            let numerator: u64 = AgeBand::ALL
                .iter()
                .map(|&band| {
                    let r = u64::from(rules.children_per_staff(band).max(1));
                    u64::from(children[band.index()]) * (lcm / r)
                })
                .sum();
            numerator.div_ceil(lcm) as u32
        }
    }
}

/// Merge sorted overlapping/adjacent `[start, end)` pairs into disjoint ones.
pub fn merge_overlapping(sorted: &[(Minute, Minute)]) -> Vec<(Minute, Minute)> {
    let mut merged: Vec<(Minute, Minute)> = Vec::new();
    for &(start, end) in sorted {
        if let Some(last) = merged.last_mut()
            && start <= last.1
        {
            last.1 = last.1.max(end);
            continue;
        }
        merged.push((start, end));
    }
    merged
}

/// Per-key merged spans on `day`, so one member is never counted twice at once.
fn presence<K: Ord + Copy>(day: Day, items: impl Iterator<Item = (K, TimeInterval)>) -> Vec<(K, Minute, Minute)> {
    let mut by_key: BTreeMap<K, Vec<(Minute, Minute)>> = BTreeMap::new();
    for (key, interval) in items.filter(|(_, i)| i.day == day) {
        by_key.entry(key).or_default().push((interval.start, interval.end));
    }
    let mut out = Vec::new();
    for (key, mut spans) in by_key {
        spans.sort();
        out.extend(merge_overlapping(&spans).into_iter().map(|(s, e)| (key, s, e)));
    }
    out
}

/// Headcounts over one stretch of a day during which nobody arrives or leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CoverageSlice {
    pub window: TimeInterval,
    pub staff: u32,
    /// Children present per band, indexed by [`AgeBand::index`].
    pub children: [u32; 3],
    pub required: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Slot {
    Staff,
    Child(AgeBand),
}

/// Sweep-line over staff and child presence on `day`.
///
/// Events are `+1` at start and `-1` at end; at equal timestamps ends sort before
/// starts so a handover is not double counted. Returns one slice per stretch
/// between consecutive distinct timestamps.
pub fn coverage(
    day: Day,
    staff: &[TaggedInterval],
    children: &[ChildInterval],
    rules: &RatioRules,
    policy: RatioPolicy,
) -> Vec<CoverageSlice> {
    let staff_spans = presence(day, staff.iter().map(|t| ((t.member_id, Slot::Staff), t.interval)));
    let child_spans = presence(
        day,
        children
            .iter()
            .map(|c| ((c.tagged.member_id, Slot::Child(c.age_band)), c.tagged.interval)),
    );

    let mut events: Vec<(Minute, i32, Slot)> = Vec::with_capacity((staff_spans.len() + child_spans.len()) * 2);
    for ((_, slot), start, end) in staff_spans.into_iter().chain(child_spans) {
        events.push((start, 1, slot));
        events.push((end, -1, slot));
    }
    events.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

    let mut slices = Vec::new();
    let mut staff_count: u32 = 0;
    let mut child_counts = [0u32; 3];
    let mut i = 0;

    while i < events.len() {
        let t = events[i].0;
        while let Some(&(time, delta, slot)) = events.get(i)
            && time == t
        {
            let counter = match slot {
                Slot::Staff => &mut staff_count,
                Slot::Child(band) => &mut child_counts[band.index()],
            };
            if delta > 0 {
                *counter += 1;
            } else {
                *counter -= 1;
            }
            i += 1;
        }

        let Some(&(next, _, _)) = events.get(i) else {
            break;
        };
        slices.push(CoverageSlice {
            window: TimeInterval::new(day, t, next),
            staff: staff_count,
            children: child_counts,
            required: required_staff(&child_counts, rules, policy),
        });
    }

    slices
}

/// Every maximal window on `day` where staff present fall short of the requirement.
/// Adjacent short slices are merged into one violation.
///
/// `staff` and `children` must all belong to `project_id`; headcounts never cross projects.
pub fn validate_ratios(
    project_id: ProjectId,
    day: Day,
    staff: &[TaggedInterval],
    children: &[ChildInterval],
    rules: &RatioRules,
    policy: RatioPolicy,
) -> Vec<RatioViolation> {
    let mut violations = Vec::new();
    let mut open: Option<RatioViolation> = None;

    for slice in coverage(day, staff, children, rules, policy) {
        if slice.staff >= slice.required {
            violations.extend(open.take());
            continue;
        }
        let shortfall = slice.required - slice.staff;
        match open.as_mut() {
            Some(v) if v.window.end == slice.window.start => {
                v.window.end = slice.window.end;
                v.required = v.required.max(slice.required);
                v.actual = v.actual.min(slice.staff);
                v.shortfall = v.shortfall.max(shortfall);
            }
            _ => {
                violations.extend(open.take());
                open = Some(RatioViolation {
                    project_id,
                    day,
                    window: slice.window,
                    required: slice.required,
                    actual: slice.staff,
                    shortfall,
                });
            }
        }
    }
    violations.extend(open);
    violations
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn staff(id: u128, member: u128, day: Day, start: Minute, end: Minute) -> TaggedInterval {
        TaggedInterval {
            shift_id: Uuid::from_u128(id),
            member_id: Uuid::from_u128(member),
            interval: TimeInterval::new(day, start, end),
        }
    }

    fn child(id: u128, member: u128, band: AgeBand, day: Day, start: Minute, end: Minute) -> ChildInterval {
        ChildInterval {
            tagged: staff(id, member, day, start, end),
            age_band: band,
        }
    }

    fn nursery() -> ProjectId {
        Uuid::from_u128(1000)
    }

    fn rules_1_3() -> RatioRules {
        RatioRules {
            under_two: 3,
            two_year_old: 3,
            three_plus: 3,
        }
    }

    // ── required_staff ───────────────────────────────────

    #[test]
    fn required_rounds_up() {
        let rules = rules_1_3();
        assert_eq!(required_staff(&[0, 0, 0], &rules, RatioPolicy::PerBand), 0);
        assert_eq!(required_staff(&[1, 0, 0], &rules, RatioPolicy::PerBand), 1);
        assert_eq!(required_staff(&[3, 0, 0], &rules, RatioPolicy::PerBand), 1);
        assert_eq!(required_staff(&[4, 0, 0], &rules, RatioPolicy::PerBand), 2);
    }

    #[test]
    fn mixed_bands_per_policy() {
        let rules = RatioRules::default(); // 1:3, 1:4, 1:8
        // 1 under-two + 1 three-plus: 1/3 + 1/8 < 1
        assert_eq!(required_staff(&[1, 0, 1], &rules, RatioPolicy::PerBand), 2);
        assert_eq!(required_staff(&[1, 0, 1], &rules, RatioPolicy::Pooled), 1);
        // 3 under-two + 4 two-year-olds + 8 three-plus: exactly 3 either way
        assert_eq!(required_staff(&[3, 4, 8], &rules, RatioPolicy::PerBand), 3);
        assert_eq!(required_staff(&[3, 4, 8], &rules, RatioPolicy::Pooled), 3);
        // one more three-plus tips pooled over
        assert_eq!(required_staff(&[3, 4, 9], &rules, RatioPolicy::Pooled), 4);
    }

    #[test]
    fn rules_validation() {
        assert!(RatioRules::default().validate().is_ok());
        let zero = RatioRules { under_two: 0, ..RatioRules::default() };
        assert!(zero.validate().is_err());
        let huge = RatioRules { three_plus: MAX_CHILDREN_PER_STAFF + 1, ..RatioRules::default() };
        assert!(huge.validate().is_err());
    }

    #[test]
    fn policy_parse() {
        assert_eq!("pooled".parse::<RatioPolicy>(), Ok(RatioPolicy::Pooled));
        assert_eq!(RatioPolicy::PerBand.to_string(), "per_band");
        assert!("strict".parse::<RatioPolicy>().is_err());
    }

    // ── merge_overlapping ────────────────────────────────

    #[test]
    fn merge_overlapping_basic() {
        let merged = merge_overlapping(&[(100, 300), (200, 400), (500, 600)]);
        assert_eq!(merged, vec![(100, 400), (500, 600)]);
    }

    #[test]
    fn merge_overlapping_adjacent() {
        assert_eq!(merge_overlapping(&[(100, 200), (200, 300)]), vec![(100, 300)]);
    }

    // ── coverage ─────────────────────────────────────────

    #[test]
    fn coverage_handover_not_double_counted() {
        let s = vec![
            staff(1, 1, Day::Monday, 0, 600),
            staff(2, 2, Day::Monday, 600, 1200),
        ];
        let slices = coverage(Day::Monday, &s, &[], &rules_1_3(), RatioPolicy::PerBand);
        assert_eq!(slices.len(), 2);
        assert!(slices.iter().all(|sl| sl.staff == 1));
    }

    #[test]
    fn coverage_counts_double_booked_member_once() {
        let s = vec![
            staff(1, 1, Day::Monday, 0, 600),
            staff(2, 1, Day::Monday, 300, 900),
        ];
        let slices = coverage(Day::Monday, &s, &[], &rules_1_3(), RatioPolicy::PerBand);
        assert_eq!(slices, vec![CoverageSlice {
            window: TimeInterval::new(Day::Monday, 0, 900),
            staff: 1,
            children: [0, 0, 0],
            required: 0,
        }]);
    }

    #[test]
    fn coverage_ignores_other_days() {
        let s = vec![staff(1, 1, Day::Tuesday, 0, 600)];
        assert!(coverage(Day::Monday, &s, &[], &rules_1_3(), RatioPolicy::PerBand).is_empty());
    }

    // ── validate_ratios ──────────────────────────────────

    #[test]
    fn four_children_one_staff_violates() {
        let s = vec![staff(1, 100, Day::Sunday, 0, 600)];
        let c: Vec<_> = (0..4)
            .map(|i| child(10 + i, 200 + i, AgeBand::UnderTwo, Day::Sunday, 0, 600))
            .collect();
        let v = validate_ratios(nursery(), Day::Sunday, &s, &c, &rules_1_3(), RatioPolicy::PerBand);
        assert_eq!(v, vec![RatioViolation {
            project_id: nursery(),
            day: Day::Sunday,
            window: TimeInterval::new(Day::Sunday, 0, 600),
            required: 2,
            actual: 1,
            shortfall: 1,
        }]);
    }

    #[test]
    fn enough_staff_no_violation() {
        let s = vec![
            staff(1, 100, Day::Sunday, 0, 600),
            staff(2, 101, Day::Sunday, 0, 600),
        ];
        let c: Vec<_> = (0..4)
            .map(|i| child(10 + i, 200 + i, AgeBand::UnderTwo, Day::Sunday, 0, 600))
            .collect();
        assert!(validate_ratios(nursery(), Day::Sunday, &s, &c, &rules_1_3(), RatioPolicy::PerBand).is_empty());
    }

    #[test]
    fn adjacent_short_slices_merge() {
        // Children arrive in two waves; staff never suffice. One merged violation.
        let s = vec![staff(1, 100, Day::Monday, 0, 600)];
        let mut c: Vec<_> = (0..4)
            .map(|i| child(10 + i, 200 + i, AgeBand::UnderTwo, Day::Monday, 0, 600))
            .collect();
        c.extend((0..3).map(|i| child(20 + i, 300 + i, AgeBand::UnderTwo, Day::Monday, 300, 600)));
        let v = validate_ratios(nursery(), Day::Monday, &s, &c, &rules_1_3(), RatioPolicy::PerBand);
        assert_eq!(v.len(), 1);
        assert_eq!(v[0].window, TimeInterval::new(Day::Monday, 0, 600));
        assert_eq!(v[0].required, 3);
        assert_eq!(v[0].actual, 1);
        assert_eq!(v[0].shortfall, 2);
    }

    #[test]
    fn gap_in_violation_splits_windows() {
        // Second staff covers the middle of the day only.
        let s = vec![
            staff(1, 100, Day::Monday, 0, 900),
            staff(2, 101, Day::Monday, 300, 600),
        ];
        let c: Vec<_> = (0..4)
            .map(|i| child(10 + i, 200 + i, AgeBand::UnderTwo, Day::Monday, 0, 900))
            .collect();
        let v = validate_ratios(nursery(), Day::Monday, &s, &c, &rules_1_3(), RatioPolicy::PerBand);
        let windows: Vec<_> = v.iter().map(|v| (v.window.start, v.window.end)).collect();
        assert_eq!(windows, vec![(0, 300), (600, 900)]);
    }

    #[test]
    fn unattended_children_require_staff() {
        let c = vec![child(10, 200, AgeBand::ThreePlus, Day::Friday, 480, 540)];
        let v = validate_ratios(nursery(), Day::Friday, &[], &c, &RatioRules::default(), RatioPolicy::PerBand);
        assert_eq!(v.len(), 1);
        assert_eq!((v[0].required, v[0].actual), (1, 0));
    }

    #[test]
    fn staff_leaving_as_child_arrives_is_a_handover() {
        // Staff A leaves at 600 exactly as staff B arrives; the child stays covered.
        let s = vec![
            staff(1, 100, Day::Monday, 0, 600),
            staff(2, 101, Day::Monday, 600, 900),
        ];
        let c = vec![child(10, 200, AgeBand::UnderTwo, Day::Monday, 0, 900)];
        assert!(validate_ratios(nursery(), Day::Monday, &s, &c, &rules_1_3(), RatioPolicy::PerBand).is_empty());
    }
}
