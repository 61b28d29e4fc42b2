use std::collections::BTreeMap;

use crate::model::*;

use super::report::ConflictFinding;

/// Find every pair of overlapping intervals belonging to the same member on the same day.
///
/// Each `(member, day)` group is sorted by start (ties by shift id) and swept once.
/// The running maximum end gates the common case: an interval starting at or after
/// it overlaps nothing seen so far. Otherwise it is compared only against the
/// still-active intervals, so the cost is O(n log n + k) for k overlapping pairs.
pub fn find_conflicts(intervals: &[TaggedInterval]) -> Vec<ConflictFinding> {
    let mut groups: BTreeMap<(MemberId, Day), Vec<&TaggedInterval>> = BTreeMap::new();
    for t in intervals {
        groups.entry((t.member_id, t.interval.day)).or_default().push(t);
    }

    let mut findings = Vec::new();
    for ((member_id, day), mut group) in groups {
        group.sort_by_key(|t| (t.interval.start, t.shift_id));
        sweep_group(member_id, day, &group, &mut findings);
    }
    findings
}

fn sweep_group(
    member_id: MemberId,
    day: Day,
    group: &[&TaggedInterval],
    findings: &mut Vec<ConflictFinding>,
) {
    let mut active: Vec<&TaggedInterval> = Vec::new();
    let mut max_end: Minute = 0;

    for &current in group {
        if current.interval.start >= max_end {
            active.clear();
        } else {
            active.retain(|a| a.interval.end > current.interval.start);
            for earlier in &active {
                let Some(overlap) = earlier.interval.intersection(&current.interval) else {
                    continue;
                };
                findings.push(ConflictFinding {
                    member_id,
                    day,
                    first: earlier.shift_id,
                    second: current.shift_id,
                    overlap,
                });
            }
        }
        max_end = max_end.max(current.interval.end);
        active.push(current);
    }
}

/// Reference O(n²) pairwise check. Same findings as [`find_conflicts`], any order.
pub fn find_conflicts_pairwise(intervals: &[TaggedInterval]) -> Vec<ConflictFinding> {
    let mut findings = Vec::new();
    for (i, a) in intervals.iter().enumerate() {
        for b in &intervals[i + 1..] {
            if a.member_id != b.member_id {
                continue;
            }
            let Some(overlap) = a.interval.intersection(&b.interval) else {
                continue;
            };
            let (first, second) = if (a.interval.start, a.shift_id) <= (b.interval.start, b.shift_id) {
                (a, b)
            } else {
                (b, a)
            };
            findings.push(ConflictFinding {
                member_id: a.member_id,
                day: a.interval.day,
                first: first.shift_id,
                second: second.shift_id,
                overlap,
            });
        }
    }
    findings
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn shift(id: u128, member: u128, day: Day, start: Minute, end: Minute) -> TaggedInterval {
        TaggedInterval {
            shift_id: Uuid::from_u128(id),
            member_id: Uuid::from_u128(member),
            interval: TimeInterval::new(day, start, end),
        }
    }

    fn sorted(mut v: Vec<ConflictFinding>) -> Vec<ConflictFinding> {
        v.sort_by_key(|c| (c.member_id, c.day, c.first, c.second));
        v
    }

    #[test]
    fn single_overlap_found() {
        let shifts = vec![
            shift(1, 1, Day::Monday, 480, 720),
            shift(2, 1, Day::Monday, 700, 900),
        ];
        let found = find_conflicts(&shifts);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].first, Uuid::from_u128(1));
        assert_eq!(found[0].second, Uuid::from_u128(2));
        assert_eq!(found[0].overlap, TimeInterval::new(Day::Monday, 700, 720));
    }

    #[test]
    fn touching_shifts_do_not_conflict() {
        let shifts = vec![
            shift(1, 1, Day::Monday, 480, 720),
            shift(2, 1, Day::Monday, 720, 900),
        ];
        assert!(find_conflicts(&shifts).is_empty());
    }

    #[test]
    fn different_members_or_days_do_not_conflict() {
        let shifts = vec![
            shift(1, 1, Day::Monday, 480, 720),
            shift(2, 2, Day::Monday, 480, 720),
            shift(3, 1, Day::Tuesday, 480, 720),
        ];
        assert!(find_conflicts(&shifts).is_empty());
    }

    #[test]
    fn nested_shifts_report_every_pair() {
        // A covers both B and C, which also overlap each other.
        let shifts = vec![
            shift(1, 1, Day::Friday, 0, 600),
            shift(2, 1, Day::Friday, 60, 120),
            shift(3, 1, Day::Friday, 90, 300),
        ];
        let found = find_conflicts(&shifts);
        assert_eq!(found.len(), 3);
        assert_eq!(sorted(found), sorted(find_conflicts_pairwise(&shifts)));
    }

    #[test]
    fn identical_start_ties_break_on_id() {
        let shifts = vec![
            shift(9, 1, Day::Sunday, 100, 200),
            shift(4, 1, Day::Sunday, 100, 150),
        ];
        let found = find_conflicts(&shifts);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].first, Uuid::from_u128(4));
        assert_eq!(found[0].second, Uuid::from_u128(9));
    }

    #[test]
    fn sweep_matches_pairwise_on_dense_week() {
        // Deterministic pseudo-random fragments across three members and a full week.
        let mut seed: u64 = 0x5eed;
        let mut next = move || {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (seed >> 33) as i16
        };
        let mut shifts = Vec::new();
        for id in 0..300u128 {
            let member = id % 3;
            let day = Day::ALL[(next().rem_euclid(7)) as usize];
            let start = next().rem_euclid(1380);
            let len = 1 + next().rem_euclid(240);
            let end = (start + len).min(1440);
            shifts.push(shift(id, member, day, start, end));
        }

        let sweep = find_conflicts(&shifts);
        let brute = find_conflicts_pairwise(&shifts);
        assert_eq!(sweep.len(), brute.len());
        assert_eq!(sorted(sweep), sorted(brute));
    }

    #[test]
    fn empty_input() {
        assert!(find_conflicts(&[]).is_empty());
    }
}
