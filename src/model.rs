use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::limits::MINUTES_PER_DAY;

/// Minutes since midnight, as stored in the `SMALLINT` shift columns.
pub type Minute = i16;

pub type ShiftId = Uuid;
pub type MemberId = Uuid;
/// A rota: the set of members validated together.
pub type ProjectId = Uuid;

/// Day of the week in the storage encoding (`0 = Sunday`).
#[repr(i16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Day {
    Sunday = 0,
    Monday = 1,
    Tuesday = 2,
    Wednesday = 3,
    Thursday = 4,
    Friday = 5,
    Saturday = 6,
}

impl Day {
    pub const ALL: [Day; 7] = [
        Day::Sunday,
        Day::Monday,
        Day::Tuesday,
        Day::Wednesday,
        Day::Thursday,
        Day::Friday,
        Day::Saturday,
    ];

    pub fn index(self) -> usize {
        self as usize
    }
}

impl TryFrom<i16> for Day {
    type Error = InvalidInterval;

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        usize::try_from(value)
            .ok()
            .and_then(|i| Day::ALL.get(i).copied())
            .ok_or(InvalidInterval::DayOutOfRange(value))
    }
}

impl From<Day> for i16 {
    fn from(day: Day) -> Self {
        day as i16
    }
}

impl FromStr for Day {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sunday" => Ok(Day::Sunday),
            "monday" => Ok(Day::Monday),
            "tuesday" => Ok(Day::Tuesday),
            "wednesday" => Ok(Day::Wednesday),
            "thursday" => Ok(Day::Thursday),
            "friday" => Ok(Day::Friday),
            "saturday" => Ok(Day::Saturday),
            other => Err(format!("unknown day: {other}")),
        }
    }
}

impl fmt::Display for Day {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Day::Sunday => "Sunday",
            Day::Monday => "Monday",
            Day::Tuesday => "Tuesday",
            Day::Wednesday => "Wednesday",
            Day::Thursday => "Thursday",
            Day::Friday => "Friday",
            Day::Saturday => "Saturday",
        };
        write!(f, "{s}")
    }
}

/// Why a stored shift could not become a [`TimeInterval`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvalidInterval {
    DayOutOfRange(i16),
    MinuteOutOfRange(Minute),
    NotIncreasing { in_time: Minute, out_time: Minute },
}

impl fmt::Display for InvalidInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidInterval::DayOutOfRange(d) => write!(f, "day {d} outside 0..=6"),
            InvalidInterval::MinuteOutOfRange(m) => {
                write!(f, "minute {m} outside 0..={MINUTES_PER_DAY}")
            }
            InvalidInterval::NotIncreasing { in_time, out_time } => {
                write!(f, "in_time {in_time} is not before out_time {out_time}")
            }
        }
    }
}

impl std::error::Error for InvalidInterval {}

/// Half-open interval `[start, end)` within one day.
///
/// Field order gives the derived ordering: day, then start, then end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeInterval {
    pub day: Day,
    pub start: Minute,
    pub end: Minute,
}

impl TimeInterval {
    pub fn new(day: Day, start: Minute, end: Minute) -> Self {
        debug_assert!(
            0 <= start && start < end && end <= MINUTES_PER_DAY,
            "TimeInterval bounds must satisfy 0 <= start < end <= 1440"
        );
        Self { day, start, end }
    }

    pub fn duration(&self) -> Minute {
        self.end - self.start
    }

    /// Duration split into whole hours and remaining minutes.
    pub fn duration_hm(&self) -> (Minute, Minute) {
        let minutes = self.duration();
        (minutes / 60, minutes % 60)
    }

    pub fn overlaps(&self, other: &TimeInterval) -> bool {
        self.day == other.day && self.start < other.end && other.start < self.end
    }

    pub fn contains_minute(&self, t: Minute) -> bool {
        self.start <= t && t < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains(&self, other: &TimeInterval) -> bool {
        self.day == other.day && self.start <= other.start && other.end <= self.end
    }

    /// The overlapping part of two intervals, if any.
    pub fn intersection(&self, other: &TimeInterval) -> Option<TimeInterval> {
        if !self.overlaps(other) {
            return None;
        }
        Some(TimeInterval::new(
            self.day,
            self.start.max(other.start),
            self.end.min(other.end),
        ))
    }
}

pub fn overlaps(a: &TimeInterval, b: &TimeInterval) -> bool {
    a.overlaps(b)
}

/// Validate raw stored bounds and build the interval they describe.
pub fn normalize(day: i16, in_time: Minute, out_time: Minute) -> Result<TimeInterval, InvalidInterval> {
    let day = Day::try_from(day)?;
    for m in [in_time, out_time] {
        if !(0..=MINUTES_PER_DAY).contains(&m) {
            return Err(InvalidInterval::MinuteOutOfRange(m));
        }
    }
    if in_time >= out_time {
        return Err(InvalidInterval::NotIncreasing { in_time, out_time });
    }
    Ok(TimeInterval::new(day, in_time, out_time))
}

// ── Members ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgeBand {
    UnderTwo,
    TwoYearOld,
    ThreePlus,
}

impl AgeBand {
    pub const ALL: [AgeBand; 3] = [AgeBand::UnderTwo, AgeBand::TwoYearOld, AgeBand::ThreePlus];

    pub fn index(self) -> usize {
        self as usize
    }
}

impl FromStr for AgeBand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "under_two" => Ok(AgeBand::UnderTwo),
            "two_year_old" => Ok(AgeBand::TwoYearOld),
            "three_plus" => Ok(AgeBand::ThreePlus),
            other => Err(format!("unknown age band: {other}")),
        }
    }
}

impl fmt::Display for AgeBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AgeBand::UnderTwo => "under_two",
            AgeBand::TwoYearOld => "two_year_old",
            AgeBand::ThreePlus => "three_plus",
        };
        write!(f, "{s}")
    }
}

/// Role of a member on the rota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberKind {
    Staff,
    Child { age_band: AgeBand },
}

/// Which rota a member belongs to and in what role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Membership {
    pub project_id: ProjectId,
    pub kind: MemberKind,
}

impl Membership {
    pub fn staff(project_id: ProjectId) -> Self {
        Self { project_id, kind: MemberKind::Staff }
    }

    pub fn child(project_id: ProjectId, age_band: AgeBand) -> Self {
        Self {
            project_id,
            kind: MemberKind::Child { age_band },
        }
    }
}

/// Member id → membership. Ordered so iteration is deterministic.
///
/// A member belongs to exactly one project; headcounts never cross projects.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Roster {
    members: BTreeMap<MemberId, Membership>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: MemberId, membership: Membership) -> Option<Membership> {
        self.members.insert(id, membership)
    }

    pub fn remove(&mut self, id: &MemberId) -> Option<Membership> {
        self.members.remove(id)
    }

    pub fn get(&self, id: &MemberId) -> Option<Membership> {
        self.members.get(id).copied()
    }

    pub fn kind(&self, id: &MemberId) -> Option<MemberKind> {
        self.get(id).map(|m| m.kind)
    }

    pub fn project(&self, id: &MemberId) -> Option<ProjectId> {
        self.get(id).map(|m| m.project_id)
    }

    /// Members of one project only.
    pub fn for_project(&self, project_id: ProjectId) -> Roster {
        self.members
            .iter()
            .filter(|(_, m)| m.project_id == project_id)
            .map(|(id, m)| (*id, *m))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&MemberId, &Membership)> {
        self.members.iter()
    }
}

impl FromIterator<(MemberId, Membership)> for Roster {
    fn from_iter<I: IntoIterator<Item = (MemberId, Membership)>>(iter: I) -> Self {
        Self {
            members: iter.into_iter().collect(),
        }
    }
}

// ── Shifts ───────────────────────────────────────────────────────

/// One row of the `shifts` table, exactly as stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShiftRow {
    pub id: ShiftId,
    pub member_id: MemberId,
    pub day: i16,
    pub in_time: Minute,
    pub out_time: Minute,
}

impl ShiftRow {
    pub fn normalize(&self) -> Result<TimeInterval, InvalidInterval> {
        normalize(self.day, self.in_time, self.out_time)
    }
}

/// A validated interval tagged with the shift and member it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaggedInterval {
    pub shift_id: ShiftId,
    pub member_id: MemberId,
    pub interval: TimeInterval,
}

/// A child's attendance interval together with the band its ratio is taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildInterval {
    pub tagged: TaggedInterval,
    pub age_band: AgeBand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    InvalidInterval(InvalidInterval),
    UnknownMember,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::InvalidInterval(e) => write!(f, "invalid interval: {e}"),
            RejectReason::UnknownMember => write!(f, "member not on roster"),
        }
    }
}

/// A shift left out of computation at ingestion, kept for the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedShift {
    pub shift_id: ShiftId,
    pub member_id: MemberId,
    pub reason: RejectReason,
}

/// Journal record format. Flat, no nesting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    MemberRegistered {
        id: MemberId,
        project_id: ProjectId,
        kind: MemberKind,
    },
    MemberRemoved {
        id: MemberId,
    },
    ShiftAdded {
        id: ShiftId,
        member_id: MemberId,
        day: i16,
        in_time: Minute,
        out_time: Minute,
    },
    ShiftUpdated {
        id: ShiftId,
        member_id: MemberId,
        day: i16,
        in_time: Minute,
        out_time: Minute,
    },
    ShiftRemoved {
        id: ShiftId,
    },
}

impl Event {
    pub fn member_registered(id: MemberId, membership: Membership) -> Self {
        Event::MemberRegistered {
            id,
            project_id: membership.project_id,
            kind: membership.kind,
        }
    }

    pub fn shift_added(row: ShiftRow) -> Self {
        Event::ShiftAdded {
            id: row.id,
            member_id: row.member_id,
            day: row.day,
            in_time: row.in_time,
            out_time: row.out_time,
        }
    }

    pub fn shift_updated(row: ShiftRow) -> Self {
        Event::ShiftUpdated {
            id: row.id,
            member_id: row.member_id,
            day: row.day,
            in_time: row.in_time,
            out_time: row.out_time,
        }
    }

    /// The stored row an add/update event carries.
    pub fn shift_row(&self) -> Option<ShiftRow> {
        match *self {
            Event::ShiftAdded { id, member_id, day, in_time, out_time }
            | Event::ShiftUpdated { id, member_id, day, in_time, out_time } => Some(ShiftRow {
                id,
                member_id,
                day,
                in_time,
                out_time,
            }),
            _ => None,
        }
    }
}
