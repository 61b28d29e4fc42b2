use crate::model::Minute;

pub const MINUTES_PER_DAY: Minute = 1440;
pub const DAYS_PER_WEEK: usize = 7;

/// Default cap on rows loaded into a single validation pass.
pub const DEFAULT_MAX_SHIFTS_PER_PASS: usize = 200_000;

/// Largest children-per-staff ratio accepted from configuration.
pub const MAX_CHILDREN_PER_STAFF: u32 = 64;

/// Journal records written before the store rewrites it down to current state.
pub const DEFAULT_COMPACT_THRESHOLD: u64 = 1000;
