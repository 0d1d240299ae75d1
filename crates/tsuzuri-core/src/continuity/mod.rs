//! Continuity engine: per-user journaling streaks and grace tokens.
//!
//! A user's streak counts consecutive days with at least one entry, where
//! "day" is a calendar date in the configured reference timezone. Missed
//! days can be bridged by grace tokens (two per week, plus earned bonus
//! tokens) so a single skipped day does not erase months of momentum.
//!
//! State transitions are pure functions over [`ContinuityRecord`]; the
//! submodules wire them to storage:
//! - [`engine`] applies a new entry to the record,
//! - [`sweep`] reconciles missed days and refills weekly tokens,
//! - [`hook`] decouples entry creation from continuity updates.

pub mod engine;
pub mod hook;
pub mod sweep;

use std::collections::BTreeSet;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// Grace tokens granted to every user at the start of each week.
pub const WEEKLY_GRACE_TOKENS: u32 = 2;

/// Per-user streak state. One row per user, created lazily on first use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContinuityRecord {
    pub user_id: String,
    /// Length of the active streak in days. Zero means broken or never started.
    pub current_streak: u32,
    /// High-water mark; never decreases.
    pub longest_streak: u32,
    /// Most recent reference-timezone date with an entry.
    pub last_entry_date: Option<NaiveDate>,
    /// Weekly grace tokens still available this week.
    pub grace_remaining: u32,
    /// Dates already covered by a consumed token. Doubles as the sweep's
    /// idempotence marker: a covered date is never charged twice.
    pub grace_used_dates: BTreeSet<NaiveDate>,
    /// Earned tokens that persist across weekly resets.
    pub bonus_grace: u32,
    /// Monday of the week the last weekly reset ran for.
    pub grace_week_anchor: Option<NaiveDate>,
}

impl ContinuityRecord {
    /// Fresh state for a user with no history.
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            current_streak: 0,
            longest_streak: 0,
            last_entry_date: None,
            grace_remaining: WEEKLY_GRACE_TOKENS,
            grace_used_dates: BTreeSet::new(),
            bonus_grace: 0,
            grace_week_anchor: None,
        }
    }

    /// Whether the user already has an entry for `date`.
    pub fn recorded_on(&self, date: NaiveDate) -> bool {
        self.last_entry_date == Some(date)
    }
}

/// Calendar date of `instant` in the given timezone.
pub fn reference_date(instant: DateTime<Utc>, tz: Tz) -> NaiveDate {
    instant.with_timezone(&tz).date_naive()
}

/// Monday of the ISO week containing `date`. Anchors the weekly token reset.
pub fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
}

/// UTC instant of local midnight on `date` in `tz`.
///
/// During a spring-forward gap where midnight does not exist, the first
/// valid instant after it is used; an ambiguous midnight resolves to the
/// earlier of the two.
pub fn local_day_start(tz: Tz, date: NaiveDate) -> DateTime<Utc> {
    let midnight = date.and_time(NaiveTime::MIN);
    match tz.from_local_datetime(&midnight) {
        chrono::LocalResult::Single(dt) => dt.with_timezone(&Utc),
        chrono::LocalResult::Ambiguous(earlier, _) => earlier.with_timezone(&Utc),
        chrono::LocalResult::None => tz
            .from_local_datetime(&(midnight + Duration::hours(1)))
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|| DateTime::from_naive_utc_and_offset(midnight, Utc)),
    }
}
