//! Applies a day's first entry to the user's streak.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::continuity::{local_day_start, reference_date, ContinuityRecord};
use crate::error::CoreError;
use crate::storage::Database;

/// What an entry did to the streak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryEffect {
    /// An entry was already counted for this date; nothing changed.
    AlreadyRecorded,
    /// A broken or empty streak restarted at one.
    Started,
    /// The streak grew by one day.
    Extended,
}

/// Advance `record` for an entry written on `today`.
///
/// Transition order, first match wins:
/// 1. already counted today,
/// 2. no active streak: start at one,
/// 3. entry yesterday: extend,
/// 4. yesterday bridged by a grace token: extend across the gap,
/// 5. otherwise the streak is stale: restart at one.
///
/// `longest_streak` is brought up to `current_streak` on every change.
pub fn apply_entry(record: &mut ContinuityRecord, today: NaiveDate) -> EntryEffect {
    if record.recorded_on(today) {
        return EntryEffect::AlreadyRecorded;
    }
    let yesterday = today - Duration::days(1);

    let effect = if record.current_streak == 0 {
        record.current_streak = 1;
        EntryEffect::Started
    } else if record.last_entry_date == Some(yesterday)
        || record.grace_used_dates.contains(&yesterday)
    {
        record.current_streak += 1;
        EntryEffect::Extended
    } else {
        record.current_streak = 1;
        EntryEffect::Started
    };

    record.last_entry_date = Some(today);
    record.longest_streak = record.longest_streak.max(record.current_streak);
    effect
}

/// Record that `user_id` wrote an entry at `created_at`.
///
/// Updates the streak atomically, then stamps today's pending reminder log
/// rows with the entry time so follow-up chases stop. Returns the updated
/// record together with what happened.
pub fn record_entry(
    db: &mut Database,
    user_id: &str,
    created_at: DateTime<Utc>,
    reference_tz: Tz,
) -> Result<(EntryEffect, ContinuityRecord), CoreError> {
    let today = reference_date(created_at, reference_tz);
    let (effect, record) = db.with_continuity(user_id, |record| apply_entry(record, today))?;

    let day_start = local_day_start(reference_tz, today);
    let day_end = local_day_start(reference_tz, today + Duration::days(1));
    let stamped = db.backfill_entry_recorded(user_id, day_start, day_end, created_at)?;
    debug!(
        user_id,
        date = %today,
        ?effect,
        streak = record.current_streak,
        stamped,
        "entry applied to continuity"
    );
    Ok((effect, record))
}
