//! Daily reconciliation sweep and weekly grace refill.
//!
//! The sweep runs once per reference-timezone day, shortly after midnight,
//! and settles yesterday for every user: a missed day either consumes a
//! grace token or breaks the streak. Both passes are idempotent so a crashed
//! or restarted scheduler can simply run them again.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::continuity::{week_start, ContinuityRecord, WEEKLY_GRACE_TOKENS};
use crate::error::CoreError;
use crate::storage::Database;

/// What the sweep did to one user's record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepEffect {
    /// Nothing owed: no streak, yesterday covered, or already settled.
    Untouched,
    /// A weekly token paid for the missed day.
    GraceConsumed,
    /// A bonus token paid for the missed day.
    BonusConsumed,
    /// No tokens left; the streak reset to zero.
    Broken,
}

/// Settle yesterday for `record`, given the sweep runs on `today`.
///
/// Weekly tokens are spent before bonus tokens. A consumed token records
/// yesterday in `grace_used_dates`, which both lets the next entry extend
/// across the gap and makes a repeated sweep a no-op.
pub fn apply_sweep(record: &mut ContinuityRecord, today: NaiveDate) -> SweepEffect {
    let yesterday = today - Duration::days(1);
    let last = match record.last_entry_date {
        Some(date) => date,
        None => return SweepEffect::Untouched,
    };
    if record.current_streak == 0 || last >= yesterday {
        return SweepEffect::Untouched;
    }
    if record.grace_used_dates.contains(&yesterday) {
        return SweepEffect::Untouched;
    }

    if record.grace_remaining > 0 {
        record.grace_remaining -= 1;
        record.grace_used_dates.insert(yesterday);
        SweepEffect::GraceConsumed
    } else if record.bonus_grace > 0 {
        record.bonus_grace -= 1;
        record.grace_used_dates.insert(yesterday);
        SweepEffect::BonusConsumed
    } else {
        record.current_streak = 0;
        SweepEffect::Broken
    }
}

/// Refill weekly tokens for the week starting at `monday`.
///
/// Returns `false` when the record was already reset for that week. Bonus
/// tokens are untouched; only the weekly allowance and its used-date marks
/// are wiped.
pub fn apply_weekly_reset(record: &mut ContinuityRecord, monday: NaiveDate) -> bool {
    if record.grace_week_anchor == Some(monday) {
        return false;
    }
    record.grace_remaining = WEEKLY_GRACE_TOKENS;
    record.grace_used_dates.clear();
    record.grace_week_anchor = Some(monday);
    true
}

/// Aggregate outcome of one daily sweep run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepSummary {
    pub evaluated: usize,
    pub untouched: usize,
    pub grace_consumed: usize,
    pub bonus_consumed: usize,
    pub broken: usize,
    pub failed: usize,
}

/// Run the daily sweep for every known user as of `today`.
///
/// A failing user is counted and skipped; one bad row must not stall the
/// rest of the population.
pub fn run_daily_sweep(db: &mut Database, today: NaiveDate) -> Result<SweepSummary, CoreError> {
    let users = db.list_continuity_users()?;
    let mut summary = SweepSummary::default();
    for user_id in &users {
        summary.evaluated += 1;
        match db.with_continuity(user_id, |record| apply_sweep(record, today)) {
            Ok((SweepEffect::Untouched, _)) => summary.untouched += 1,
            Ok((SweepEffect::GraceConsumed, _)) => summary.grace_consumed += 1,
            Ok((SweepEffect::BonusConsumed, _)) => summary.bonus_consumed += 1,
            Ok((SweepEffect::Broken, record)) => {
                summary.broken += 1;
                info!(user_id, longest = record.longest_streak, "streak broken");
            }
            Err(e) => {
                summary.failed += 1;
                warn!(user_id, error = %e, "sweep failed for user");
            }
        }
    }
    info!(date = %today, ?summary, "daily sweep finished");
    Ok(summary)
}

/// Aggregate outcome of one weekly reset run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetSummary {
    pub evaluated: usize,
    pub reset: usize,
    pub failed: usize,
}

/// Refill weekly tokens for every known user, for the week containing
/// `date`. Runs before the daily sweep at week boundaries so a token spent
/// on Sunday is still visible to Monday's sweep and entry handling.
pub fn run_weekly_reset(db: &mut Database, date: NaiveDate) -> Result<ResetSummary, CoreError> {
    let monday = week_start(date);
    let users = db.list_continuity_users()?;
    let mut summary = ResetSummary::default();
    for user_id in &users {
        summary.evaluated += 1;
        match db.with_continuity(user_id, |record| apply_weekly_reset(record, monday)) {
            Ok((true, _)) => summary.reset += 1,
            Ok((false, _)) => {}
            Err(e) => {
                summary.failed += 1;
                warn!(user_id, error = %e, "weekly reset failed for user");
            }
        }
    }
    info!(week_of = %monday, ?summary, "weekly grace reset finished");
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn active_record(streak: u32, last: NaiveDate) -> ContinuityRecord {
        let mut record = ContinuityRecord::new("ai");
        record.current_streak = streak;
        record.longest_streak = streak;
        record.last_entry_date = Some(last);
        record
    }

    #[test]
    fn sweep_ignores_users_without_history() {
        let mut record = ContinuityRecord::new("ai");
        assert_eq!(apply_sweep(&mut record, date(2026, 1, 11)), SweepEffect::Untouched);
        assert_eq!(record.grace_remaining, WEEKLY_GRACE_TOKENS);
    }

    #[test]
    fn sweep_ignores_users_who_recorded_yesterday_or_today() {
        let today = date(2026, 1, 11);
        for last in [date(2026, 1, 10), today] {
            let mut record = active_record(3, last);
            assert_eq!(apply_sweep(&mut record, today), SweepEffect::Untouched);
            assert_eq!(record.current_streak, 3);
        }
    }

    #[test]
    fn missed_day_consumes_weekly_grace_and_keeps_streak() {
        let mut record = active_record(5, date(2026, 1, 9));
        let effect = apply_sweep(&mut record, date(2026, 1, 11));
        assert_eq!(effect, SweepEffect::GraceConsumed);
        assert_eq!(record.current_streak, 5);
        assert_eq!(record.grace_remaining, 1);
        assert!(record.grace_used_dates.contains(&date(2026, 1, 10)));
    }

    #[test]
    fn weekly_grace_is_spent_before_bonus() {
        let mut record = active_record(5, date(2026, 1, 9));
        record.grace_remaining = 1;
        record.bonus_grace = 1;
        assert_eq!(apply_sweep(&mut record, date(2026, 1, 11)), SweepEffect::GraceConsumed);
        assert_eq!(record.grace_remaining, 0);
        assert_eq!(record.bonus_grace, 1);
    }

    #[test]
    fn bonus_grace_covers_when_weekly_is_exhausted() {
        let mut record = active_record(5, date(2026, 1, 9));
        record.grace_remaining = 0;
        record.bonus_grace = 2;
        assert_eq!(apply_sweep(&mut record, date(2026, 1, 11)), SweepEffect::BonusConsumed);
        assert_eq!(record.bonus_grace, 1);
        assert_eq!(record.current_streak, 5);
    }

    #[test]
    fn streak_breaks_when_no_tokens_remain() {
        let mut record = active_record(30, date(2026, 1, 9));
        record.grace_remaining = 0;
        record.bonus_grace = 0;
        assert_eq!(apply_sweep(&mut record, date(2026, 1, 11)), SweepEffect::Broken);
        assert_eq!(record.current_streak, 0);
        assert_eq!(record.longest_streak, 30);
        assert_eq!(record.last_entry_date, Some(date(2026, 1, 9)));
    }

    #[test]
    fn sweep_is_idempotent_for_the_same_day() {
        let mut record = active_record(5, date(2026, 1, 9));
        assert_eq!(apply_sweep(&mut record, date(2026, 1, 11)), SweepEffect::GraceConsumed);
        assert_eq!(apply_sweep(&mut record, date(2026, 1, 11)), SweepEffect::Untouched);
        assert_eq!(record.grace_remaining, 1);
    }

    #[test]
    fn broken_user_is_not_charged_again() {
        // Once current_streak is zero the sweep has nothing left to protect.
        let mut record = active_record(0, date(2026, 1, 5));
        record.grace_remaining = 2;
        assert_eq!(apply_sweep(&mut record, date(2026, 1, 11)), SweepEffect::Untouched);
        assert_eq!(record.grace_remaining, 2);
    }

    #[test]
    fn weekly_reset_refills_and_clears_used_dates() {
        let mut record = active_record(5, date(2026, 1, 10));
        record.grace_remaining = 0;
        record.bonus_grace = 3;
        record.grace_used_dates = BTreeSet::from([date(2026, 1, 8), date(2026, 1, 9)]);

        assert!(apply_weekly_reset(&mut record, date(2026, 1, 12)));
        assert_eq!(record.grace_remaining, WEEKLY_GRACE_TOKENS);
        assert!(record.grace_used_dates.is_empty());
        assert_eq!(record.bonus_grace, 3);
        assert_eq!(record.grace_week_anchor, Some(date(2026, 1, 12)));
    }

    #[test]
    fn weekly_reset_runs_once_per_week() {
        let mut record = ContinuityRecord::new("ai");
        assert!(apply_weekly_reset(&mut record, date(2026, 1, 12)));
        record.grace_remaining = 0;
        assert!(!apply_weekly_reset(&mut record, date(2026, 1, 12)));
        assert_eq!(record.grace_remaining, 0);
        assert!(apply_weekly_reset(&mut record, date(2026, 1, 19)));
        assert_eq!(record.grace_remaining, WEEKLY_GRACE_TOKENS);
    }
}
