//! Reminder pipeline: stages, per-user settings, minute targeting.

pub mod catalog;
pub mod targeting;

use std::collections::BTreeSet;

use chrono::NaiveTime;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Largest allowed follow-up sequence number.
pub const MAX_FOLLOW_UPS: u8 = 5;
/// Allowed range for the follow-up interval, in minutes.
pub const FOLLOW_UP_INTERVAL_MINUTES: (u32, u32) = (15, 180);

/// Which notification in the daily sequence is being evaluated or sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "n", rename_all = "snake_case")]
pub enum ReminderStage {
    /// The primary daily reminder at the user's configured time.
    Main,
    /// The nth timed chase after an unanswered main reminder, 1-based.
    FollowUp(u8),
}

impl ReminderStage {
    /// Build a follow-up stage, rejecting sequence numbers outside 1..=5.
    pub fn follow_up(n: u8) -> Result<Self, ValidationError> {
        if n == 0 || n > MAX_FOLLOW_UPS {
            return Err(ValidationError::OutOfRange {
                field: "follow_up".to_string(),
                value: i64::from(n),
                min: 1,
                max: i64::from(MAX_FOLLOW_UPS),
            });
        }
        Ok(ReminderStage::FollowUp(n))
    }

    pub fn is_follow_up(&self) -> bool {
        matches!(self, ReminderStage::FollowUp(_))
    }
}

impl std::fmt::Display for ReminderStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReminderStage::Main => write!(f, "main"),
            ReminderStage::FollowUp(n) => write!(f, "follow_up_{n}"),
        }
    }
}

/// Per-user reminder preferences. Written by the settings surface, read by
/// targeting. All times are the user's own wall clock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationSettings {
    pub user_id: String,
    pub enabled: bool,
    /// IANA zone id, e.g. "Asia/Tokyo".
    pub timezone: String,
    /// Local send time for the main reminder, "HH:MM".
    pub primary_time: String,
    /// Local weekdays the reminder fires on, 0 = Sunday through 6 = Saturday.
    /// Empty means every day.
    pub active_days: BTreeSet<u8>,
    pub follow_up_enabled: bool,
    pub follow_up_interval_minutes: u32,
    pub follow_up_max_count: u32,
}

impl NotificationSettings {
    /// Defaults for a user who has not customized anything: evening
    /// reminder in UTC, every day, two half-hourly chases.
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            enabled: true,
            timezone: "UTC".to_string(),
            primary_time: "21:30".to_string(),
            active_days: BTreeSet::new(),
            follow_up_enabled: true,
            follow_up_interval_minutes: 30,
            follow_up_max_count: 2,
        }
    }

    /// Reject malformed settings before they reach storage or targeting.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.tz()?;
        self.primary_time_of_day()?;
        let (min, max) = FOLLOW_UP_INTERVAL_MINUTES;
        if self.follow_up_interval_minutes < min || self.follow_up_interval_minutes > max {
            return Err(ValidationError::OutOfRange {
                field: "follow_up_interval_minutes".to_string(),
                value: i64::from(self.follow_up_interval_minutes),
                min: i64::from(min),
                max: i64::from(max),
            });
        }
        if self.follow_up_max_count == 0 || self.follow_up_max_count > u32::from(MAX_FOLLOW_UPS) {
            return Err(ValidationError::OutOfRange {
                field: "follow_up_max_count".to_string(),
                value: i64::from(self.follow_up_max_count),
                min: 1,
                max: i64::from(MAX_FOLLOW_UPS),
            });
        }
        if let Some(day) = self.active_days.iter().find(|d| **d > 6) {
            return Err(ValidationError::OutOfRange {
                field: "active_days".to_string(),
                value: i64::from(*day),
                min: 0,
                max: 6,
            });
        }
        Ok(())
    }

    /// Parsed timezone.
    pub fn tz(&self) -> Result<Tz, ValidationError> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| ValidationError::invalid("timezone", format!("unknown IANA zone id: {}", self.timezone)))
    }

    /// Parsed main-reminder time of day.
    pub fn primary_time_of_day(&self) -> Result<NaiveTime, ValidationError> {
        NaiveTime::parse_from_str(&self.primary_time, "%H:%M")
            .map_err(|_| ValidationError::invalid("primary_time", format!("expected HH:MM, got {}", self.primary_time)))
    }

    /// Whether the reminder fires on the given local weekday (0 = Sunday).
    pub fn fires_on(&self, weekday_from_sunday: u8) -> bool {
        self.active_days.is_empty() || self.active_days.contains(&weekday_from_sunday)
    }
}
