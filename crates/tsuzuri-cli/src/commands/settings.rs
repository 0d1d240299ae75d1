use std::collections::BTreeSet;

use clap::Subcommand;
use tsuzuri_core::storage::Database;
use tsuzuri_core::NotificationSettings;

#[derive(Subcommand)]
pub enum SettingsAction {
    /// Create or update notification preferences
    Set {
        #[arg(long)]
        user: String,
        /// Daily reminder time, HH:MM on the user's wall clock
        #[arg(long)]
        time: Option<String>,
        /// IANA timezone, e.g. "Asia/Tokyo"
        #[arg(long)]
        timezone: Option<String>,
        /// Master switch for all reminders
        #[arg(long)]
        enabled: Option<bool>,
        /// Active weekdays, comma-separated 0-6 with 0 = Sunday; "all"
        /// clears the restriction
        #[arg(long)]
        days: Option<String>,
        /// Whether follow-up nudges are sent after an unanswered reminder
        #[arg(long)]
        follow_up: Option<bool>,
        /// Minutes between follow-ups (15-180)
        #[arg(long)]
        interval: Option<u32>,
        /// Follow-up budget per day (1-5)
        #[arg(long)]
        max_count: Option<u32>,
    },
    /// Print a user's preferences as JSON
    Show {
        #[arg(long)]
        user: String,
    },
}

pub fn run(action: SettingsAction) -> Result<(), Box<dyn std::error::Error>> {
    let db = Database::open()?;
    match action {
        SettingsAction::Set {
            user,
            time,
            timezone,
            enabled,
            days,
            follow_up,
            interval,
            max_count,
        } => {
            let mut settings = db
                .settings(&user)?
                .unwrap_or_else(|| NotificationSettings::new(&user));
            if let Some(time) = time {
                settings.primary_time = time;
            }
            if let Some(timezone) = timezone {
                settings.timezone = timezone;
            }
            if let Some(enabled) = enabled {
                settings.enabled = enabled;
            }
            if let Some(days) = days {
                settings.active_days = parse_days(&days)?;
            }
            if let Some(follow_up) = follow_up {
                settings.follow_up_enabled = follow_up;
            }
            if let Some(interval) = interval {
                settings.follow_up_interval_minutes = interval;
            }
            if let Some(max_count) = max_count {
                settings.follow_up_max_count = max_count;
            }
            db.upsert_settings(&settings)?;
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
        SettingsAction::Show { user } => {
            let settings = db
                .settings(&user)?
                .unwrap_or_else(|| NotificationSettings::new(&user));
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
    }
    Ok(())
}

fn parse_days(days: &str) -> Result<BTreeSet<u8>, Box<dyn std::error::Error>> {
    if days == "all" {
        return Ok(BTreeSet::new());
    }
    days.split(',')
        .map(|d| d.trim().parse::<u8>().map_err(Into::into))
        .collect()
}
