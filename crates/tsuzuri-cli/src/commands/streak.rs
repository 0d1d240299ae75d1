use chrono::{NaiveDate, Utc};
use clap::Subcommand;
use tsuzuri_core::continuity::reference_date;
use tsuzuri_core::storage::{Config, Database};
use tsuzuri_core::{run_daily_sweep, run_weekly_reset, ContinuityRecord};

#[derive(Subcommand)]
pub enum StreakAction {
    /// Print a user's continuity record as JSON
    Status {
        #[arg(long)]
        user: String,
    },
    /// Evaluate yesterday for every user, consuming grace or breaking streaks
    Sweep {
        /// Reference date, YYYY-MM-DD (defaults to today in the reference timezone)
        #[arg(long)]
        date: Option<String>,
    },
    /// Refill weekly grace tokens for the week containing a date
    ResetWeek {
        /// Any date inside the target week, YYYY-MM-DD (defaults to today)
        #[arg(long)]
        week_start: Option<String>,
    },
    /// Credit extra grace tokens to a user
    GrantBonus {
        #[arg(long)]
        user: String,
        /// Tokens to add
        #[arg(long, default_value = "1")]
        count: u32,
    },
}

pub fn run(action: StreakAction) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        StreakAction::Status { user } => {
            let db = Database::open()?;
            let record = db
                .continuity(&user)?
                .unwrap_or_else(|| ContinuityRecord::new(&user));
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        StreakAction::Sweep { date } => {
            let mut db = Database::open()?;
            let summary = run_daily_sweep(&mut db, parse_or_today(date)?)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        StreakAction::ResetWeek { week_start } => {
            let mut db = Database::open()?;
            let summary = run_weekly_reset(&mut db, parse_or_today(week_start)?)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        StreakAction::GrantBonus { user, count } => {
            let mut db = Database::open()?;
            let record = db.add_bonus_grace(&user, count)?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
    }
    Ok(())
}

fn parse_or_today(date: Option<String>) -> Result<NaiveDate, Box<dyn std::error::Error>> {
    match date {
        Some(s) => Ok(NaiveDate::parse_from_str(&s, "%Y-%m-%d")?),
        None => {
            let config = Config::load_or_default();
            Ok(reference_date(Utc::now(), config.reference_tz()?))
        }
    }
}
