pub mod config;
pub mod device;
pub mod entry;
pub mod remind;
pub mod settings;
pub mod streak;

use chrono::{DateTime, Utc};

/// Parse an optional `--at` RFC 3339 instant, defaulting to now.
pub fn parse_instant(at: Option<String>) -> Result<DateTime<Utc>, Box<dyn std::error::Error>> {
    match at {
        Some(s) => Ok(DateTime::parse_from_rfc3339(&s)?.with_timezone(&Utc)),
        None => Ok(Utc::now()),
    }
}
