use chrono::Utc;
use chrono_tz::Tz;
use clap::Subcommand;
use tracing::{info, warn};
use tsuzuri_core::continuity::reference_date;
use tsuzuri_core::storage::{Config, Database};
use tsuzuri_core::{run_daily_sweep, run_tick, run_weekly_reset, WebPushTransport};

use crate::catalog::StaticCatalog;

#[derive(Subcommand)]
pub enum RemindAction {
    /// One targeting and delivery pass
    Tick {
        /// Evaluation instant, RFC 3339 (defaults to now)
        #[arg(long)]
        at: Option<String>,
    },
    /// Minute loop: boundary maintenance plus a tick, until interrupted
    Daemon,
}

pub fn run(action: RemindAction) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load_or_default();
    let tz = config.reference_tz()?;
    let transport = WebPushTransport::new(&config.push)?;
    let catalog = StaticCatalog::new();
    let rt = tokio::runtime::Runtime::new()?;

    match action {
        RemindAction::Tick { at } => {
            let now = super::parse_instant(at)?;
            let db = Database::open()?;
            let summary = rt.block_on(run_tick(&db, &transport, &catalog, now, tz))?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        RemindAction::Daemon => {
            let db = Database::open()?;
            let interval = config.daemon.tick_interval_secs.max(1);
            rt.block_on(daemon_loop(db, transport, catalog, tz, interval))
        }
    }
}

async fn daemon_loop(
    mut db: Database,
    transport: WebPushTransport,
    catalog: StaticCatalog,
    tz: Tz,
    interval_secs: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    info!(timezone = %tz, interval_secs, "reminder daemon started");

    // Catch up on any boundary that passed while the daemon was down.
    let mut current_day = reference_date(Utc::now(), tz);
    run_maintenance(&mut db, current_day);

    loop {
        sleep_to_boundary(interval_secs).await;

        let now = Utc::now();
        let today = reference_date(now, tz);
        if today != current_day {
            current_day = today;
            run_maintenance(&mut db, today);
        }

        if let Err(e) = run_tick(&db, &transport, &catalog, now, tz).await {
            warn!(error = %e, "tick failed");
        }
    }
}

/// Weekly reset strictly before the daily sweep, so the sweep spends
/// tokens from the right week's pool. Both are idempotent; failures are
/// logged and retried at the next boundary.
fn run_maintenance(db: &mut Database, today: chrono::NaiveDate) {
    match run_weekly_reset(db, today) {
        Ok(summary) => info!(date = %today, reset = summary.reset, "weekly reset pass"),
        Err(e) => warn!(error = %e, "weekly reset failed"),
    }
    match run_daily_sweep(db, today) {
        Ok(summary) => info!(
            date = %today,
            grace = summary.grace_consumed,
            bonus = summary.bonus_consumed,
            broken = summary.broken,
            "daily sweep pass"
        ),
        Err(e) => warn!(error = %e, "daily sweep failed"),
    }
}

/// Sleep until the next wall-clock multiple of the interval, so a
/// 60-second cadence lands inside every minute exactly once.
async fn sleep_to_boundary(interval_secs: u64) {
    let rem = Utc::now().timestamp().rem_euclid(interval_secs as i64) as u64;
    tokio::time::sleep(std::time::Duration::from_secs(interval_secs - rem)).await;
}
