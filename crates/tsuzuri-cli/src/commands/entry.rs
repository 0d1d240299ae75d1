use clap::Subcommand;
use tsuzuri_core::storage::{Config, Database};
use tsuzuri_core::EntryHook;

#[derive(Subcommand)]
pub enum EntryAction {
    /// Record that a journal entry was written
    Record {
        /// User the entry belongs to
        #[arg(long)]
        user: String,
        /// Entry creation instant, RFC 3339 (defaults to now)
        #[arg(long)]
        at: Option<String>,
    },
}

pub fn run(action: EntryAction) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        EntryAction::Record { user, at } => {
            let created_at = super::parse_instant(at)?;
            let config = Config::load_or_default();
            let tz = config.reference_tz()?;

            // The hook worker owns its own connection; drain it before
            // reading the updated record back.
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(async {
                let hook = EntryHook::spawn(Database::open()?, tz);
                hook.entry_created(&user, created_at);
                hook.shutdown().await;
                Ok::<(), Box<dyn std::error::Error>>(())
            })?;

            let db = Database::open()?;
            match db.continuity(&user)? {
                Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
                None => {
                    eprintln!("entry was not processed for user: {user}");
                    std::process::exit(1);
                }
            }
            Ok(())
        }
    }
}
