use clap::Subcommand;
use tsuzuri_core::storage::Database;
use tsuzuri_core::{register_device, unregister_device};

#[derive(Subcommand)]
pub enum DeviceAction {
    /// Attach a Web Push subscription to a user
    Register {
        #[arg(long)]
        user: String,
        /// Push service endpoint URL
        #[arg(long)]
        endpoint: String,
        /// Client public key, base64url
        #[arg(long)]
        p256dh: String,
        /// Client auth secret, base64url
        #[arg(long)]
        auth: String,
        /// Browser user agent, kept for display
        #[arg(long)]
        user_agent: Option<String>,
    },
    /// Remove a subscription by endpoint
    Unregister {
        #[arg(long)]
        user: String,
        #[arg(long)]
        endpoint: String,
    },
    /// List a user's subscriptions as JSON
    List {
        #[arg(long)]
        user: String,
    },
}

pub fn run(action: DeviceAction) -> Result<(), Box<dyn std::error::Error>> {
    let db = Database::open()?;
    match action {
        DeviceAction::Register {
            user,
            endpoint,
            p256dh,
            auth,
            user_agent,
        } => {
            let id = register_device(&db, &user, &endpoint, &p256dh, &auth, user_agent.as_deref())?;
            println!("{id}");
        }
        DeviceAction::Unregister { user, endpoint } => {
            if unregister_device(&db, &user, &endpoint)? {
                println!("removed");
            } else {
                println!("endpoint not registered");
            }
        }
        DeviceAction::List { user } => {
            let devices = db.list_devices(&user)?;
            println!("{}", serde_json::to_string_pretty(&devices)?);
        }
    }
    Ok(())
}
