use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod catalog;
mod commands;

#[derive(Parser)]
#[command(name = "tsuzuri-cli", version, about = "Tsuzuri CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Journal entry events
    Entry {
        #[command(subcommand)]
        action: commands::entry::EntryAction,
    },
    /// Streak inspection and maintenance
    Streak {
        #[command(subcommand)]
        action: commands::streak::StreakAction,
    },
    /// Reminder targeting and delivery
    Remind {
        #[command(subcommand)]
        action: commands::remind::RemindAction,
    },
    /// Push subscription management
    Device {
        #[command(subcommand)]
        action: commands::device::DeviceAction,
    },
    /// Per-user notification preferences
    Settings {
        #[command(subcommand)]
        action: commands::settings::SettingsAction,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
}

fn main() {
    // Diagnostics go to stderr; stdout is reserved for command output.
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::new("tsuzuri_core=info,tsuzuri_cli=info,warn")
        }))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Entry { action } => commands::entry::run(action),
        Commands::Streak { action } => commands::streak::run(action),
        Commands::Remind { action } => commands::remind::run(action),
        Commands::Device { action } => commands::device::run(action),
        Commands::Settings { action } => commands::settings::run(action),
        Commands::Config { action } => commands::config::run(action),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
