//! CLI for eventlink
//!
//! Subcommands:
//! - `listen`: subscribe to book events and log each processed purchase
//! - `publish`: publish a single book event (useful for smoke tests)

use std::time::Duration;

use clap::Parser;
use eventlink::client::BookPurchaseLogger;
use eventlink::config::{Settings, load_config};
use eventlink::utils::logging;
use eventlink::{EventBus, TransactionType};
use tracing::{error, info};

/// Upper bound on how long shutdown waits for queued events.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "eventlink")]
enum Command {
    /// Subscribe to a destination and log book events as they arrive
    Listen {
        /// Destination to subscribe to (default: configured delivery destination)
        #[arg(long)]
        destination: Option<String>,
    },
    /// Publish one book event and wait for it to be delivered
    Publish {
        #[arg(long)]
        user_id: String,
        #[arg(long)]
        book_id: i64,
        /// BORROW or PURCHASE
        #[arg(long, default_value = "PURCHASE")]
        transaction_type: TransactionType,
    },
}

#[tokio::main]
async fn main() {
    let settings = match load_config() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };
    logging::init(&settings.logging.level);

    let cmd = Command::parse();

    let result = match cmd {
        Command::Listen { destination } => run_listener(&settings, destination).await,
        Command::Publish {
            user_id,
            book_id,
            transaction_type,
        } => run_publish(&settings, user_id, book_id, transaction_type).await,
    };

    if let Err(e) = result {
        error!("eventlink failed: {e}");
        std::process::exit(1);
    }
}

async fn run_listener(
    settings: &Settings,
    destination: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let bus = EventBus::from_settings(settings)?;
    let destination = destination.unwrap_or_else(|| settings.delivery.destination.clone());
    let spec = bus.subscribe(&destination, BookPurchaseLogger)?;
    info!("Listening on {destination} as {}", spec.id);

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Exiting gracefully.");
    bus.shutdown(SHUTDOWN_GRACE).await;
    Ok(())
}

async fn run_publish(
    settings: &Settings,
    user_id: String,
    book_id: i64,
    transaction_type: TransactionType,
) -> Result<(), Box<dyn std::error::Error>> {
    let bus = EventBus::from_settings(settings)?;
    bus.publish_event(user_id, book_id, transaction_type);
    let manager = bus.manager().clone();
    bus.shutdown(SHUTDOWN_GRACE).await;

    if manager.is_disabled() {
        return Err("broker unreachable, event was not delivered".into());
    }
    Ok(())
}
