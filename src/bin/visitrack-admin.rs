use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use visitrack::config::Config;
use visitrack::storage;

#[derive(Parser)]
#[command(name = "visitrack-admin")]
#[command(about = "Visitrack admin management CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the visitor tables if they do not exist
    Init,
    /// Show a visitor and its most recent visits as JSON
    Visitor {
        /// Session-scoped unique id of the visitor
        unique_id: String,
        /// Number of visits to show
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Show the number of stored visitors and visits
    Counts,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let mut config = Config::from_env()?;
    // One-shot commands gain nothing from the visitor cache
    config.database.visitor_cache_entries = 0;

    let storage = storage::open(&config.database).await?;

    // Ensure database is initialized
    storage.init().await?;

    match cli.command {
        Commands::Init => {
            println!("✓ Database initialized");
        }
        Commands::Visitor { unique_id, limit } => {
            let Some(visitor) = storage.find_visitor_by_unique_id(&unique_id).await? else {
                println!("⚠ No visitor with unique id '{}'", unique_id);
                return Ok(());
            };

            let visits = storage.list_visits(visitor.id, limit).await?;
            let output = json!({ "visitor": visitor, "visits": visits });
            println!(
                "{}",
                serde_json::to_string_pretty(&output).context("failed to format visitor")?
            );
        }
        Commands::Counts => {
            let visitors = storage.count_visitors().await?;
            let visits = storage.count_visits().await?;
            println!("{:<10} {}", "Visitors", visitors);
            println!("{:<10} {}", "Visits", visits);
        }
    }

    Ok(())
}
