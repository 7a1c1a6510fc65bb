mod app;
mod config;
mod db;
mod error;
mod feed;
mod models;
mod scheduler;

use app::App;
use config::Config;
use error::{AppError, Result};
use models::{FavouriteEntry, Sample, ScheduledEntry};

const USAGE: &str = "sensable-sync [--add <feed_id> [name] [unit] | --remove <id> | --list | \
                     --pin <feed_id> [name] [unit] | --favourites | --once]";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging (only show warnings and errors by default)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    // Parse command line arguments
    let args: Vec<String> = std::env::args().collect();

    // Load configuration
    let config = Config::load()?;

    let mut app = App::new(&config).await?;

    let result = run_command(&mut app, &args).await;
    app.shutdown().await;
    result
}

async fn run_command(app: &mut App, args: &[String]) -> Result<()> {
    match args.get(1).map(String::as_str) {
        Some("--add") => {
            let feed_id = args
                .get(2)
                .ok_or_else(|| AppError::Usage(USAGE.to_string()))?;
            let mut entry = ScheduledEntry::new(feed_id.as_str());
            if let Some(name) = args.get(3) {
                entry = entry.with_name(name.as_str());
            }
            if let Some(unit) = args.get(4) {
                entry = entry.with_unit(unit.as_str());
            }
            app.add_entry(entry).await?;
            println!("Scheduled {}", feed_id);
        }

        Some("--remove") => {
            let id: i64 = args
                .get(2)
                .and_then(|id| id.parse().ok())
                .ok_or_else(|| AppError::Usage(USAGE.to_string()))?;
            if app.remove_entry(id).await? {
                println!("Removed entry {}", id);
            } else {
                println!("No scheduled entry {}", id);
            }
        }

        Some("--list") => {
            for entry in app.entries().await? {
                let state = if entry.pending { "pending" } else { "idle" };
                println!(
                    "{:>5}  {:<24} {:<8} {}",
                    entry.id.unwrap_or_default(),
                    entry.feed_id,
                    state,
                    describe_sample(entry.sample.as_ref(), &entry.unit)
                );
            }
        }

        Some("--pin") => {
            let feed_id = args
                .get(2)
                .ok_or_else(|| AppError::Usage(USAGE.to_string()))?;
            let favourite = FavouriteEntry {
                feed_id: feed_id.clone(),
                name: args.get(3).cloned().unwrap_or_default(),
                unit: args.get(4).cloned().unwrap_or_default(),
                sample: None,
            };
            app.pin_favourite(&favourite).await?;
            println!("Pinned {}", feed_id);
        }

        Some("--favourites") => {
            for favourite in app.favourites().await? {
                println!(
                    "{:<24} {:<16} {}",
                    favourite.feed_id,
                    favourite.name,
                    describe_sample(favourite.sample.as_ref(), &favourite.unit)
                );
            }
        }

        // Headless single pass
        Some("--once") => match app.run_once().await? {
            Some(report) => println!(
                "Refreshed {} entries, {} failed",
                report.refreshed, report.failed
            ),
            None => println!("Another sensable-sync process is running the schedule"),
        },

        None => app.run().await?,

        Some(_) => return Err(AppError::Usage(USAGE.to_string())),
    }

    Ok(())
}

fn describe_sample(sample: Option<&Sample>, unit: &str) -> String {
    sample
        .map(|s| format!("{} {} at {}", s.value, unit, s.timestamp.to_rfc3339()))
        .unwrap_or_else(|| "no sample".to_string())
}
