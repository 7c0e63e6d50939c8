use chrono::DateTime;
use clap::{Parser, Subcommand};
use photofinder::prelude::*;
use std::error::Error;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "photofinder")]
#[command(about = "Maintenance tasks for the photo finder store", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Remove uploads older than the retention threshold.
    Purge {
        #[arg(short, long, help = "Retention in days (defaults to PURGE_AFTER_DAYS)")]
        days: Option<u32>,
    },
    /// Remove every upload and empty the consent log.
    DeleteAll,
    /// List stored uploads.
    Uploads,
    /// Print the consent log.
    Logs,
}

fn format_timestamp(timestamp: i64) -> String {
    DateTime::from_timestamp(timestamp, 0)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| timestamp.to_string())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    let db = Database::connect(&config.database_url).await?;
    let storage = Storage::new(config.upload_dir.clone());

    match cli.command {
        Commands::Purge { days } => {
            let days = days.unwrap_or(config.purge_after_days);
            let purged = purge_old(&storage, &db, days).await?;

            println!("Purged {} upload(s) older than {} day(s)", purged.len(), days);
            for filename in purged {
                println!("  {filename}");
            }
        }
        Commands::DeleteAll => {
            let deleted = delete_all(&storage, &db).await?;

            println!("Deleted {} file(s), records and logs cleared", deleted.len());
            for filename in deleted {
                println!("  {filename}");
            }
        }
        Commands::Uploads => {
            for record in list_uploads(&db).await? {
                let on_disk = StoredFilename::try_from(record.filename.as_str())
                    .map(|name| storage.exists(&name))
                    .unwrap_or(false);

                println!(
                    "{}\t{}\t{}{}",
                    record.id,
                    format_timestamp(record.timestamp),
                    record.filename,
                    if on_disk { "" } else { "\t(missing file)" }
                );
            }
        }
        Commands::Logs => {
            for entry in list_consent_log(&db).await? {
                println!(
                    "{}\t{}\t{}\t{}\t{}\t{}",
                    entry.id,
                    format_timestamp(entry.timestamp),
                    entry.action,
                    entry.meta,
                    entry.client_address.as_deref().unwrap_or("-"),
                    entry.client_agent.as_deref().unwrap_or("-"),
                );
            }
        }
    }

    db.close().await;

    Ok(())
}
