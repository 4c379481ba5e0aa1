use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use storage::FileStore;

/// Maintenance commands for the conversion server's transient file areas.
#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = "./data/uploads")]
    upload_dir: String,
    #[arg(long, default_value = "./data/downloads")]
    download_dir: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Delete files older than the given age. Meant to run from cron.
    Sweep {
        #[arg(long, default_value_t = 1.0)]
        max_age_hours: f64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let store = FileStore::new(&cli.upload_dir, &cli.download_dir)?;

    match cli.command {
        Command::Sweep { max_age_hours } => {
            let max_age = Duration::from_secs_f64(max_age_hours * 3600.0);
            let report = store.sweep_stale(max_age).await?;
            println!(
                "Deleted {} file(s), reclaimed {:.2} MB",
                report.deleted,
                report.bytes as f64 / (1024.0 * 1024.0)
            );
        }
    }

    Ok(())
}
