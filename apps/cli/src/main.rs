use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use clap::Parser;
use client_core::{
    ControllerEvent, HttpConverterApi, LogLevel, MemoryStore, NavigationKind, SessionController,
};

/// Convert a FUB export against a running conversion server and fetch the
/// Sierra files.
#[derive(Parser, Debug)]
struct Args {
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    server_url: String,
    /// FUB CSV export to convert.
    #[arg(long)]
    file: PathBuf,
    /// Where to write the converted files.
    #[arg(long, default_value = "./sierra-output")]
    out_dir: PathBuf,
    /// Simulate the payment-provider redirect so downloads unlock.
    #[arg(long)]
    simulate_payment: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();
    let args = Args::parse();

    let file_name = args
        .file
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| anyhow!("--file must name a CSV file"))?
        .to_string();
    let bytes = std::fs::read(&args.file)
        .with_context(|| format!("failed to read {}", args.file.display()))?;

    let api = Arc::new(HttpConverterApi::new(args.server_url));
    let store = Arc::new(MemoryStore::new());
    let controller = SessionController::new(api, store, Utc::now());
    let mut events = controller.subscribe_events();

    controller.start(NavigationKind::Navigate, "").await;
    controller.select_file(&file_name, bytes).await;
    controller.convert().await;
    print_events(&mut events);

    let session = controller.session().await;
    if session.converted_files.is_empty() {
        return Err(anyhow!("conversion produced no files"));
    }
    println!("Converted {} file(s):", session.converted_files.len());
    for file in &session.converted_files {
        println!("  {} ({} rows)", file.filename, file.rows);
    }

    if !args.simulate_payment {
        println!("Re-run with --simulate-payment to unlock and fetch the downloads.");
        return Ok(());
    }

    // Mirror the return leg of the payment redirect.
    controller
        .start(NavigationKind::Navigate, "payment_success=true")
        .await;
    print_events(&mut events);

    let session = controller.session().await;
    if !session.payment_completed {
        return Err(anyhow!("payment verification did not complete"));
    }

    std::fs::create_dir_all(&args.out_dir)
        .with_context(|| format!("failed to create {}", args.out_dir.display()))?;
    for file in &session.converted_files {
        let bytes = controller.download_file(&file.path).await?;
        let target = args.out_dir.join(&file.filename);
        std::fs::write(&target, bytes)
            .with_context(|| format!("failed to write {}", target.display()))?;
        controller.acknowledge_download().await;
        println!("Saved {}", target.display());
    }
    print_events(&mut events);

    Ok(())
}

fn print_events(events: &mut tokio::sync::broadcast::Receiver<ControllerEvent>) {
    while let Ok(event) = events.try_recv() {
        match event {
            ControllerEvent::ConsoleLog { line, level } => match level {
                LogLevel::Error => eprintln!("{line}"),
                _ => println!("{line}"),
            },
            ControllerEvent::ErrorShown(message) => eprintln!("error: {message}"),
            ControllerEvent::Toast { message, .. } => println!("{message}"),
            _ => {}
        }
    }
}
