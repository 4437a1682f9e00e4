use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tillscan_core::{ScanConfig, ScanSubmission, barcode};
use tillscan_server::{ScanService, Scheme};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{BarcodeCommand, Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Serve {
            port,
            plain,
            config,
        } => serve(port, plain, config).await,
        Commands::Barcode(command) => run_barcode(command),
    }
}

async fn serve(port: Option<u16>, plain: bool, config_path: Option<PathBuf>) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut config = load_config(config_path)?;
    if plain {
        config.force_plaintext = true;
    }
    let preferred = port.unwrap_or(config.preferred_port);

    let service = ScanService::new(config);
    let status = service
        .start(preferred, Box::new(print_scan))
        .await
        .context("could not start the scan service")?;

    println!("Scan page: {}", status.advertised_url);
    if status.scheme == Scheme::Http {
        println!("Serving without TLS; phones will send scans in the clear.");
    }
    if status.address.is_fallback() {
        println!("No LAN address was detected; the URL may only work on this machine.");
    }
    println!("Press Ctrl-C to stop.");

    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    info!("shutting down");
    service.stop().await;
    Ok(())
}

fn load_config(explicit: Option<PathBuf>) -> Result<ScanConfig> {
    if let Some(path) = explicit {
        return ScanConfig::load(&path).with_context(|| format!("loading {}", path.display()));
    }
    let default_path = PathBuf::from("tillscan.toml");
    if default_path.exists() {
        return ScanConfig::load(&default_path).context("loading tillscan.toml");
    }
    warn!("No config file at {}. Using defaults.", default_path.display());
    let mut config = ScanConfig::default();
    config.apply_env();
    Ok(config)
}

/// Scan callback for the foreground service: one line per delivered code.
fn print_scan(submission: ScanSubmission) {
    println!("{}", scan_line(&submission));
}

fn scan_line(submission: &ScanSubmission) -> String {
    match barcode::extract_subject_key(&submission.code) {
        Ok(key) if barcode::validate(&submission.code) => {
            format!(
                "{}  {}  subject key {key}",
                submission.received_at, submission.code
            )
        }
        _ => format!(
            "{}  {}  (unrecognized format)",
            submission.received_at, submission.code
        ),
    }
}

fn run_barcode(command: BarcodeCommand) -> Result<()> {
    match command {
        BarcodeCommand::Generate { key } => {
            let code = barcode::generate(key)?;
            println!("{code}");
        }
        BarcodeCommand::Validate { code } => {
            if !barcode::validate(&code) {
                bail!("{code} is not a valid identifier");
            }
            println!("{code} ok");
        }
        BarcodeCommand::Decode { code } => {
            println!("{}", barcode::extract_subject_key(&code)?);
        }
    }
    Ok(())
}
