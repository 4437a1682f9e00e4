use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "tillscan",
    about = "Checkout barcode tools and the phone scanner bridge",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the scan ingestion service in the foreground.
    Serve {
        /// Preferred listen port. Overrides the configured default.
        #[arg(long)]
        port: Option<u16>,
        /// Serve plain HTTP even when a certificate could be provisioned.
        #[arg(long)]
        plain: bool,
        /// Path to a tillscan.toml. Defaults to ./tillscan.toml when present.
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Work with checkout barcode identifiers.
    #[command(subcommand)]
    Barcode(BarcodeCommand),
}

#[derive(Subcommand)]
pub enum BarcodeCommand {
    /// Generate a fresh identifier for a subject key.
    Generate { key: u32 },
    /// Check structure and check digit. Exits nonzero when invalid.
    Validate { code: String },
    /// Recover the subject key embedded in an identifier.
    Decode { code: String },
}
