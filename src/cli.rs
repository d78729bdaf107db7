use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "neuroboard")]
#[command(version)]
#[command(about = "Participant analytics dashboard backend")]
pub struct Args {
    /// TOML config file; missing keys fall back to defaults
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// Address to bind the HTTP server to
    #[arg(long)]
    pub host: Option<String>,

    /// Port for the HTTP server
    #[arg(long)]
    pub port: Option<u16>,

    /// SQLite database file
    #[arg(long)]
    pub database: Option<PathBuf>,

    /// Document read by POST /seed
    #[arg(long)]
    pub seed_file: Option<PathBuf>,

    /// Seconds between synthetic participant inserts
    #[arg(long, value_name = "SECS")]
    pub feed_interval: Option<u64>,

    /// Do not start the background feeder
    #[arg(long)]
    pub no_feeder: bool,

    /// Replace the whole participant table with this document, then exit
    #[arg(long, value_name = "PATH")]
    pub bulk_load: Option<PathBuf>,
}
