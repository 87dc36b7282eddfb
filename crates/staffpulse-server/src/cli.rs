use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "staffpulse-server")]
#[command(
    author,
    version,
    about = "Real-time notification and chat relay for StaffPulse"
)]
pub struct Cli {
    /// Configuration file (YAML, TOML or JSON)
    #[arg(short, long, env = "STAFFPULSE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Listen address (overrides the config file)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Listen port (overrides the config file)
    #[arg(short = 'P', long)]
    pub port: Option<u16>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}
