use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "sonoflux", about = "Real-time audio analysis engine")]
pub struct Cli {
    /// Configuration file (default: ./config.yaml, then ./config/config.yaml)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// List audio input devices and exit
    #[arg(long)]
    pub list_devices: bool,
}
