use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about)]
pub struct Args {
    /// Path to the INI config (created with defaults if missing)
    #[arg(long, global = true, default_value = "beatdrill.ini")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Play a session. Each line on stdin is one tap; `q` quits.
    Play {
        /// Start level (1..10), saved as the new default
        #[arg(long)]
        level: Option<u8>,

        /// Music mode: fixed tempo over a backing track
        #[arg(long, default_value_t = false)]
        music: bool,

        /// Tap every note exactly on time
        #[arg(long, default_value_t = false)]
        autoplay: bool,

        /// Write a JSON session summary here when the session ends
        #[arg(long)]
        summary: Option<PathBuf>,
    },
    /// Tap along with 16 clicks to measure input latency; the result is saved.
    Calibrate,
}
