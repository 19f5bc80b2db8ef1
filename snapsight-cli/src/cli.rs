// ABOUTME: CLI argument definitions for the snapsight application
// ABOUTME: Defines the command-line interface structure using clap derive macros

use clap::{Parser, Subcommand};
use snapsight_sdk::Mode;
use std::path::PathBuf;
use std::time::Duration;

use crate::constants::timeouts::MAX_CONFIG_DURATION;

fn parse_mode(value: &str) -> Result<Mode, String> {
    value.parse::<Mode>().map_err(|e| e.to_string())
}

fn parse_duration(value: &str) -> Result<Duration, String> {
    let duration = crate::config::parse_duration(value).map_err(|e| e.to_string())?;
    if duration > MAX_CONFIG_DURATION {
        return Err(format!("Duration must be at most 24h, got {}", value));
    }
    Ok(duration)
}

#[derive(Parser, Debug)]
#[command(name = "snapsight")]
#[command(about = "Route page images to the active snapsight processing mode", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Enable verbose output for debugging
    #[arg(long, short, global = true)]
    pub verbose: bool,

    /// Print one JSON object per line instead of text
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Find which mode is active on the server
    Probe {
        /// Modes to probe (defaults to the configured list)
        #[arg(long, value_delimiter = ',', value_parser = parse_mode)]
        modes: Vec<Mode>,
    },
    /// Watch a web page or directory and stream new images to the active mode
    Watch {
        /// Page URL (http/https) or local directory
        root: String,

        /// How often to rescan the root, e.g. 500ms or 2s
        #[arg(long, value_parser = parse_duration)]
        interval: Option<Duration>,
    },
    /// Send image files or URLs to the active mode and wait for the results
    Send {
        /// Image files or http(s) URLs
        #[arg(required = true)]
        images: Vec<String>,

        /// Give up waiting for results after this long
        #[arg(long, value_parser = parse_duration)]
        wait: Option<Duration>,
    },
    /// Upload one image for one-off processing over REST
    Upload {
        /// Processing mode
        #[arg(value_parser = parse_mode)]
        mode: Mode,

        /// Image file
        file: PathBuf,
    },
    /// Switch a mode's server-side messenger on or off
    Toggle {
        /// Processing mode
        #[arg(value_parser = parse_mode)]
        mode: Mode,
    },
    /// Log in and store the access token
    Login {
        /// Account name; prompted when omitted
        #[arg(long, short)]
        username: Option<String>,

        /// Force new login even if a token is stored
        #[arg(long)]
        force: bool,
    },
    /// Create an account on the server
    Register {
        /// Account email; prompted when omitted
        #[arg(long)]
        email: Option<String>,

        /// Display name; prompted when omitted
        #[arg(long)]
        full_name: Option<String>,

        #[arg(long)]
        phone: Option<String>,

        /// Identifier of the paired glasses
        #[arg(long)]
        device_id: Option<String>,
    },
    /// Remove the stored access token
    Logout,
    /// Show the logged-in account
    Me,
    /// Show configuration, remembered mode and server reachability
    Status,
    /// Forget the remembered mode
    Reset,
    /// Generate shell completions
    #[command(after_long_help = crate::completions::installation_instructions())]
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: crate::completions::Shell,
    },
}
