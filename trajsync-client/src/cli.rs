//! CLI argument parsing for the trajsync binary

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use trajsync_utils::LogConfig;

use crate::config::AnimationSpeed;

/// Live trajectory client for the fleet schedule server
#[derive(Parser, Debug)]
#[command(name = "trajsync")]
#[command(about = "Poll live robot trajectories from a schedule server")]
#[command(version)]
pub struct Cli {
    /// Server address or remote alias
    ///
    /// Supports WebSocket, TCP and Unix sockets via URL format. Overrides
    /// the address from the config file.
    /// Example: ws://localhost:8006, tcp://127.0.0.1:8006 or unix:///tmp/schedule.sock
    #[arg(long, env = "TRAJSYNC_ADDR")]
    pub addr: Option<String>,

    /// Config file to load instead of the default location
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Debug-level logging with span events
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Also append logs to trajsync.log in the state directory
    #[arg(long)]
    pub log_file: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Logging setup selected by `--verbose` and `--log-file`
    pub fn log_config(&self) -> LogConfig {
        let config = if self.verbose {
            LogConfig::verbose()
        } else {
            LogConfig::client()
        };
        if self.log_file {
            config.with_log_file()
        } else {
            config
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the server clock
    Time,

    /// Poll trajectories for a floor and log each update
    Watch {
        /// Floor (map) name
        #[arg(short = 'm', long = "map")]
        map_name: String,

        /// Animation speed, which sets the polling period
        #[arg(long, value_enum)]
        speed: Option<AnimationSpeed>,

        /// Lookahead window in milliseconds
        #[arg(long)]
        lookahead_ms: Option<u64>,

        /// Exit after the first update
        #[arg(long)]
        once: bool,

        /// Spline sampling step in milliseconds for the per-robot summary
        #[arg(long, default_value_t = 1000.0)]
        step_ms: f64,
    },
}
