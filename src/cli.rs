//! Command line interface for the `vitals-portal` binary

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use vitals_portal_core::{StartPosition, TransportConfig, CONFIG_FILE_NAME};

/// Shared-memory sensor transport
#[derive(Parser, Debug, PartialEq)]
#[clap(author, version, about, long_about = None)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Command,

    /// Configuration file path
    #[clap(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log filter (trace, debug, info, warn, error); overrides the config file
    #[clap(short, long)]
    pub log_level: Option<String>,

    /// Debug logging (same as --log-level=debug)
    #[clap(short, long)]
    pub verbose: bool,

    /// Control socket path
    #[clap(short, long, value_name = "PATH")]
    pub socket_path: Option<PathBuf>,

    /// Slot size in bytes, header included
    #[clap(long)]
    pub frame_size: Option<u32>,

    /// Number of slots in the ring
    #[clap(long)]
    pub frame_count: Option<u32>,

    /// Heartbeat age after which the producer counts as stalled
    #[clap(long, value_name = "MS")]
    pub stall_threshold_ms: Option<u64>,

    /// Where a new consumer starts reading
    #[clap(long, value_enum)]
    pub start_position: Option<StartArg>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartArg {
    Live,
    Beginning,
}

impl From<StartArg> for StartPosition {
    fn from(arg: StartArg) -> Self {
        match arg {
            StartArg::Live => StartPosition::Live,
            StartArg::Beginning => StartPosition::Beginning,
        }
    }
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Serve a ring buffer and write synthetic sensor data into it
    Produce {
        /// Vitals snapshots per second
        #[clap(long, default_value = "60")]
        vitals_hz: u32,

        /// Waveform sample rate
        #[clap(long, default_value = "250")]
        waveform_hz: u32,

        /// Waveform samples per frame
        #[clap(long, default_value = "10")]
        samples_per_frame: u32,

        /// Stop after this many seconds instead of waiting for Ctrl-C
        #[clap(short, long)]
        duration_secs: Option<u64>,
    },

    /// Attach to a producer and print what arrives
    Consume {
        /// Stop after this many records
        #[clap(short = 'n', long)]
        max_records: Option<u64>,

        /// Stop after this many seconds
        #[clap(short, long)]
        duration_secs: Option<u64>,

        /// Print statistics as JSON on exit
        #[clap(long)]
        stats: bool,
    },

    /// Write a default configuration file
    Init {
        #[clap(default_value = CONFIG_FILE_NAME)]
        path: PathBuf,
    },
}

impl Cli {
    /// Effective log filter
    pub fn log_filter(&self, config: &TransportConfig) -> String {
        if self.verbose {
            "debug".to_string()
        } else {
            self.log_level.clone().unwrap_or_else(|| config.log_level.clone())
        }
    }

    /// Apply command line overrides on top of file values
    pub fn apply_overrides(&self, config: &mut TransportConfig) {
        if let Some(path) = &self.socket_path {
            config.socket_path = path.clone();
        }
        if let Some(frame_size) = self.frame_size {
            config.frame_size = frame_size;
        }
        if let Some(frame_count) = self.frame_count {
            config.frame_count = frame_count;
        }
        if let Some(threshold) = self.stall_threshold_ms {
            config.stall_threshold_ms = threshold;
        }
        if let Some(start) = self.start_position {
            config.start_position = start.into();
        }
    }
}

/// Load the configuration: explicit file, then a discovered one, then defaults
pub fn load_config(cli: &Cli) -> Result<TransportConfig> {
    let mut config = if let Some(config_path) = &cli.config {
        TransportConfig::from_file(config_path)?
    } else if let Some(config_path) = TransportConfig::find_config_file() {
        TransportConfig::from_file(config_path)?
    } else {
        TransportConfig::default()
    };

    cli.apply_overrides(&mut config);
    config.validate().context("Invalid transport configuration")?;
    Ok(config)
}
