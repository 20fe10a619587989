//! Transport configuration
//!
//! Shared by the producer and consumer sides. Values come from a TOML file,
//! with every field optional, and may be overridden by command-line flags.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::binary_protocol::{RingGeometry, DEFAULT_FRAME_COUNT, DEFAULT_FRAME_SIZE};
use crate::error::TransportError;

/// Well-known rendezvous socket
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/z-monitor-sensor.sock";

/// Config file name searched for by [`TransportConfig::find_config_file`]
pub const CONFIG_FILE_NAME: &str = "vitals-portal.toml";

/// Where a new reader starts consuming
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartPosition {
    /// Only frames published after attaching
    #[default]
    Live,
    /// Everything still resident, starting at slot 0
    Beginning,
}

/// Transport configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Control socket path
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,

    /// Bytes per frame slot, including the 32-byte frame header
    #[serde(default = "default_frame_size")]
    pub frame_size: u32,

    /// Number of frame slots
    #[serde(default = "default_frame_count")]
    pub frame_count: u32,

    /// Idle heartbeat period of the producer, in milliseconds
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Heartbeat age after which a reader reports the producer stalled
    #[serde(default = "default_stall_threshold_ms")]
    pub stall_threshold_ms: u64,

    /// Longest sleep between empty polls, in microseconds
    #[serde(default = "default_poll_interval_us")]
    pub poll_interval_us: u64,

    /// Empty polls spent spinning before the reader starts yielding
    #[serde(default = "default_spin_count")]
    pub spin_count: u32,

    /// Connect plus handshake receive timeout
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,

    /// First reconnect delay
    #[serde(default = "default_reconnect_initial_ms")]
    pub reconnect_initial_ms: u64,

    /// Upper bound of the exponential reconnect delay
    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,

    /// Stall duration after which the consumer re-handshakes
    #[serde(default = "default_reconnect_after_stall_ms")]
    pub reconnect_after_stall_ms: u64,

    /// Upper bound on frames drained per poll
    #[serde(default = "default_max_frames_per_poll")]
    pub max_frames_per_poll: usize,

    /// Reader start position
    #[serde(default)]
    pub start_position: StartPosition,

    /// Capacity of the consumer event channel
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,

    /// Log filter used by the binary
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_socket_path() -> PathBuf {
    PathBuf::from(DEFAULT_SOCKET_PATH)
}

fn default_frame_size() -> u32 {
    DEFAULT_FRAME_SIZE
}

fn default_frame_count() -> u32 {
    DEFAULT_FRAME_COUNT
}

fn default_heartbeat_interval_ms() -> u64 {
    10
}

fn default_stall_threshold_ms() -> u64 {
    300
}

fn default_poll_interval_us() -> u64 {
    1000
}

fn default_spin_count() -> u32 {
    64
}

fn default_handshake_timeout_ms() -> u64 {
    1000
}

fn default_reconnect_initial_ms() -> u64 {
    100
}

fn default_reconnect_max_ms() -> u64 {
    5000
}

fn default_reconnect_after_stall_ms() -> u64 {
    5000
}

fn default_max_frames_per_poll() -> usize {
    10
}

fn default_event_channel_capacity() -> usize {
    1024
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            frame_size: default_frame_size(),
            frame_count: default_frame_count(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            stall_threshold_ms: default_stall_threshold_ms(),
            poll_interval_us: default_poll_interval_us(),
            spin_count: default_spin_count(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            reconnect_initial_ms: default_reconnect_initial_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
            reconnect_after_stall_ms: default_reconnect_after_stall_ms(),
            max_frames_per_poll: default_max_frames_per_poll(),
            start_position: StartPosition::default(),
            event_channel_capacity: default_event_channel_capacity(),
            log_level: default_log_level(),
        }
    }
}

impl TransportConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: TransportConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path.as_ref()))?;

        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Look for a config file in the working directory, then the user and
    /// system configuration directories
    pub fn find_config_file() -> Option<PathBuf> {
        if let Ok(current_dir) = std::env::current_dir() {
            if let Some(found) = Self::find_config_file_in(&current_dir) {
                return Some(found);
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("vitals-portal").join("config.toml");
            if user_config.exists() {
                info!("Using user config file: {}", user_config.display());
                return Some(user_config);
            }
        }

        let system_config = Path::new("/etc/vitals-portal/config.toml");
        if system_config.exists() {
            info!("Using system config file: {}", system_config.display());
            return Some(system_config.to_path_buf());
        }

        None
    }

    /// Look for `vitals-portal.toml` inside `dir`
    pub fn find_config_file_in(dir: &Path) -> Option<PathBuf> {
        let candidate = dir.join(CONFIG_FILE_NAME);
        if candidate.exists() {
            info!("Using config file: {}", candidate.display());
            return Some(candidate);
        }
        None
    }

    /// Validated slot geometry
    pub fn geometry(&self) -> crate::error::Result<RingGeometry> {
        RingGeometry::new(self.frame_size, self.frame_count)
            .map_err(|e| TransportError::Configuration(e.to_string()))
    }

    /// Check every value that would otherwise fail later at runtime
    pub fn validate(&self) -> crate::error::Result<()> {
        self.geometry()?;

        if self.socket_path.as_os_str().is_empty() {
            return Err(TransportError::Configuration(
                "socket path must not be empty".to_string(),
            ));
        }
        if self.heartbeat_interval_ms == 0 {
            return Err(TransportError::Configuration(
                "heartbeat interval must be positive".to_string(),
            ));
        }
        if self.stall_threshold_ms <= self.heartbeat_interval_ms {
            return Err(TransportError::Configuration(format!(
                "stall threshold {}ms must exceed the heartbeat interval {}ms",
                self.stall_threshold_ms, self.heartbeat_interval_ms
            )));
        }
        if self.max_frames_per_poll == 0 {
            return Err(TransportError::Configuration(
                "max frames per poll must be at least 1".to_string(),
            ));
        }
        if self.event_channel_capacity == 0 {
            return Err(TransportError::Configuration(
                "event channel capacity must be at least 1".to_string(),
            ));
        }
        if self.reconnect_initial_ms == 0 || self.reconnect_max_ms < self.reconnect_initial_ms {
            return Err(TransportError::Configuration(format!(
                "invalid reconnect backoff {}ms..{}ms",
                self.reconnect_initial_ms, self.reconnect_max_ms
            )));
        }

        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn stall_threshold(&self) -> Duration {
        Duration::from_millis(self.stall_threshold_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_micros(self.poll_interval_us)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn reconnect_after_stall(&self) -> Duration {
        Duration::from_millis(self.reconnect_after_stall_ms)
    }

    /// Exponential reconnect delay for the given attempt, capped at the maximum
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.min(32)).unwrap_or(u64::MAX);
        let delay = self.reconnect_initial_ms.saturating_mul(factor);
        Duration::from_millis(delay.min(self.reconnect_max_ms))
    }
}
