//! Scanner configuration.
//!
//! The capture section mirrors what the frame source is asked for at open
//! time. A small buffer depth matters: a deep driver queue hands back stale
//! frames and makes the scanner lag behind what is in front of the lens.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for opening a frame source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Camera device index.
    pub device_id: u32,
    /// Requested frame width in pixels.
    pub width: u32,
    /// Requested frame height in pixels.
    pub height: u32,
    /// Number of frames the driver may queue internally.
    pub buffer_depth: u32,
    /// Mirror frames horizontally before decoding (selfie view).
    pub mirror: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device_id: 0,
            width: 640,
            height: 480,
            buffer_depth: 1,
            mirror: true,
        }
    }
}

impl CaptureConfig {
    /// Creates a new configuration with the specified dimensions.
    pub fn with_dimensions(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ..Default::default()
        }
    }

    /// Validates the configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::InvalidDimensions);
        }
        if self.buffer_depth == 0 {
            return Err(ConfigError::InvalidBufferDepth);
        }
        Ok(())
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid frame dimensions")]
    InvalidDimensions,
    #[error("invalid buffer depth (must be at least 1)")]
    InvalidBufferDepth,
    #[error("invalid event queue capacity (must be at least 1)")]
    InvalidQueueCapacity,
    #[error("invalid lookup worker count (must be at least 1)")]
    InvalidWorkerCount,
    #[error("failed to read config file: {0}")]
    FileReadError(String),
    #[error("failed to parse config file: {0}")]
    ParseError(String),
}

/// Full configuration file format.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FileConfig {
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub scanner: ScannerConfig,
    #[serde(default)]
    pub lookup: LookupConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// Acquisition loop timing and failure tolerance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Delay between successful iterations in milliseconds.
    pub throttle_ms: u64,
    /// Delay after a failed read in milliseconds.
    pub read_backoff_ms: u64,
    /// Consecutive read failures tolerated before the loop stops.
    pub max_read_errors: u32,
    /// Capacity of the worker to presentation event queue.
    pub event_queue_capacity: usize,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            throttle_ms: 50,
            read_backoff_ms: 100,
            max_read_errors: 5,
            event_queue_capacity: 256,
        }
    }
}

impl ScannerConfig {
    pub fn throttle(&self) -> Duration {
        Duration::from_millis(self.throttle_ms)
    }

    pub fn read_backoff(&self) -> Duration {
        Duration::from_millis(self.read_backoff_ms)
    }
}

/// Code store lookup configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LookupConfig {
    /// SQLite database holding the products table.
    pub database: PathBuf,
    /// Per-lookup timeout in milliseconds.
    pub timeout_ms: u64,
    /// Lookup worker threads.
    pub workers: usize,
    /// Resolve only retail product symbologies (EAN/UPC/Code128/Code39).
    pub product_codes_only: bool,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from("products.db"),
            timeout_ms: 2000,
            workers: 2,
            product_codes_only: true,
        }
    }
}

impl LookupConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Stop after this many frames (0 runs until interrupted).
    pub frame_limit: u64,
    /// Metrics server port (0 to disable).
    pub metrics_port: u16,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            frame_limit: 0,
            metrics_port: 9090,
        }
    }
}

impl FileConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileReadError(e.to_string()))?;
        Self::from_toml(&content)
    }

    /// Parses and validates configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: FileConfig =
            toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.capture.validate()?;
        if self.scanner.event_queue_capacity == 0 {
            return Err(ConfigError::InvalidQueueCapacity);
        }
        if self.lookup.workers == 0 {
            return Err(ConfigError::InvalidWorkerCount);
        }
        Ok(())
    }
}
