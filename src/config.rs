use std::fs::read_to_string;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use tracing::info;

use crate::error::{Result, WalError};

/// How often the background task drains the write buffer.
pub const DEFAULT_SYNC_INTERVAL_MS: u64 = 200;

fn default_sync_interval_ms() -> u64 {
    DEFAULT_SYNC_INTERVAL_MS
}

/// Open-time configuration for a log.
#[derive(Deserialize, Debug, Clone)]
pub struct Options {
    /// Directory holding the segment files, created if absent.
    pub directory: PathBuf,

    /// Call fsync after every buffer flush.
    #[serde(default)]
    pub enable_fsync: bool,

    /// Rotate the active segment once its on-disk size reaches this.
    pub max_segment_bytes: u64,

    /// How many segment files may coexist; the oldest is deleted when a
    /// rotation would exceed this.
    pub max_segments: usize,

    #[serde(default = "default_sync_interval_ms")]
    pub sync_interval_ms: u64,
}

impl Options {
    pub fn new(
        directory: impl Into<PathBuf>,
        enable_fsync: bool,
        max_segment_bytes: u64,
        max_segments: usize,
    ) -> Self {
        Options {
            directory: directory.into(),
            enable_fsync,
            max_segment_bytes,
            max_segments,
            sync_interval_ms: DEFAULT_SYNC_INTERVAL_MS,
        }
    }

    pub fn from_file(file: &str) -> Result<Options> {
        info!("parsing log options file: {}", file);

        let contents = read_to_string(file)?;
        let opts: Options = toml::from_str(&contents).map_err(|e| WalError::Config(e.to_string()))?;

        opts.validate()?;

        Ok(opts)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_segment_bytes == 0 {
            return Err(WalError::Config("max_segment_bytes must be positive".into()));
        }
        if self.max_segments == 0 {
            return Err(WalError::Config("max_segments must be positive".into()));
        }
        if self.sync_interval_ms == 0 {
            return Err(WalError::Config("sync_interval_ms must be positive".into()));
        }

        Ok(())
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }
}
