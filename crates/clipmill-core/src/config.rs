//! Application configuration types.
//!
//! The top-level [`Config`] struct is deserialized from JSON and carries the
//! engine and conversion sections. Every section defaults sensibly so a
//! completely empty `{}` file is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;
use crate::Error;

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub conversion: ConversionConfig,
}

impl Config {
    /// Deserialize a `Config` from a JSON string.
    ///
    /// This is intentionally string-based so the caller can read the file
    /// however it sees fit (async, embedded, etc.).
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str)
            .map_err(|e| Error::Validation(format!("config parse error: {e}")))
    }

    /// Load configuration from a file path, falling back to defaults if the
    /// path is `None` or the file does not exist.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_json(&contents).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse config file {}: {e}", path.display());
                Self::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config file at {}; using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.conversion.crf > 51 {
            warnings.push(format!(
                "conversion.crf is {}; ffmpeg accepts 0-51",
                self.conversion.crf
            ));
        }
        if self.conversion.video_codec.is_empty() {
            warnings.push("conversion.video_codec is empty".into());
        }
        if self.conversion.preset.is_empty() {
            warnings.push("conversion.preset is empty".into());
        }
        if self.engine.init_timeout_secs == 0 {
            warnings.push("engine.init_timeout_secs is 0; readiness waits will fail immediately".into());
        }
        if self.engine.exec_timeout_secs == 0 {
            warnings.push("engine.exec_timeout_secs is 0; transcodes will fail immediately".into());
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// EngineConfig
// ---------------------------------------------------------------------------

/// Engine instance configuration: tool locations and call deadlines.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Explicit path to the ffmpeg binary; resolved from `PATH` when unset.
    pub ffmpeg_path: Option<PathBuf>,
    /// Explicit path to the ffprobe binary; resolved from `PATH` when unset.
    pub ffprobe_path: Option<PathBuf>,
    /// Deadline for engine construction and readiness, in seconds.
    pub init_timeout_secs: u64,
    /// Deadline for a duration probe, in seconds.
    pub probe_timeout_secs: u64,
    /// Deadline for a single transcode call, in seconds.
    pub exec_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: None,
            ffprobe_path: None,
            init_timeout_secs: 30,
            probe_timeout_secs: 60,
            exec_timeout_secs: 3600,
        }
    }
}

impl EngineConfig {
    /// Readiness deadline as a [`Duration`].
    pub fn init_timeout(&self) -> Duration {
        Duration::from_secs(self.init_timeout_secs)
    }

    /// Probe deadline as a [`Duration`].
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    /// Transcode deadline as a [`Duration`].
    pub fn exec_timeout(&self) -> Duration {
        Duration::from_secs(self.exec_timeout_secs)
    }
}

// ---------------------------------------------------------------------------
// ConversionConfig
// ---------------------------------------------------------------------------

/// The fixed MP4 conversion preset.
///
/// Codec parameter tuning is out of scope; these knobs exist so deployments
/// can pin a different software encoder or quality factor, not to negotiate
/// per-job settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionConfig {
    /// Video codec (default: libx264).
    pub video_codec: String,
    /// Encoder speed preset (default: fast).
    pub preset: String,
    /// Constant rate factor (default: 23).
    pub crf: u32,
    /// MP4 container flags (default: faststart for streaming-friendly layout).
    pub movflags: String,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            video_codec: "libx264".to_string(),
            preset: "fast".to_string(),
            crf: 23,
            movflags: "faststart".to_string(),
        }
    }
}
