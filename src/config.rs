//! Application configuration
//!
//! Loaded from a JSON document. Every field has a default, so `{}` is a
//! complete configuration.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    pub timecode: TimecodeConfig,
    pub receiver: ReceiverConfig,
    pub recorder: RecorderConfig,
    pub transmitter: TransmitterConfig,
}

/// Timecode broadcast and clock settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TimecodeConfig {
    /// UDP port the broadcast is sent to
    pub port: u16,

    /// Multicast group to join (ignored if not a multicast address)
    pub multicast_group: Ipv4Addr,

    /// Local interface used for the multicast join
    pub interface: Ipv4Addr,

    /// OSC address carrying the timecode
    pub osc_address: String,

    /// Nominal frame rate of the timecode
    pub fps: u32,

    /// Expected gap between broadcast messages
    pub message_interval_ms: u64,

    /// Readings older than `message_interval_ms * stale_multiplier` are stale
    pub stale_multiplier: u32,

    /// Signed correction added to the age of a reading when tagging frames
    pub offset_ms: i64,
}

impl Default for TimecodeConfig {
    fn default() -> Self {
        Self {
            port: 6575,
            multicast_group: Ipv4Addr::new(239, 255, 0, 1),
            interface: Ipv4Addr::UNSPECIFIED,
            osc_address: "/asil/clock".to_string(),
            fps: 30,
            message_interval_ms: 33,
            stale_multiplier: 5,
            offset_ms: 0,
        }
    }
}

impl TimecodeConfig {
    pub fn message_interval(&self) -> Duration {
        Duration::from_millis(self.message_interval_ms)
    }

    pub fn staleness_threshold(&self) -> Duration {
        self.message_interval() * self.stale_multiplier
    }
}

/// Receiver-side source tracking
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReceiverConfig {
    /// Camera names expected on the transport
    pub cameras: Vec<String>,

    /// A source with no frame for this long becomes stale
    pub liveness_window_ms: u64,

    /// A stale source with no frame for this long (since its last frame) is detached
    pub detach_grace_ms: u64,

    /// Per-source bound for the initial readiness wait
    pub attach_timeout_ms: u64,

    /// Frames buffered per source between receive and sink while recording
    pub queue_depth: usize,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            cameras: Vec::new(),
            liveness_window_ms: 1000,
            detach_grace_ms: 5000,
            attach_timeout_ms: 10_000,
            queue_depth: 120,
        }
    }
}

impl ReceiverConfig {
    pub fn attach_timeout(&self) -> Duration {
        Duration::from_millis(self.attach_timeout_ms)
    }

    /// Liveness sweeps run at half the liveness window
    pub fn sweep_period(&self) -> Duration {
        Duration::from_millis((self.liveness_window_ms / 2).max(1))
    }
}

/// Which media sink backs each camera's recording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    /// H.264 MP4 through an ffmpeg subprocess
    Ffmpeg,
    /// Length-prefixed tagged frame container
    Raw,
}

/// Recording output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecorderConfig {
    /// Session directories are created under this root
    pub output_root: PathBuf,

    pub sink: SinkKind,

    /// Frame rate written into video containers
    pub fps: u32,

    /// Dimensions of the raw frames handed to ffmpeg
    pub width: u32,
    pub height: u32,

    /// ffmpeg pixel format name of the raw frames
    pub pixel_format: String,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            output_root: PathBuf::from("recordings"),
            sink: SinkKind::Ffmpeg,
            fps: 60,
            width: 1280,
            height: 720,
            pixel_format: "bgra".to_string(),
        }
    }
}

/// Capture node settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransmitterConfig {
    pub camera_name: String,
    pub fps: u32,

    /// Frames waiting for the transport before the oldest is dropped
    pub queue_depth: usize,
}

impl Default for TransmitterConfig {
    fn default() -> Self {
        Self {
            camera_name: "CAM_A".to_string(),
            fps: 30,
            queue_depth: 4,
        }
    }
}

/// Load configuration from a JSON file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: AppConfig = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate_config(&config)?;
    Ok(config)
}

/// Load config from a path if given, otherwise defaults
pub fn load_config_or_default(path: Option<&Path>) -> Result<AppConfig> {
    match path {
        Some(path) => load_config(path),
        None => Ok(AppConfig::default()),
    }
}

/// Validate configuration
pub fn validate_config(config: &AppConfig) -> Result<()> {
    if config.timecode.fps == 0 {
        anyhow::bail!("timecode.fps must be greater than 0");
    }
    if config.timecode.message_interval_ms == 0 || config.timecode.stale_multiplier == 0 {
        anyhow::bail!("timecode staleness threshold must be greater than 0");
    }
    if config.receiver.liveness_window_ms == 0 {
        anyhow::bail!("receiver.livenessWindowMs must be greater than 0");
    }
    if config.receiver.detach_grace_ms <= config.receiver.liveness_window_ms {
        anyhow::bail!(
            "receiver.detachGraceMs ({}) must exceed receiver.livenessWindowMs ({})",
            config.receiver.detach_grace_ms,
            config.receiver.liveness_window_ms
        );
    }
    if config.receiver.queue_depth == 0 || config.transmitter.queue_depth == 0 {
        anyhow::bail!("queue depths must be greater than 0");
    }
    if config.recorder.fps == 0 || config.transmitter.fps == 0 {
        anyhow::bail!("recorder.fps and transmitter.fps must be greater than 0");
    }

    let mut seen = std::collections::HashSet::new();
    for name in &config.receiver.cameras {
        if name.trim().is_empty() {
            anyhow::bail!("camera names cannot be empty");
        }
        if !seen.insert(name) {
            anyhow::bail!("camera name {:?} is listed twice", name);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_empty_document_is_default() {
        let config: AppConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.timecode.port, 6575);
        assert_eq!(config.timecode.osc_address, "/asil/clock");
        assert_eq!(config.recorder.sink, SinkKind::Ffmpeg);
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                "timecode": { "fps": 25, "offsetMs": -12 },
                "receiver": { "cameras": ["CAM_A", "CAM_B"], "livenessWindowMs": 500 },
                "recorder": { "sink": "raw", "outputRoot": "/tmp/rec" }
            }"#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.timecode.fps, 25);
        assert_eq!(config.timecode.offset_ms, -12);
        assert_eq!(config.receiver.cameras, vec!["CAM_A", "CAM_B"]);
        assert_eq!(config.receiver.sweep_period(), Duration::from_millis(250));
        assert_eq!(config.recorder.sink, SinkKind::Raw);
        assert_eq!(config.recorder.output_root, PathBuf::from("/tmp/rec"));
    }

    #[test]
    fn test_staleness_threshold() {
        let config = TimecodeConfig::default();
        assert_eq!(config.staleness_threshold(), Duration::from_millis(165));
    }

    #[test]
    fn test_rejects_invalid_values() {
        let mut config = AppConfig::default();
        config.timecode.fps = 0;
        assert!(validate_config(&config).is_err());

        let mut config = AppConfig::default();
        config.receiver.detach_grace_ms = config.receiver.liveness_window_ms;
        assert!(validate_config(&config).is_err());

        let mut config = AppConfig::default();
        config.receiver.cameras = vec!["CAM_A".into(), "CAM_A".into()];
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_missing_file_is_error() {
        let dir = tempdir().unwrap();
        assert!(load_config(&dir.path().join("nope.json")).is_err());
    }
}
