//! Sink configuration (JSON, camelCase keys, every field optional).

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::device::StreamParams;
use crate::error::{Result, SinkError};

const MIN_SAMPLE_RATE: u32 = 1_000;
const MAX_SAMPLE_RATE: u32 = 384_000;
/// Longest staging buffer accepted, in seconds of audio.
const MAX_BUFFER_SECONDS: usize = 10;

/// Which device writer variant to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OutputMode {
    /// Blocking writes into the device's own queue.
    Blocking,
    /// Two alternating buffers handed to a callback-driven queue.
    #[default]
    DoubleBuffer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct SinkConfig {
    /// Output sample rate in Hz. Default: 48000.
    pub sample_rate: u32,
    /// Staging buffer size in samples. Default: 6000 (125 ms at 48 kHz).
    pub buffer_capacity: usize,
    pub mode: OutputMode,
    /// Preferred output device; `None` uses the system default.
    pub device_name: Option<String>,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            buffer_capacity: 6_000,
            mode: OutputMode::DoubleBuffer,
            device_name: None,
        }
    }
}

impl SinkConfig {
    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: SinkConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&raw)
    }

    /// Write the config as pretty JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path.as_ref(), json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        validate_stream(self.sample_rate, self.buffer_capacity)
    }

    pub fn stream_params(&self) -> StreamParams {
        StreamParams::new(self.sample_rate, self.buffer_capacity)
    }
}

/// Bounds every opened stream must satisfy.
///
/// Shared by [`SinkConfig::validate`] and `AudioSink::configure`, so a
/// capacity is checked before anything is allocated for it.
pub fn validate_stream(sample_rate: u32, capacity: usize) -> Result<()> {
    if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&sample_rate) {
        return Err(SinkError::InvalidConfig(format!(
            "sample rate {sample_rate} Hz outside {MIN_SAMPLE_RATE}..={MAX_SAMPLE_RATE}"
        )));
    }
    let max_capacity = sample_rate as usize * MAX_BUFFER_SECONDS;
    if capacity == 0 || capacity > max_capacity {
        return Err(SinkError::InvalidConfig(format!(
            "buffer capacity {capacity} outside 1..={max_capacity}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config = SinkConfig::from_json_str(r#"{"sampleRate": 22050}"#).expect("parse");
        assert_eq!(config.sample_rate, 22_050);
        assert_eq!(config.buffer_capacity, 6_000);
        assert_eq!(config.mode, OutputMode::DoubleBuffer);
        assert!(config.device_name.is_none());
    }

    #[test]
    fn mode_uses_camel_case() {
        let config =
            SinkConfig::from_json_str(r#"{"mode": "blocking", "deviceName": "Speakers"}"#)
                .expect("parse");
        assert_eq!(config.mode, OutputMode::Blocking);
        assert_eq!(config.device_name.as_deref(), Some("Speakers"));

        let json = serde_json::to_value(SinkConfig::default()).expect("serialize");
        assert_eq!(json["mode"], "doubleBuffer");
        assert_eq!(json["bufferCapacity"], 6_000);
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(matches!(
            SinkConfig::from_json_str(r#"{"sampleRate": 10}"#),
            Err(SinkError::InvalidConfig(_))
        ));
        assert!(matches!(
            SinkConfig::from_json_str(r#"{"bufferCapacity": 0}"#),
            Err(SinkError::InvalidConfig(_))
        ));
        assert!(matches!(
            SinkConfig::from_json_str(r#"{"sampleRate": "fast"}"#),
            Err(SinkError::Json(_))
        ));
    }

    #[test]
    fn stream_bounds_scale_with_rate() {
        assert!(validate_stream(8_000, 80_000).is_ok());
        assert!(validate_stream(8_000, 80_001).is_err());
        assert!(validate_stream(8_000, usize::MAX).is_err());
        assert!(validate_stream(500, 10).is_err());

        let params = SinkConfig::default().stream_params();
        assert_eq!((params.sample_rate, params.capacity), (48_000, 6_000));
    }

    #[test]
    fn save_then_load_from_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("sink.json");
        let config = SinkConfig {
            sample_rate: 16_000,
            buffer_capacity: 1_600,
            mode: OutputMode::Blocking,
            device_name: Some("USB Headset".into()),
        };
        config.save(&path).expect("save");
        assert_eq!(SinkConfig::load(&path).expect("load"), config);
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let result = SinkConfig::load(dir.path().join("absent.json"));
        assert!(matches!(result, Err(SinkError::Io(_))));
    }
}
