//! Daemon configuration: YAML file with environment variable overrides,
//! mirroring the pattern used by the project's other standalone binaries.

use serde::Deserialize;

use crate::format::{AudioFormat, Encoding};
use crate::protocol_constants::{DEFAULT_BIT_DEPTH, DEFAULT_CHANNELS, DEFAULT_SAMPLE_RATE, DEFAULT_DAEMON_PORT};

/// Daemon configuration loaded from YAML with environment overrides.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Port to bind the daemon's socket/health server to.
    /// Override: `TTS_DAEMON_PORT`
    pub port: u16,

    /// PCM sample rate in Hz.
    /// Override: `TTS_DAEMON_SAMPLE_RATE`
    pub sample_rate_hz: u32,

    /// Channel count (1 = mono, 2 = stereo).
    /// Override: `TTS_DAEMON_CHANNELS`
    pub channels: u16,

    /// Bits per sample.
    /// Override: `TTS_DAEMON_BIT_DEPTH`
    pub bit_depth: u16,

    /// Enables verbose logging.
    /// Override: `AUDIO_DEBUG=1`
    pub debug: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_DAEMON_PORT,
            sample_rate_hz: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            bit_depth: DEFAULT_BIT_DEPTH,
            debug: false,
        }
    }
}

impl DaemonConfig {
    /// Loads configuration from a YAML file (if given), then applies
    /// environment variable overrides.
    pub fn load(path: Option<&std::path::Path>) -> anyhow::Result<Self> {
        use anyhow::Context;

        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("TTS_DAEMON_PORT") {
            if let Ok(port) = val.parse() {
                self.port = port;
            }
        }
        if let Ok(val) = std::env::var("TTS_DAEMON_SAMPLE_RATE") {
            if let Ok(rate) = val.parse() {
                self.sample_rate_hz = rate;
            }
        }
        if let Ok(val) = std::env::var("TTS_DAEMON_CHANNELS") {
            if let Ok(channels) = val.parse() {
                self.channels = channels;
            }
        }
        if let Ok(val) = std::env::var("TTS_DAEMON_BIT_DEPTH") {
            if let Ok(bit_depth) = val.parse() {
                self.bit_depth = bit_depth;
            }
        }
        if std::env::var("AUDIO_DEBUG").as_deref() == Ok("1") {
            self.debug = true;
        }
    }

    /// Converts to the [`AudioFormat`] the daemon will use for this run.
    pub fn to_audio_format(&self) -> AudioFormat {
        AudioFormat::new(Encoding::PcmS16Le, self.sample_rate_hz, self.channels, self.bit_depth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_protocol_defaults() {
        let config = DaemonConfig::default();
        assert_eq!(config.port, DEFAULT_DAEMON_PORT);
        assert_eq!(config.sample_rate_hz, DEFAULT_SAMPLE_RATE);
    }

    #[test]
    fn to_audio_format_carries_configured_values() {
        let config = DaemonConfig {
            sample_rate_hz: 48000,
            channels: 2,
            bit_depth: 16,
            ..Default::default()
        };
        let format = config.to_audio_format();
        assert_eq!(format.sample_rate_hz, 48000);
        assert_eq!(format.channels, 2);
    }
}
