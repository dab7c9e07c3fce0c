//! Audio format description shared by the sink, the ring buffer math, and the
//! daemon socket protocol.

use serde::{Deserialize, Serialize};

use crate::protocol_constants::{DEFAULT_BIT_DEPTH, DEFAULT_CHANNELS, DEFAULT_SAMPLE_RATE, KNOWN_SAMPLE_RATES};

/// PCM sample encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
    PcmS16Le,
    PcmS24Le,
    PcmF32Le,
    PcmU8,
    Wav,
}

/// Audio format configuration for a playback session.
///
/// Describes the PCM audio being streamed: used to size the ring buffer's
/// growth steps, to compute the audio sink's command-line parameters, and to
/// derive expected playback duration from a byte count.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AudioFormat {
    pub encoding: Encoding,
    pub sample_rate_hz: u32,
    pub channels: u16,
    pub bit_depth: u16,
}

impl AudioFormat {
    /// Creates a new audio format configuration.
    pub fn new(encoding: Encoding, sample_rate_hz: u32, channels: u16, bit_depth: u16) -> Self {
        Self {
            encoding,
            sample_rate_hz,
            channels,
            bit_depth,
        }
    }

    /// True if the sample rate is one of the server's documented rates.
    ///
    /// Unknown rates are still accepted; this is informational only.
    pub fn has_known_sample_rate(&self) -> bool {
        KNOWN_SAMPLE_RATES.contains(&self.sample_rate_hz)
    }

    /// Returns bytes per sample (e.g., 2 for 16-bit audio).
    #[inline]
    pub const fn bytes_per_sample(&self) -> usize {
        (self.bit_depth / 8) as usize
    }

    /// Returns the number of samples per channel for the given duration.
    #[inline]
    pub fn frame_samples(&self, duration_ms: u32) -> usize {
        ((self.sample_rate_hz as u64 * duration_ms as u64) / 1000) as usize
    }

    /// Calculates the frame size in bytes for the given duration.
    ///
    /// Uses saturating arithmetic to prevent overflow with extreme values.
    #[inline]
    pub fn frame_bytes(&self, duration_ms: u32) -> usize {
        let samples_per_channel =
            (self.sample_rate_hz as u64).saturating_mul(duration_ms as u64) / 1000;
        let bytes_per_sample = self.bytes_per_sample() as u64;

        samples_per_channel
            .saturating_mul(self.channels as u64)
            .saturating_mul(bytes_per_sample) as usize
    }

    /// Bytes consumed per second of audio at this format.
    #[inline]
    pub fn bytes_per_second(&self) -> u64 {
        self.sample_rate_hz as u64
            * self.channels as u64
            * self.bytes_per_sample() as u64
    }

    /// Estimated playback duration (ms) for a given byte count, at this format.
    pub fn duration_ms_for_bytes(&self, bytes: u64) -> u64 {
        let bps = self.bytes_per_second();
        if bps == 0 {
            return 0;
        }
        bytes.saturating_mul(1000) / bps
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            encoding: Encoding::PcmS16Le,
            sample_rate_hz: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            bit_depth: DEFAULT_BIT_DEPTH,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_bytes_matches_manual_calculation() {
        let format = AudioFormat::new(Encoding::PcmS16Le, 24000, 1, 16);
        // 20ms at 24kHz mono 16-bit = 480 samples * 2 bytes = 960 bytes
        assert_eq!(format.frame_bytes(20), 960);
    }

    #[test]
    fn frame_bytes_saturates_instead_of_overflowing() {
        let format = AudioFormat::new(Encoding::PcmS16Le, u32::MAX, 2, 32);
        assert!(format.frame_bytes(u32::MAX) > 0);
    }

    #[test]
    fn duration_ms_for_bytes_round_trips_with_frame_bytes() {
        let format = AudioFormat::default();
        let one_second = format.bytes_per_second();
        assert_eq!(format.duration_ms_for_bytes(one_second), 1000);
    }

    #[test]
    fn unknown_sample_rate_is_still_accepted() {
        let format = AudioFormat::new(Encoding::PcmS16Le, 11025, 1, 16);
        assert!(!format.has_known_sample_rate());
        assert!(format.frame_bytes(20) > 0);
    }
}
