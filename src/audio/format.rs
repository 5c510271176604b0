// NOTE: Recordings are always 16-bit signed little-endian PCM with no header.
// Only the sample rate and channel count are configurable.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioFormat {
    pub const BITS_PER_SAMPLE: u16 = 16;
    pub const BYTES_PER_SAMPLE: usize = (Self::BITS_PER_SAMPLE / 8) as usize;

    /// Bytes in one sample frame (one sample per channel)
    pub fn block_align(&self) -> usize {
        Self::BYTES_PER_SAMPLE * self.channels as usize
    }

    pub fn bytes_per_second(&self) -> usize {
        self.sample_rate as usize * self.block_align()
    }

    /// Calculate number of samples for a given duration in seconds
    pub fn samples_for_duration(&self, seconds: f32) -> usize {
        (self.sample_rate as f32 * seconds) as usize
    }

    /// Byte length of `seconds` of audio, rounded down to a whole sample frame
    pub fn bytes_for_duration(&self, seconds: f32) -> usize {
        self.samples_for_duration(seconds) * self.block_align()
    }

    pub fn duration_of(&self, bytes: usize) -> Duration {
        let whole = bytes - bytes % self.block_align();
        Duration::from_secs_f64(whole as f64 / self.bytes_per_second() as f64)
    }

    /// Buffer size used when the platform does not report a minimum (20 ms)
    pub fn fallback_buffer_bytes(&self) -> usize {
        (self.sample_rate as usize / 50) * self.block_align()
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            channels: 1,
        }
    }
}

/// Decode 16-bit little-endian PCM bytes into samples. A trailing odd byte is ignored.
pub fn pcm_to_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(AudioFormat::BYTES_PER_SAMPLE)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Encode samples into `out` as 16-bit little-endian PCM, returning the bytes written
pub fn samples_to_pcm(samples: &[i16], out: &mut [u8]) -> usize {
    let mut written = 0;
    for (sample, slot) in samples
        .iter()
        .zip(out.chunks_exact_mut(AudioFormat::BYTES_PER_SAMPLE))
    {
        slot.copy_from_slice(&sample.to_le_bytes());
        written += AudioFormat::BYTES_PER_SAMPLE;
    }
    written
}
