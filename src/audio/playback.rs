use super::format::{AudioFormat, pcm_to_samples};
use super::sink::{AudioSink, SinkFactory};
use crate::error::RecorderError;
use anyhow::Result;
use rodio::buffer::SamplesBuffer;
use rodio::cpal::traits::{DeviceTrait, HostTrait};
use rodio::cpal::{BufferSize, SupportedBufferSize};
use rodio::{OutputStream, OutputStreamBuilder, Sink};
use std::sync::Arc;

/// Speaker output via rodio
///
/// `write` queues the whole buffer and blocks until it has finished playing.
pub struct SpeakerSink {
    format: AudioFormat,
    stream: OutputStream,
    sink: Option<Sink>,
}

impl SpeakerSink {
    pub fn open(format: AudioFormat, buffer_frames: u32) -> Result<Self> {
        let mut stream = OutputStreamBuilder::from_default_device()
            .map_err(|e| RecorderError::Device(format!("No output audio device available: {}", e)))?
            .with_sample_rate(format.sample_rate)
            .with_channels(format.channels)
            .with_buffer_size(BufferSize::Fixed(buffer_frames))
            .open_stream_or_fallback()
            .map_err(|e| RecorderError::Device(format!("Failed to open output stream: {}", e)))?;
        // The stream is dropped after every playback; keep stderr quiet
        stream.log_on_drop(false);

        tracing::debug!(
            "Output stream opened: {} Hz, {} ch, {} frames per buffer",
            format.sample_rate,
            format.channels,
            buffer_frames
        );

        Ok(Self {
            format,
            stream,
            sink: None,
        })
    }

    /// Sink factory for the recorder: opens the speaker at its minimum buffer size
    pub fn factory() -> SinkFactory {
        Arc::new(|format: AudioFormat| -> Result<Box<dyn AudioSink>> {
            let sink = SpeakerSink::open(format, min_output_buffer_frames(format))?;
            Ok(Box::new(sink))
        })
    }
}

impl AudioSink for SpeakerSink {
    fn start(&mut self) -> Result<()> {
        let sink = Sink::connect_new(self.stream.mixer());
        sink.play();
        self.sink = Some(sink);
        Ok(())
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let sink = self
            .sink
            .as_ref()
            .ok_or_else(|| RecorderError::Device("Output sink not started".into()))?;

        let samples: Vec<f32> = pcm_to_samples(buf)
            .into_iter()
            .map(|s| s as f32 / 32768.0)
            .collect();
        let written = samples.len() * AudioFormat::BYTES_PER_SAMPLE;

        sink.append(SamplesBuffer::new(
            self.format.channels,
            self.format.sample_rate,
            samples,
        ));
        sink.sleep_until_end();

        Ok(written)
    }
}

/// Platform-reported minimum output buffer, in sample frames
pub fn min_output_buffer_frames(format: AudioFormat) -> u32 {
    let fallback = (format.fallback_buffer_bytes() / format.block_align()) as u32;

    rodio::cpal::default_host()
        .default_output_device()
        .and_then(|device| device.default_output_config().ok())
        .and_then(|config| match config.buffer_size() {
            SupportedBufferSize::Range { min, .. } if *min > 0 => Some((*min).max(fallback)),
            _ => None,
        })
        .unwrap_or(fallback)
}
