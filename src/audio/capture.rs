use super::format::{AudioFormat, samples_to_pcm};
use super::source::{AudioSource, OpenedSource, SourceFactory};
use crate::error::{ReadError, RecorderError};
use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{
    BufferSize, FromSample, Sample, SampleFormat, SampleRate, SizedSample, StreamConfig,
    SupportedBufferSize,
};
use ringbuf::{HeapCons, HeapProd, HeapRb, traits::*};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, Thread};
use std::time::{Duration, Instant};

/// Microphone input via cpal
///
/// The stream is built in the device's native sample type; the callback
/// converts to i16, pushes into a ring buffer and unparks the reading thread; `read_frame` blocks until a full frame is buffered or the
/// read timeout elapses. `cpal::Stream` is !Send, so this must be created on
/// the thread that reads from it.
pub struct MicrophoneSource {
    stream: Option<cpal::Stream>,
    consumer: HeapCons<i16>,
    samples: Vec<i16>,
    stream_failed: Arc<AtomicBool>,
    read_timeout: Duration,
}

impl MicrophoneSource {
    /// Open the default input device with a buffer of `buffer_bytes`
    pub fn open(format: AudioFormat, buffer_bytes: usize, read_timeout: Duration) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| RecorderError::Device("No input audio device available".into()))?;

        let frame_count = (buffer_bytes / format.block_align()).max(1);
        let config = StreamConfig {
            channels: format.channels,
            sample_rate: SampleRate(format.sample_rate),
            buffer_size: BufferSize::Fixed(frame_count as u32),
        };

        // One second of headroom between the callback and the reader
        let ring = HeapRb::<i16>::new(format.bytes_for_duration(1.0) / AudioFormat::BYTES_PER_SAMPLE);
        let (producer, consumer) = ring.split();

        let reader: Thread = thread::current();
        let stream_failed = Arc::new(AtomicBool::new(false));
        let callbacks = Callbacks {
            producer,
            reader,
            stream_failed: stream_failed.clone(),
        };

        let sample_format = device
            .default_input_config()
            .map(|config| config.sample_format())
            .unwrap_or(SampleFormat::I16);

        let stream = match sample_format {
            SampleFormat::I16 => build_stream::<i16>(&device, &config, callbacks),
            SampleFormat::U16 => build_stream::<u16>(&device, &config, callbacks),
            SampleFormat::I32 => build_stream::<i32>(&device, &config, callbacks),
            SampleFormat::F32 => build_stream::<f32>(&device, &config, callbacks),
            other => Err(RecorderError::Device(format!(
                "Unsupported input sample format: {}",
                other
            ))
            .into()),
        }?;

        tracing::debug!(
            "Input stream opened: {} Hz, {} ch, {} frames per buffer, device format {}",
            format.sample_rate,
            format.channels,
            frame_count,
            sample_format
        );

        Ok(Self {
            stream: Some(stream),
            consumer,
            samples: Vec::new(),
            stream_failed,
            read_timeout,
        })
    }

    /// Source factory for the recorder: opens the microphone at its minimum buffer size
    pub fn factory(read_timeout: Duration) -> SourceFactory {
        Arc::new(move |format: AudioFormat| -> Result<OpenedSource> {
            let buffer_bytes = min_input_buffer_bytes(format);
            let source = MicrophoneSource::open(format, buffer_bytes, read_timeout)?;
            Ok(OpenedSource {
                source: Box::new(source),
                buffer_bytes,
            })
        })
    }
}

/// State moved into the cpal callbacks
struct Callbacks {
    producer: HeapProd<i16>,
    reader: Thread,
    stream_failed: Arc<AtomicBool>,
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    callbacks: Callbacks,
) -> Result<cpal::Stream>
where
    T: SizedSample,
    i16: FromSample<T>,
{
    let Callbacks {
        mut producer,
        reader,
        stream_failed,
    } = callbacks;
    let reader_on_error = reader.clone();

    device
        .build_input_stream(
            config,
            move |data: &[T], _info: &cpal::InputCallbackInfo| {
                producer.push_iter(to_pcm16(data));
                reader.unpark();
            },
            move |err| {
                tracing::warn!("Audio input stream error: {}", err);
                stream_failed.store(true, Ordering::SeqCst);
                reader_on_error.unpark();
            },
            None,
        )
        .map_err(|e| RecorderError::Device(format!("Failed to build input stream: {}", e)).into())
}

/// Device samples as 16-bit signed PCM
fn to_pcm16<T>(data: &[T]) -> impl Iterator<Item = i16> + '_
where
    T: Sample,
    i16: FromSample<T>,
{
    data.iter().map(|&s| s.to_sample::<i16>())
}

impl AudioSource for MicrophoneSource {
    fn start(&mut self) -> Result<()> {
        let stream = self
            .stream
            .as_ref()
            .context("Input stream already released")?;
        stream.play().context("Failed to start audio stream")?;
        tracing::info!("Audio capture started");
        Ok(())
    }

    fn read_frame(&mut self, buf: &mut [u8]) -> Result<usize, ReadError> {
        if self.stream.is_none() || self.stream_failed.swap(false, Ordering::SeqCst) {
            return Err(ReadError::InvalidOperation);
        }

        let wanted = buf.len() / AudioFormat::BYTES_PER_SAMPLE;
        let deadline = Instant::now() + self.read_timeout;
        while self.consumer.occupied_len() < wanted {
            if self.stream_failed.swap(false, Ordering::SeqCst) {
                return Err(ReadError::InvalidOperation);
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::park_timeout(deadline - now);
        }

        self.samples.resize(wanted, 0);
        let n = self.consumer.pop_slice(&mut self.samples);
        Ok(samples_to_pcm(&self.samples[..n], buf))
    }

    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                tracing::debug!("Failed to pause input stream: {}", e);
            }
            tracing::info!("Audio capture stopped");
        }
    }
}

/// Platform-reported minimum input buffer, in bytes
///
/// Never smaller than 20 ms of audio, which is also used when the device
/// doesn't report a range.
pub fn min_input_buffer_bytes(format: AudioFormat) -> usize {
    let reported = cpal::default_host()
        .default_input_device()
        .and_then(|device| device.default_input_config().ok())
        .and_then(|config| match config.buffer_size() {
            SupportedBufferSize::Range { min, .. } if *min > 0 => Some(*min as usize),
            _ => None,
        });

    match reported {
        Some(frames) => (frames * format.block_align()).max(format.fallback_buffer_bytes()),
        None => format.fallback_buffer_bytes(),
    }
}

/// Whether the host exposes any input device at all
pub fn input_device_available() -> bool {
    cpal::default_host().default_input_device().is_some()
}
