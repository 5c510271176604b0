//! In-memory sources and sinks for tests

use super::format::{AudioFormat, samples_to_pcm};
use super::sink::{AudioSink, SinkFactory};
use super::source::{AudioSource, OpenedSource, SourceFactory};
use crate::error::ReadError;
use anyhow::Result;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Default)]
pub struct SourceEvents {
    pub started: AtomicBool,
    pub stopped: AtomicBool,
    pub opened: AtomicUsize,
}

/// Plays back a fixed script of reads, then either clears `active` or
/// generates a counting signal forever
pub struct FakeSource {
    script: VecDeque<Result<Vec<u8>, ReadError>>,
    active: Option<Arc<AtomicBool>>,
    frame_delay: Duration,
    realtime: Option<AudioFormat>,
    started_at: Option<Instant>,
    emitted_bytes: usize,
    next_sample: i16,
    events: Arc<SourceEvents>,
}

impl FakeSource {
    pub fn scripted(
        script: Vec<Result<Vec<u8>, ReadError>>,
        active: Arc<AtomicBool>,
        events: Arc<SourceEvents>,
    ) -> Self {
        Self {
            script: script.into(),
            active: Some(active),
            frame_delay: Duration::ZERO,
            realtime: None,
            started_at: None,
            emitted_bytes: 0,
            next_sample: 0,
            events,
        }
    }

    pub fn endless(frame_delay: Duration, events: Arc<SourceEvents>) -> Self {
        Self {
            script: VecDeque::new(),
            active: None,
            frame_delay,
            realtime: None,
            started_at: None,
            emitted_bytes: 0,
            next_sample: 0,
            events,
        }
    }

    /// Endless source that delivers each frame no earlier than a device
    /// running at `format` would have filled it
    pub fn realtime(format: AudioFormat, events: Arc<SourceEvents>) -> Self {
        Self {
            realtime: Some(format),
            ..Self::endless(Duration::ZERO, events)
        }
    }

    pub fn realtime_factory(buffer_bytes: usize, events: Arc<SourceEvents>) -> SourceFactory {
        Arc::new(move |format: AudioFormat| -> Result<OpenedSource> {
            events.opened.fetch_add(1, Ordering::SeqCst);
            Ok(OpenedSource {
                source: Box::new(FakeSource::realtime(format, events.clone())),
                buffer_bytes,
            })
        })
    }

    pub fn factory(buffer_bytes: usize, events: Arc<SourceEvents>) -> SourceFactory {
        Arc::new(move |_format: AudioFormat| -> Result<OpenedSource> {
            events.opened.fetch_add(1, Ordering::SeqCst);
            Ok(OpenedSource {
                source: Box::new(FakeSource::endless(
                    Duration::from_millis(1),
                    events.clone(),
                )),
                buffer_bytes,
            })
        })
    }
}

impl AudioSource for FakeSource {
    fn start(&mut self) -> Result<()> {
        self.started_at = Some(Instant::now());
        self.events.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn read_frame(&mut self, buf: &mut [u8]) -> Result<usize, ReadError> {
        if let Some(step) = self.script.pop_front() {
            let bytes = step?;
            let n = bytes.len().min(buf.len());
            buf[..n].copy_from_slice(&bytes[..n]);
            return Ok(n);
        }

        if let Some(active) = &self.active {
            active.store(false, Ordering::SeqCst);
            return Ok(0);
        }

        match (self.realtime, self.started_at) {
            (Some(format), Some(started_at)) => {
                let due = started_at + format.duration_of(self.emitted_bytes + buf.len());
                std::thread::sleep(due.saturating_duration_since(Instant::now()));
            }
            _ => std::thread::sleep(self.frame_delay),
        }
        self.emitted_bytes += buf.len();
        let samples: Vec<i16> = (0..buf.len() / AudioFormat::BYTES_PER_SAMPLE)
            .map(|_| {
                let s = self.next_sample;
                self.next_sample = self.next_sample.wrapping_add(1);
                s
            })
            .collect();
        Ok(samples_to_pcm(&samples, buf))
    }

    fn stop(&mut self) {
        self.events.stopped.store(true, Ordering::SeqCst);
    }
}

/// Collects everything written to it
#[derive(Clone, Default)]
pub struct FakeSink {
    pub started: Arc<AtomicBool>,
    pub played: Arc<Mutex<Vec<u8>>>,
}

impl FakeSink {
    pub fn factory(&self) -> SinkFactory {
        let sink = self.clone();
        Arc::new(move |_format: AudioFormat| -> Result<Box<dyn AudioSink>> {
            Ok(Box::new(sink.clone()))
        })
    }

    pub fn played(&self) -> Vec<u8> {
        self.played.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

impl AudioSink for FakeSink {
    fn start(&mut self) -> Result<()> {
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let mut played = self
            .played
            .lock()
            .map_err(|_| anyhow::anyhow!("sink poisoned"))?;
        played.clear();
        played.extend_from_slice(buf);
        Ok(buf.len())
    }
}
