use super::format::AudioFormat;
use anyhow::Result;
use std::sync::Arc;

/// Consumer of raw PCM bytes (e.g. a speaker)
pub trait AudioSink {
    /// Start the output
    fn start(&mut self) -> Result<()>;

    /// Write audio bytes, returning how many were accepted
    ///
    /// Blocks until the data has been handed to the device.
    fn write(&mut self, buf: &[u8]) -> Result<usize>;
}

/// Opens an output sink for a format; used once per playback
pub type SinkFactory = Arc<dyn Fn(AudioFormat) -> Result<Box<dyn AudioSink>> + Send + Sync>;
