use super::format::AudioFormat;
use crate::error::ReadError;
use anyhow::Result;
use std::sync::Arc;

/// Blocking producer of raw PCM frames (e.g. a microphone)
///
/// Implementations are created and used on the capture thread only, so they
/// don't need to be `Send`.
pub trait AudioSource {
    /// Begin producing audio
    fn start(&mut self) -> Result<()>;

    /// Block until one frame is read into `buf`, returning the number of valid bytes
    ///
    /// `Err(ReadError::InvalidOperation)` means this frame is unusable; the caller
    /// may keep reading.
    fn read_frame(&mut self, buf: &mut [u8]) -> Result<usize, ReadError>;

    /// Stop producing audio and release the device
    fn stop(&mut self);
}

/// Builds a fresh source for each recording session, on the capture thread
pub type SourceFactory = Arc<dyn Fn(AudioFormat) -> Result<OpenedSource> + Send + Sync>;

/// A source together with the frame size it should be read with
pub struct OpenedSource {
    pub source: Box<dyn AudioSource>,
    pub buffer_bytes: usize,
}
