use crate::audio::AudioSink;
use crate::error::RecorderError;
use anyhow::{Context, Result};
use std::io::ErrorKind;
use std::path::Path;

/// Read the whole recording at `path` into memory
///
/// A missing or empty file is `RecorderError::NoRecording`.
pub fn load_recording(path: &Path) -> Result<Vec<u8>> {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(RecorderError::NoRecording(path.to_path_buf()).into());
        }
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read recording: {:?}", path));
        }
    };

    if data.is_empty() {
        return Err(RecorderError::NoRecording(path.to_path_buf()).into());
    }

    Ok(data)
}

/// Write a loaded recording to `sink` in a single call
pub fn play_recording(data: &[u8], sink: &mut dyn AudioSink) -> Result<usize> {
    sink.start().context("Failed to start audio output")?;
    let written = sink.write(data).context("Failed to write audio output")?;

    if written < data.len() {
        tracing::warn!("Output accepted {} of {} bytes", written, data.len());
    }
    tracing::info!("Played {} bytes", written);
    Ok(written)
}
