use crate::audio::AudioSource;
use crate::error::ReadError;
use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

/// Totals for one capture session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub frames_written: usize,
    pub frames_skipped: usize,
    pub bytes_written: usize,
}

/// Truncate the recording file and start the source
///
/// If the source fails to start it is stopped again before returning.
pub fn open_capture(source: &mut dyn AudioSource, path: &Path) -> Result<BufWriter<File>> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create recording file: {:?}", path))?;

    if let Err(e) = source.start() {
        source.stop();
        return Err(e);
    }

    Ok(BufWriter::new(file))
}

/// Append frames to `writer` while `active` is set, then stop the source and flush
///
/// A frame read that fails with `ReadError::InvalidOperation` is skipped and
/// the loop carries on. The source is stopped on both the success and the
/// I/O error path.
pub fn capture_until_stopped(
    source: &mut dyn AudioSource,
    mut writer: BufWriter<File>,
    path: &Path,
    buffer_bytes: usize,
    active: &AtomicBool,
) -> Result<CaptureStats> {
    let result = copy_frames(source, &mut writer, buffer_bytes, active);
    source.stop();

    let stats = result?;
    writer
        .flush()
        .with_context(|| format!("Failed to flush recording file: {:?}", path))?;

    tracing::info!(
        "Capture finished: {} frames, {} bytes, {} skipped",
        stats.frames_written,
        stats.bytes_written,
        stats.frames_skipped
    );
    Ok(stats)
}

fn copy_frames(
    source: &mut dyn AudioSource,
    writer: &mut impl Write,
    buffer_bytes: usize,
    active: &AtomicBool,
) -> Result<CaptureStats> {
    let mut buffer = vec![0u8; buffer_bytes];
    let mut stats = CaptureStats::default();

    while active.load(Ordering::SeqCst) {
        match source.read_frame(&mut buffer) {
            Ok(0) => {}
            Ok(n) => {
                writer
                    .write_all(&buffer[..n])
                    .context("Failed to write audio frame")?;
                stats.frames_written += 1;
                stats.bytes_written += n;
            }
            Err(ReadError::InvalidOperation) => {
                stats.frames_skipped += 1;
                tracing::warn!(
                    "Skipping unreadable audio frame ({} skipped so far)",
                    stats.frames_skipped
                );
            }
        }
    }

    Ok(stats)
}
