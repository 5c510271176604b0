use std::path::PathBuf;
use thiserror::Error;

/// Failures a recorder operation can end with
#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("Microphone permission not granted")]
    PermissionDenied,

    #[error("No recording available at {}", .0.display())]
    NoRecording(PathBuf),

    #[error("Cannot play while a recording is in progress")]
    RecordingInProgress,

    #[error("Audio device error: {0}")]
    Device(String),
}

/// A single frame read that produced no usable data
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadError {
    #[error("Invalid operation on audio source")]
    InvalidOperation,
}
