use crate::services::CaptureStats;
use anyhow::Result;
use std::path::PathBuf;
use tokio::sync::oneshot;

/// Commands for the Recorder service
pub enum RecorderCommand {
    Toggle(oneshot::Sender<Result<ToggleOutcome>>),
    Play(oneshot::Sender<Result<usize>>),
    /// Stop any recording in progress before exit
    Shutdown(oneshot::Sender<Result<Option<CaptureStats>>>),
}

/// What a toggle did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToggleOutcome {
    Started(PathBuf),
    Stopped(CaptureStats),
}

/// Application state (observable via watch channel)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AppState {
    Idle,
    Recording,
}
