use super::capture::{CaptureStats, capture_until_stopped, open_capture};
use super::playback::{load_recording, play_recording};
use crate::audio::source::OpenedSource;
use crate::audio::{AudioFormat, AudioSource, SinkFactory, SourceFactory};
use crate::error::RecorderError;
use crate::messages::{AppState, RecorderCommand, ToggleOutcome};
use crate::permissions::Permissions;
use anyhow::{Context, Result};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use tokio::sync::{mpsc, oneshot, watch};

/// A capture worker and the flag that keeps it running
struct RecordingSession {
    active: Arc<AtomicBool>,
    worker: JoinHandle<Result<CaptureStats>>,
}

/// Owns the record/play state machine
///
/// This service:
/// - Runs each recording on a dedicated capture thread, which checks the
///   microphone permission, opens the source and the file, and only then
///   reports the recording as started
/// - Joins that thread on stop so the file is closed before it can be played
/// - Plays the recording on a blocking task
///
/// The audio source is built on the capture thread (cpal streams are !Send),
/// so the service itself can run on any tokio worker.
pub struct Recorder {
    format: AudioFormat,
    path: PathBuf,
    cmd_rx: mpsc::Receiver<RecorderCommand>,
    sources: SourceFactory,
    sinks: SinkFactory,
    permissions: Arc<dyn Permissions>,
    state: watch::Sender<AppState>,
    session: Option<RecordingSession>,
}

impl Recorder {
    pub fn new(
        format: AudioFormat,
        path: PathBuf,
        cmd_rx: mpsc::Receiver<RecorderCommand>,
        sources: SourceFactory,
        sinks: SinkFactory,
        permissions: Arc<dyn Permissions>,
    ) -> Self {
        let (state, _) = watch::channel(AppState::Idle);
        Self {
            format,
            path,
            cmd_rx,
            sources,
            sinks,
            permissions,
            state,
            session: None,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<AppState> {
        self.state.subscribe()
    }

    pub async fn run(mut self) {
        while let Some(cmd) = self.cmd_rx.recv().await {
            self.handle_command(cmd).await;
        }

        // All handles dropped: don't leave a capture thread running
        if self.session.is_some()
            && let Err(e) = self.stop().await
        {
            tracing::error!("Failed to stop recording on exit: {}", e);
        }
        tracing::debug!("Recorder service finished");
    }

    async fn handle_command(&mut self, cmd: RecorderCommand) {
        match cmd {
            RecorderCommand::Toggle(reply) => {
                let result = if self.session.is_some() {
                    self.stop().await.map(ToggleOutcome::Stopped)
                } else {
                    self.start().await.map(ToggleOutcome::Started)
                };
                let _ = reply.send(result);
            }

            RecorderCommand::Play(reply) => {
                let _ = reply.send(self.play().await);
            }

            RecorderCommand::Shutdown(reply) => {
                let result = if self.session.is_some() {
                    self.stop().await.map(Some)
                } else {
                    Ok(None)
                };
                let _ = reply.send(result);
            }
        }
    }

    async fn start(&mut self) -> Result<PathBuf> {
        let active = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = oneshot::channel();

        let worker = {
            let active = active.clone();
            let sources = self.sources.clone();
            let permissions = self.permissions.clone();
            let format = self.format;
            let path = self.path.clone();

            std::thread::Builder::new()
                .name("capture".into())
                .spawn(move || -> Result<CaptureStats> {
                    let opened = prepare_capture(permissions.as_ref(), &sources, format, &path);
                    let (mut source, writer, buffer_bytes) = match opened {
                        Ok(opened) => opened,
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                            return Ok(CaptureStats::default());
                        }
                    };
                    let _ = ready_tx.send(Ok(()));
                    capture_until_stopped(source.as_mut(), writer, &path, buffer_bytes, &active)
                })
                .context("Failed to spawn capture thread")?
        };

        match ready_rx.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                join_worker(worker).await?;
                return Err(e);
            }
            Err(_) => {
                join_worker(worker).await?;
                anyhow::bail!("Capture thread exited before recording started");
            }
        }

        self.session = Some(RecordingSession { active, worker });
        self.state.send_replace(AppState::Recording);
        tracing::info!("Recording started: {:?}", self.path);

        Ok(self.path.clone())
    }

    async fn stop(&mut self) -> Result<CaptureStats> {
        let Some(session) = self.session.take() else {
            return Ok(CaptureStats::default());
        };

        session.active.store(false, Ordering::SeqCst);
        let result = join_worker(session.worker).await;
        self.state.send_replace(AppState::Idle);

        let stats = result?;
        tracing::info!(
            "Recording stopped: {} bytes ({:.1}s) saved to {:?}",
            stats.bytes_written,
            self.format.duration_of(stats.bytes_written).as_secs_f32(),
            self.path
        );
        Ok(stats)
    }

    async fn play(&self) -> Result<usize> {
        if self.session.is_some() {
            return Err(RecorderError::RecordingInProgress.into());
        }

        let path = self.path.clone();
        let sinks = self.sinks.clone();
        let format = self.format;

        tokio::task::spawn_blocking(move || {
            let data = load_recording(&path)?;
            tracing::info!(
                "Playing {:?} ({:.1}s)",
                path,
                format.duration_of(data.len()).as_secs_f32()
            );
            let mut sink = sinks(format).context("Failed to open audio output")?;
            play_recording(&data, sink.as_mut())
        })
        .await
        .context("Playback task failed")?
    }
}

/// Everything that has to succeed before a toggle reports `Started`.
/// Runs on the capture thread, so blocking device and filesystem calls stay
/// off the async runtime.
fn prepare_capture(
    permissions: &dyn Permissions,
    sources: &SourceFactory,
    format: AudioFormat,
    path: &Path,
) -> Result<(Box<dyn AudioSource>, BufWriter<File>, usize)> {
    if !permissions.microphone_granted() {
        return Err(RecorderError::PermissionDenied.into());
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create recording directory: {:?}", parent))?;
    }

    let OpenedSource {
        mut source,
        buffer_bytes,
    } = sources(format).context("Failed to open audio input")?;
    let writer = open_capture(source.as_mut(), path)?;

    Ok((source, writer, buffer_bytes))
}

async fn join_worker(worker: JoinHandle<Result<CaptureStats>>) -> Result<CaptureStats> {
    tokio::task::spawn_blocking(move || worker.join())
        .await
        .context("Failed to join capture thread")?
        .map_err(|_| anyhow::anyhow!("Capture thread panicked"))?
}

/// Handle for communicating with the Recorder
#[derive(Clone)]
pub struct RecorderHandle {
    tx: mpsc::Sender<RecorderCommand>,
    state: watch::Receiver<AppState>,
}

impl RecorderHandle {
    pub fn new(tx: mpsc::Sender<RecorderCommand>, state: watch::Receiver<AppState>) -> Self {
        Self { tx, state }
    }

    pub fn state(&self) -> AppState {
        *self.state.borrow()
    }

    pub async fn toggle(&self) -> Result<ToggleOutcome> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(RecorderCommand::Toggle(reply))
            .await
            .map_err(|e| anyhow::anyhow!("Failed to send toggle command: {}", e))?;

        rx.await
            .map_err(|e| anyhow::anyhow!("Failed to receive toggle response: {}", e))?
    }

    pub async fn play(&self) -> Result<usize> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(RecorderCommand::Play(reply))
            .await
            .map_err(|e| anyhow::anyhow!("Failed to send play command: {}", e))?;

        rx.await
            .map_err(|e| anyhow::anyhow!("Failed to receive play response: {}", e))?
    }

    pub async fn shutdown(&self) -> Result<Option<CaptureStats>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(RecorderCommand::Shutdown(reply))
            .await
            .map_err(|e| anyhow::anyhow!("Failed to send shutdown command: {}", e))?;

        rx.await
            .map_err(|e| anyhow::anyhow!("Failed to receive shutdown response: {}", e))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::fake::{FakeSink, FakeSource, SourceEvents};
    use crate::audio::format::pcm_to_samples;
    use crate::permissions::StaticPermissions;
    use std::time::{Duration, Instant};

    const FRAME_BYTES: usize = 64;

    struct Harness {
        handle: RecorderHandle,
        path: PathBuf,
        sink: FakeSink,
        events: Arc<SourceEvents>,
        _dir: tempfile::TempDir,
    }

    fn spawn_with(granted: bool, sources: Option<SourceFactory>) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Music").join("recording.pcm");
        let events = Arc::new(SourceEvents::default());
        let sink = FakeSink::default();
        let sources = sources.unwrap_or_else(|| FakeSource::factory(FRAME_BYTES, events.clone()));

        let (tx, rx) = mpsc::channel(10);
        let recorder = Recorder::new(
            AudioFormat::default(),
            path.clone(),
            rx,
            sources,
            sink.factory(),
            Arc::new(StaticPermissions(granted)),
        );
        let handle = RecorderHandle::new(tx, recorder.subscribe());
        tokio::spawn(recorder.run());

        Harness {
            handle,
            path,
            sink,
            events,
            _dir: dir,
        }
    }

    fn spawn(granted: bool) -> Harness {
        spawn_with(granted, None)
    }

    async fn record_for(handle: &RecorderHandle, duration: Duration) -> CaptureStats {
        assert!(matches!(
            handle.toggle().await.unwrap(),
            ToggleOutcome::Started(_)
        ));
        tokio::time::sleep(duration).await;
        match handle.toggle().await.unwrap() {
            ToggleOutcome::Stopped(stats) => stats,
            other => panic!("expected stop, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_toggle_records_contiguous_frames() {
        let h = spawn(true);
        assert_eq!(h.handle.state(), AppState::Idle);

        let stats = record_for(&h.handle, Duration::from_millis(50)).await;

        assert_eq!(h.handle.state(), AppState::Idle);
        assert!(stats.frames_written > 0);
        assert_eq!(stats.bytes_written, stats.frames_written * FRAME_BYTES);

        let bytes = std::fs::read(&h.path).unwrap();
        assert_eq!(bytes.len(), stats.bytes_written);
        let samples = pcm_to_samples(&bytes);
        assert!(samples.iter().enumerate().all(|(i, s)| *s == i as i16));
        assert!(h.events.stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_state_is_recording_between_toggles() {
        let h = spawn(true);

        h.handle.toggle().await.unwrap();
        assert_eq!(h.handle.state(), AppState::Recording);

        h.handle.toggle().await.unwrap();
        assert_eq!(h.handle.state(), AppState::Idle);
    }

    #[tokio::test]
    async fn test_play_without_recording_fails() {
        let h = spawn(true);

        let err = h.handle.play().await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RecorderError>(),
            Some(RecorderError::NoRecording(_))
        ));
        assert!(h.sink.played().is_empty());
    }

    #[tokio::test]
    async fn test_play_while_recording_is_refused() {
        let h = spawn(true);
        h.handle.toggle().await.unwrap();

        let err = h.handle.play().await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RecorderError>(),
            Some(RecorderError::RecordingInProgress)
        ));

        h.handle.toggle().await.unwrap();
    }

    #[tokio::test]
    async fn test_permission_denied_stays_idle() {
        let h = spawn(false);

        let err = h.handle.toggle().await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RecorderError>(),
            Some(RecorderError::PermissionDenied)
        ));
        assert_eq!(h.handle.state(), AppState::Idle);
        assert_eq!(h.events.opened.load(Ordering::SeqCst), 0);
        assert!(!h.path.exists());
    }

    #[tokio::test]
    async fn test_playback_matches_recorded_bytes() {
        let h = spawn(true);
        record_for(&h.handle, Duration::from_millis(30)).await;

        let recorded = std::fs::read(&h.path).unwrap();
        let played = h.handle.play().await.unwrap();

        assert_eq!(played, recorded.len());
        assert_eq!(h.sink.played(), recorded);
    }

    #[tokio::test]
    async fn test_repeated_stop_play_cycles() {
        let h = spawn(true);

        for round in 1..=3 {
            let stats = record_for(&h.handle, Duration::from_millis(20)).await;
            let played = h.handle.play().await.unwrap();

            let on_disk = std::fs::read(&h.path).unwrap();
            assert_eq!(on_disk.len(), stats.bytes_written);
            assert_eq!(played, on_disk.len());
            assert_eq!(h.sink.played(), on_disk);

            // Each session starts a fresh file: the counting signal restarts at zero
            assert_eq!(pcm_to_samples(&on_disk)[0], 0);
            assert_eq!(h.events.opened.load(Ordering::SeqCst), round);
        }
    }

    #[tokio::test]
    async fn test_failed_open_leaves_recorder_usable() {
        let attempts = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let events = Arc::new(SourceEvents::default());
        let sources: SourceFactory = {
            let attempts = attempts.clone();
            let working = FakeSource::factory(FRAME_BYTES, events);
            Arc::new(move |format: AudioFormat| -> Result<OpenedSource> {
                if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                    return Err(RecorderError::Device("busy".into()).into());
                }
                working(format)
            })
        };
        let h = spawn_with(true, Some(sources));

        let err = h.handle.toggle().await.unwrap_err();
        assert!(err.to_string().contains("Failed to open audio input"));
        assert_eq!(h.handle.state(), AppState::Idle);

        let stats = record_for(&h.handle, Duration::from_millis(20)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(std::fs::metadata(&h.path).unwrap().len() as usize, stats.bytes_written);
    }

    #[tokio::test]
    async fn test_unwritable_recording_path_stays_idle() {
        let h = spawn(true);
        std::fs::create_dir_all(&h.path).unwrap();

        let err = h.handle.toggle().await.unwrap_err();
        assert!(err.to_string().contains("Failed to create recording file"));
        assert_eq!(h.handle.state(), AppState::Idle);
        assert!(!h.events.started.load(Ordering::SeqCst));

        // The next toggle tries to start again rather than reporting a stop
        assert!(h.handle.toggle().await.is_err());
        assert_eq!(h.handle.state(), AppState::Idle);
    }

    #[tokio::test]
    async fn test_file_size_matches_recording_duration() {
        // 20 ms frames delivered at the 44.1 kHz mono byte rate
        const FRAME: usize = 1764;
        const BYTES_PER_SECOND: f64 = 88200.0;
        // Covers the command round trips at either end of the measurement
        const SLACK: f64 = 0.1 * BYTES_PER_SECOND;

        let events = Arc::new(SourceEvents::default());
        let h = spawn_with(true, Some(FakeSource::realtime_factory(FRAME, events)));

        let started = Instant::now();
        let stats = record_for(&h.handle, Duration::from_millis(400)).await;
        let elapsed = started.elapsed().as_secs_f64();

        let size = std::fs::metadata(&h.path).unwrap().len() as f64;
        let expected = elapsed * BYTES_PER_SECOND;
        assert_eq!(size as usize, stats.bytes_written);
        assert!(size <= expected + FRAME as f64, "{} bytes for {:.3}s", size, elapsed);
        assert!(
            size >= expected - FRAME as f64 - SLACK,
            "{} bytes for {:.3}s",
            size,
            elapsed
        );
    }

    /// Remembers which thread asked for the permission
    struct RecordingThreadName(std::sync::Mutex<Option<String>>);

    impl Permissions for RecordingThreadName {
        fn microphone_granted(&self) -> bool {
            let name = std::thread::current().name().map(str::to_owned);
            *self.0.lock().unwrap() = name;
            true
        }
    }

    #[tokio::test]
    async fn test_permission_and_setup_run_on_capture_thread() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Music").join("recording.pcm");
        let events = Arc::new(SourceEvents::default());
        let permissions = Arc::new(RecordingThreadName(std::sync::Mutex::new(None)));

        let (tx, rx) = mpsc::channel(10);
        let recorder = Recorder::new(
            AudioFormat::default(),
            path.clone(),
            rx,
            FakeSource::factory(FRAME_BYTES, events),
            FakeSink::default().factory(),
            permissions.clone(),
        );
        let handle = RecorderHandle::new(tx, recorder.subscribe());
        tokio::spawn(recorder.run());

        record_for(&handle, Duration::from_millis(10)).await;

        assert_eq!(permissions.0.lock().unwrap().as_deref(), Some("capture"));
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_shutdown_stops_active_recording() {
        let h = spawn(true);

        assert_eq!(h.handle.shutdown().await.unwrap(), None);

        h.handle.toggle().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let stats = h.handle.shutdown().await.unwrap().unwrap();

        assert_eq!(h.handle.state(), AppState::Idle);
        assert_eq!(std::fs::metadata(&h.path).unwrap().len() as usize, stats.bytes_written);
    }
}
