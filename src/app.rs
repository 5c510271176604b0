use crate::audio::{MicrophoneSource, SpeakerSink};
use crate::config::Config;
use crate::error::RecorderError;
use crate::messages::ToggleOutcome;
use crate::permissions::DevicePermissions;
use crate::services::{Recorder, RecorderHandle};

use anyhow::{Context, Result};
use std::io::{BufRead, BufReader, Read};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::mpsc;

/// One line of user input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiCommand {
    ToggleRecording,
    Play,
    Quit,
}

impl UiCommand {
    pub fn parse(line: &str) -> Option<Self> {
        match line.trim().to_ascii_lowercase().as_str() {
            "r" | "record" => Some(Self::ToggleRecording),
            "p" | "play" => Some(Self::Play),
            "q" | "quit" | "exit" => Some(Self::Quit),
            _ => None,
        }
    }
}

/// Forward parsed lines from `input` to `tx` on a dedicated thread
///
/// Blocking reads live on a plain thread rather than tokio's blocking pool,
/// so a pending read never holds up runtime shutdown.
pub fn spawn_input_reader<R>(input: R, tx: mpsc::Sender<UiCommand>) -> Result<JoinHandle<()>>
where
    R: Read + Send + 'static,
{
    std::thread::Builder::new()
        .name("input".into())
        .spawn(move || {
            for line in BufReader::new(input).lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        tracing::warn!("Failed to read input: {}", e);
                        break;
                    }
                };
                match UiCommand::parse(&line) {
                    Some(command) => {
                        if tx.blocking_send(command).is_err() {
                            break;
                        }
                    }
                    None if line.trim().is_empty() => {}
                    None => tracing::warn!("Unknown command: {}", line.trim()),
                }
            }
            tracing::debug!("Input reader finished");
        })
        .context("Failed to spawn input thread")
}

pub struct App {
    recorder: RecorderHandle,
    command_rx: mpsc::Receiver<UiCommand>,
}

impl App {
    pub fn new(config: Config) -> Result<Self> {
        let recorder = Self::setup_recorder(&config)?;
        let command_rx = Self::setup_input()?;

        tracing::info!("Ready! Type r to start/stop recording, p to play, q to quit");

        Ok(Self {
            recorder,
            command_rx,
        })
    }

    pub async fn run(mut self) -> Result<()> {
        loop {
            tracing::debug!("Main loop: waiting for event");
            tokio::select! {
                command = self.command_rx.recv() => match command {
                    Some(UiCommand::Quit) => break,
                    Some(command) => self.handle_command(command).await,
                    None => {
                        tracing::info!("Input closed, shutting down");
                        break;
                    }
                },
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Received Ctrl+C, shutting down");
                    break;
                }
            }
        }

        if let Some(stats) = self.recorder.shutdown().await? {
            tracing::info!("Saved in-progress recording ({} bytes)", stats.bytes_written);
        }
        tracing::info!("Recorder shutdown complete");
        Ok(())
    }

    async fn handle_command(&self, command: UiCommand) {
        tracing::debug!(
            "handle_command: {:?} in state {:?}",
            command,
            self.recorder.state()
        );

        let result = match command {
            UiCommand::ToggleRecording => self.handle_toggle().await,
            UiCommand::Play => self.handle_play().await,
            UiCommand::Quit => Ok(()),
        };

        if let Err(e) = result {
            match e.downcast_ref::<RecorderError>() {
                Some(RecorderError::PermissionDenied) => {
                    tracing::error!("{}: enable the microphone and connect an input device", e)
                }
                _ => tracing::error!("Error handling {:?}: {:#}", command, e),
            }
        }
    }

    async fn handle_toggle(&self) -> Result<()> {
        match self.recorder.toggle().await? {
            ToggleOutcome::Started(path) => {
                tracing::info!("Recording to {:?}. Type r again to stop", path)
            }
            ToggleOutcome::Stopped(stats) => {
                if stats.frames_skipped > 0 {
                    tracing::warn!("{} audio frames were unreadable", stats.frames_skipped);
                }
                tracing::info!("Stopped. Type p to play it back");
            }
        }
        Ok(())
    }

    async fn handle_play(&self) -> Result<()> {
        let bytes = self.recorder.play().await?;
        tracing::info!("Playback complete ({} bytes)", bytes);
        Ok(())
    }

    fn setup_input() -> Result<mpsc::Receiver<UiCommand>> {
        let (command_tx, command_rx) = mpsc::channel(10);
        // Detached: the process exits without waiting for the pending stdin read
        spawn_input_reader(std::io::stdin(), command_tx)?;
        Ok(command_rx)
    }

    fn setup_recorder(config: &Config) -> Result<RecorderHandle> {
        let format = config.audio_format();
        let path = config.recording_path()?;

        let (recorder_tx, recorder_rx) = mpsc::channel(10);
        let recorder = Recorder::new(
            format,
            path,
            recorder_rx,
            MicrophoneSource::factory(config.capture_timeout()),
            SpeakerSink::factory(),
            Arc::new(DevicePermissions::new(config.microphone_enabled)),
        );
        let recorder_handle = RecorderHandle::new(recorder_tx, recorder.subscribe());
        tokio::spawn(recorder.run());

        Ok(recorder_handle)
    }
}
