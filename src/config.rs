use crate::audio::AudioFormat;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_DIR: &str = "pcm-recorder";
const CONFIG_FILE: &str = "config.json";
const RECORDING_FILE: &str = "recording.pcm";

/// `$var` if set, else `$HOME/<home_relative>`
fn base_dir(var: &str, home_relative: &str) -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(var) {
        return Ok(PathBuf::from(dir));
    }
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(home_relative))
}

#[derive(Debug, Deserialize, Serialize, PartialEq)]
pub struct Config {
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    #[serde(default = "default_channels")]
    pub channels: u16,

    /// Overrides the default location under the music directory
    #[serde(default)]
    pub recording_path: Option<PathBuf>,

    #[serde(default = "default_microphone_enabled")]
    pub microphone_enabled: bool,

    /// Longest a single frame read may block before returning what it has
    #[serde(default = "default_capture_timeout_ms")]
    pub capture_timeout_ms: u64,
}

fn default_sample_rate() -> u32 {
    44100
}

fn default_channels() -> u16 {
    1
}

fn default_microphone_enabled() -> bool {
    true
}

fn default_capture_timeout_ms() -> u64 {
    500
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            channels: default_channels(),
            recording_path: None,
            microphone_enabled: default_microphone_enabled(),
            capture_timeout_ms: default_capture_timeout_ms(),
        }
    }
}

impl Config {
    /// Read `$XDG_CONFIG_HOME/pcm-recorder/config.json`, creating it on first run
    pub fn load() -> Result<Self> {
        let dir = base_dir("XDG_CONFIG_HOME", ".config")?;
        Self::load_from(&dir.join(APP_DIR).join(CONFIG_FILE))
    }

    /// Parse the config at `config_path`; a missing file is replaced by defaults
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(config_path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::info!("No config at {:?}, writing defaults", config_path);
                let config = Self::default();
                config.save_to(config_path)?;
                return Ok(config);
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Cannot read config {:?}", config_path));
            }
        };

        let config = serde_json::from_str(&contents)
            .with_context(|| format!("Invalid config {:?}", config_path))?;
        tracing::debug!("Using config {:?}", config_path);
        Ok(config)
    }

    /// Write this config as pretty JSON, creating parent directories
    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(dir) = config_path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Cannot create config directory {:?}", dir))?;
        }

        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(config_path, json)
            .with_context(|| format!("Cannot write config {:?}", config_path))
    }

    /// Where recordings are written: the override, or `recording.pcm` in the music directory
    pub fn recording_path(&self) -> Result<PathBuf> {
        match &self.recording_path {
            Some(path) => Ok(path.clone()),
            None => Ok(base_dir("XDG_MUSIC_DIR", "Music")?
                .join(APP_DIR)
                .join(RECORDING_FILE)),
        }
    }

    pub fn audio_format(&self) -> AudioFormat {
        AudioFormat {
            sample_rate: self.sample_rate,
            channels: self.channels,
        }
    }

    pub fn capture_timeout(&self) -> Duration {
        Duration::from_millis(self.capture_timeout_ms)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(anyhow::anyhow!("sample_rate must be greater than zero"));
        }

        if !(1..=2).contains(&self.channels) {
            return Err(anyhow::anyhow!("channels must be 1 (mono) or 2 (stereo)"));
        }

        if self.capture_timeout_ms == 0 {
            return Err(anyhow::anyhow!("capture_timeout_ms must be greater than zero"));
        }

        if let Some(path) = &self.recording_path
            && path.as_os_str().is_empty()
        {
            return Err(anyhow::anyhow!("recording_path cannot be empty"));
        }

        Ok(())
    }
}
