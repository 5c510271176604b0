pub mod capture;
pub mod format;
pub mod playback;
pub mod sink;
pub mod source;

#[cfg(test)]
pub mod fake;

pub use capture::MicrophoneSource;
pub use format::AudioFormat;
pub use playback::SpeakerSink;
pub use sink::{AudioSink, SinkFactory};
pub use source::{AudioSource, SourceFactory};
