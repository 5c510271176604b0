pub mod capture;
pub mod playback;
pub mod recorder;

pub use capture::CaptureStats;
pub use recorder::{Recorder, RecorderHandle};
