//! Live session state: recording and playback.
//!
//! Exactly one of the two engines is active at a time (the app enforces the
//! exclusion). Both run against the shared monotonic clock, and both expose
//! the live key state the falling-notes view and the keyboard read every
//! frame.

pub mod playback;
pub mod recorder;

pub use playback::{PlaybackEngine, PlaybackError};
pub use recorder::{ActiveNote, RecordingSession};
