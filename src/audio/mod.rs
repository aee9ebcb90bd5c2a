//! Audio trigger engine.
//!
//! Maps MIDI notes to audible events with best-effort latency. Synthesis
//! uses rustysynth when a SoundFont is loaded and a plain rodio sine voice
//! otherwise; with no audio device at all the engine degrades to logged
//! no-ops. Nothing in this module is on the timing-critical measurement
//! path: note timestamps are captured before any audio dispatch happens.

pub mod engine;

pub use engine::{play_sequence, AudioEngine, AudioOutput, NoteSink, PlaybackGuard};
