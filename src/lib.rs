//! keyfall - a terminal falling-notes piano recorder.
//!
//! This library provides the core engine: transport adapters, the recording
//! session, the playback engine, the audio trigger engine, persistence, and
//! the falling-notes renderer.

pub mod app;
pub mod audio;
pub mod clock;
pub mod midi;
pub mod session;
pub mod store;
pub mod transport;
pub mod ui;

// Re-export commonly used types
pub use app::{App, FocusedPanel};
pub use audio::{AudioEngine, NoteSink, PlaybackGuard};
pub use clock::MonotonicClock;
pub use midi::{ControlChangeEvent, MidiEvent, Note, NoteKind, Recording, SustainEvent};
pub use session::{PlaybackEngine, RecordingSession};
pub use store::{RecordingStore, StoreError};
pub use transport::{BleMidiAdapter, DeviceHandle, MidiTransport, UsbMidiAdapter};
