//! Playback engine.
//!
//! Replays a stored recording: a logical clock advanced from the app's
//! frame tick (~60 Hz), a "currently sounding" view for the renderer, and a
//! background replay thread driving the audio sink. Stopping is a hard
//! cancel through a [`PlaybackGuard`]: once `stop_playback` returns, no
//! further audio triggers fire.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::info;

use crate::audio::{play_sequence, NoteSink, PlaybackGuard};
use crate::clock::MonotonicClock;
use crate::midi::{Note, Recording};

/// Playback refuses to start without notes.
#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    #[error("cannot play an empty recording")]
    EmptySequence,
}

/// State machine: Idle -> Playing -> Idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlaybackState {
    Idle,
    Playing,
}

/// Replays recordings against the session clock.
pub struct PlaybackEngine {
    state: PlaybackState,
    clock: MonotonicClock,
    sink: Arc<dyn NoteSink>,
    notes: Vec<Note>,
    start_ms: u64,
    current_time_ms: u64,
    total_ms: u64,
    guard: Option<PlaybackGuard>,
    generation: u64,
}

impl PlaybackEngine {
    /// Creates an idle engine.
    ///
    /// # Arguments
    ///
    /// * `sink` - Where replay triggers go (the audio engine in production)
    /// * `clock` - The shared session clock
    pub fn new(sink: Arc<dyn NoteSink>, clock: MonotonicClock) -> Self {
        Self {
            state: PlaybackState::Idle,
            clock,
            sink,
            notes: Vec::new(),
            start_ms: 0,
            current_time_ms: 0,
            total_ms: 0,
            guard: None,
            generation: 0,
        }
    }

    /// True while a replay is running.
    pub fn is_playing(&self) -> bool {
        self.state == PlaybackState::Playing
    }

    /// The logical playback clock, in ms from the start of the sequence.
    pub fn current_time_ms(&self) -> u64 {
        self.current_time_ms
    }

    /// The notes of the sequence being (or last) played.
    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    /// Monotonically increasing count of replay starts. Each `start_playback`
    /// bumps it, so stale callbacks from an earlier replay can be recognized.
    #[allow(dead_code)]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Starts replaying a recording from the top.
    ///
    /// Any replay already running is hard-cancelled first.
    ///
    /// # Arguments
    ///
    /// * `recording` - The take to replay
    ///
    /// # Errors
    ///
    /// [`PlaybackError::EmptySequence`] when the recording has no notes.
    pub fn start_playback(&mut self, recording: &Recording) -> Result<(), PlaybackError> {
        if recording.is_empty() {
            return Err(PlaybackError::EmptySequence);
        }
        self.cancel_replay();

        self.generation += 1;
        self.notes = recording.notes.clone();
        self.total_ms = recording.duration_ms();
        self.start_ms = self.clock.now_ms();
        self.current_time_ms = 0;
        self.state = PlaybackState::Playing;

        let guard = PlaybackGuard::new();
        play_sequence(
            Arc::clone(&self.sink),
            self.notes.clone(),
            recording.sustain_events.clone(),
            guard.clone(),
        );
        self.guard = Some(guard);
        info!(
            notes = self.notes.len(),
            duration_ms = self.total_ms,
            generation = self.generation,
            "playback started"
        );
        Ok(())
    }

    /// Hard-stops playback.
    ///
    /// Guaranteed: after this returns, no further note triggers fire from
    /// the replay thread. The clock resets to zero.
    pub fn stop_playback(&mut self) {
        if self.state == PlaybackState::Playing {
            info!(generation = self.generation, "playback stopped");
        }
        self.cancel_replay();
        self.state = PlaybackState::Idle;
        self.current_time_ms = 0;
    }

    /// Advances the logical clock. Called once per frame.
    ///
    /// When the clock passes the end of the sequence the replay is complete:
    /// the engine returns to idle and the clock resets to zero.
    pub fn tick(&mut self) {
        if self.state != PlaybackState::Playing {
            return;
        }
        self.current_time_ms = self.clock.now_ms().saturating_sub(self.start_ms);

        if self.current_time_ms > self.total_ms {
            info!(generation = self.generation, "playback completed");
            self.cancel_replay();
            self.state = PlaybackState::Idle;
            self.current_time_ms = 0;
        }
    }

    /// MIDI numbers sounding at the current clock reading.
    ///
    /// A note is sounding while the clock is inside
    /// `[onset, onset + duration]`.
    pub fn sounding_keys(&self) -> HashSet<u8> {
        if self.state != PlaybackState::Playing {
            return HashSet::new();
        }
        self.notes
            .iter()
            .filter(|n| n.is_sounding_at(self.current_time_ms))
            .map(|n| n.midi_number)
            .collect()
    }

    /// Cancels the replay thread, if one is running.
    fn cancel_replay(&mut self) {
        if let Some(guard) = self.guard.take() {
            guard.cancel();
        }
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        self.cancel_replay();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::Recording;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct CountingSink {
        ons: Mutex<Vec<u8>>,
    }

    impl NoteSink for CountingSink {
        fn note_on(&self, note: u8, _velocity: u8) {
            self.ons.lock().unwrap().push(note);
        }

        fn note_off(&self, _note: u8) {}

        fn control_change(&self, _controller: u8, _value: u8) {}
    }

    fn recording(entries: &[(u8, u64, u64)]) -> Recording {
        let notes = entries
            .iter()
            .map(|&(midi, onset, duration)| {
                Note::from_absolute(midi, onset, onset + duration, 0, false)
            })
            .collect();
        Recording::new("take", notes, Vec::new())
    }

    #[test]
    fn test_empty_recording_rejected() {
        let sink = Arc::new(CountingSink::default());
        let mut engine = PlaybackEngine::new(sink, MonotonicClock::new());
        let empty = Recording::new("empty", Vec::new(), Vec::new());
        assert!(matches!(
            engine.start_playback(&empty),
            Err(PlaybackError::EmptySequence)
        ));
        assert!(!engine.is_playing());
    }

    #[test]
    fn test_playback_completes_and_resets() {
        let sink = Arc::new(CountingSink::default());
        let mut engine = PlaybackEngine::new(sink.clone(), MonotonicClock::new());
        engine
            .start_playback(&recording(&[(60, 0, 40), (64, 50, 40)]))
            .unwrap();
        assert!(engine.is_playing());

        // Sequence is 90 ms long; tick well past the end.
        std::thread::sleep(Duration::from_millis(150));
        engine.tick();
        assert!(!engine.is_playing());
        assert_eq!(engine.current_time_ms(), 0);
        assert_eq!(sink.ons.lock().unwrap().clone(), vec![60, 64]);
    }

    #[test]
    fn test_sounding_window() {
        let sink = Arc::new(CountingSink::default());
        let mut engine = PlaybackEngine::new(sink, MonotonicClock::new());
        engine
            .start_playback(&recording(&[(60, 0, 300), (64, 1000, 300)]))
            .unwrap();

        std::thread::sleep(Duration::from_millis(100));
        engine.tick();
        let sounding = engine.sounding_keys();
        assert!(sounding.contains(&60));
        assert!(!sounding.contains(&64));

        engine.stop_playback();
        assert!(engine.sounding_keys().is_empty());
    }

    #[test]
    fn test_stop_prevents_third_trigger() {
        // Stopping mid-sequence is a hard cut: onsets at 0/500/1000 ms,
        // stop at ~600 ms, and the trigger at 1000 ms never fires.
        let sink = Arc::new(CountingSink::default());
        let mut engine = PlaybackEngine::new(sink.clone(), MonotonicClock::new());
        engine
            .start_playback(&recording(&[
                (60, 0, 200),
                (64, 500, 200),
                (67, 1000, 200),
            ]))
            .unwrap();

        std::thread::sleep(Duration::from_millis(600));
        engine.tick();
        engine.stop_playback();
        assert!(!engine.is_playing());

        // Wait past where the third onset would have been.
        std::thread::sleep(Duration::from_millis(600));
        assert_eq!(sink.ons.lock().unwrap().clone(), vec![60, 64]);
    }

    #[test]
    fn test_restart_bumps_generation() {
        let sink = Arc::new(CountingSink::default());
        let mut engine = PlaybackEngine::new(sink, MonotonicClock::new());
        let take = recording(&[(60, 0, 10)]);
        engine.start_playback(&take).unwrap();
        let first = engine.generation();
        engine.start_playback(&take).unwrap();
        assert_eq!(engine.generation(), first + 1);
        engine.stop_playback();
    }
}
