//! Audio engine: note triggering and sequence replay.
//!
//! The engine has three backends, picked at initialization:
//! - SoundFont synthesis via rustysynth, rendered through rodio (the full
//!   piano sound, when an .sf2 file is supplied)
//! - A sine voice per held key through rodio, using the equal-temperament
//!   frequency table (no assets required)
//! - Silent: every trigger is a logged no-op (no audio device available)
//!
//! All trigger methods are fire-and-forget and must never panic into the
//! event path that calls them.

use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use rodio::source::SineWave;
use rodio::{OutputStream, OutputStreamHandle, Sink, Source};
use rustysynth::{SoundFont, Synthesizer, SynthesizerSettings};
use tracing::{debug, info, warn};

use crate::midi::{midi_to_frequency, Note, SustainEvent, SUSTAIN_CONTROLLER};

/// Sample rate for SoundFont synthesis (44.1 kHz standard).
pub const SAMPLE_RATE: u32 = 44100;

/// Render buffer size for the synth stream. Smaller = lower latency.
const BUFFER_SIZE: usize = 256;

/// Gain applied to sine voices, scaled by velocity.
const SINE_GAIN: f32 = 0.18;

/// Anything that can sound a note.
///
/// The seam between the playback path and the audio backend: the playback
/// engine drives a `NoteSink`, which in production is [`AudioEngine`] and in
/// tests a recording fake.
pub trait NoteSink: Send + Sync {
    /// Starts sounding a note. Fire-and-forget.
    fn note_on(&self, note: u8, velocity: u8);

    /// Stops sounding a note. Fire-and-forget.
    fn note_off(&self, note: u8);

    /// Forwards a control change (sustain pedal during replay).
    fn control_change(&self, controller: u8, value: u8);
}

/// Audio source that pulls stereo samples from the synthesizer.
struct SynthSource {
    synth: Arc<Mutex<Synthesizer>>,
    left: Vec<f32>,
    right: Vec<f32>,
    position: usize,
    channel: usize,
}

impl SynthSource {
    fn new(synth: Arc<Mutex<Synthesizer>>) -> Self {
        Self {
            synth,
            left: vec![0.0; BUFFER_SIZE],
            right: vec![0.0; BUFFER_SIZE],
            position: BUFFER_SIZE, // forces a render on the first pull
            channel: 0,
        }
    }
}

impl Iterator for SynthSource {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        if self.position >= BUFFER_SIZE {
            if let Ok(mut synth) = self.synth.lock() {
                synth.render(&mut self.left, &mut self.right);
            } else {
                self.left.fill(0.0);
                self.right.fill(0.0);
            }
            self.position = 0;
        }

        // Interleave stereo samples: L, R, L, R, ...
        let sample = if self.channel == 0 {
            self.left[self.position]
        } else {
            self.right[self.position]
        };
        self.channel = 1 - self.channel;
        if self.channel == 0 {
            self.position += 1;
        }
        Some(sample)
    }
}

impl Source for SynthSource {
    fn current_frame_len(&self) -> Option<usize> {
        None
    }

    fn channels(&self) -> u16 {
        2
    }

    fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }

    fn total_duration(&self) -> Option<Duration> {
        None
    }
}

/// The active audio backend.
enum Backend {
    /// SoundFont synthesis through the shared output mixer.
    Synth {
        synth: Arc<Mutex<Synthesizer>>,
        _handle: OutputStreamHandle,
    },
    /// One rodio sink per sounding key, each playing a sine voice.
    Sine {
        sinks: Mutex<HashMap<u8, Sink>>,
        handle: OutputStreamHandle,
    },
    /// No audio device; triggers are logged no-ops.
    Silent,
}

/// Keep-alive guard for the audio device.
///
/// `rodio::OutputStream` is not `Send`, so the engine cannot own it and still
/// be shared with the replay thread. The caller keeps this guard alive on the
/// main thread for as long as audio should flow.
pub struct AudioOutput {
    _stream: OutputStream,
}

/// The audio trigger engine.
///
/// Construct with [`AudioEngine::new`], then call [`initialize`] once (extra
/// calls are no-ops). Triggers are safe to call in any state.
///
/// [`initialize`]: AudioEngine::initialize
pub struct AudioEngine {
    soundfont_path: Option<PathBuf>,
    backend: Mutex<Option<Backend>>,
    degraded_logged: AtomicBool,
}

impl AudioEngine {
    /// Creates an uninitialized engine.
    ///
    /// # Arguments
    ///
    /// * `soundfont_path` - Optional .sf2 file for SoundFont synthesis;
    ///   without one the engine uses sine voices
    pub fn new(soundfont_path: Option<PathBuf>) -> Self {
        Self {
            soundfont_path,
            backend: Mutex::new(None),
            degraded_logged: AtomicBool::new(false),
        }
    }

    /// Opens the audio device and builds the backend. Idempotent.
    ///
    /// A missing audio device is not an error: the engine degrades to the
    /// silent backend and logs once. A SoundFont that exists but fails to
    /// load is an error, since the caller asked for it explicitly.
    ///
    /// # Returns
    ///
    /// The device keep-alive guard on first successful initialization; None
    /// when already initialized or when no device is available.
    ///
    /// # Errors
    ///
    /// Returns an error only when a requested SoundFont cannot be read or
    /// parsed.
    pub fn initialize(&self) -> Result<Option<AudioOutput>> {
        let mut backend = match self.backend.lock() {
            Ok(guard) => guard,
            Err(_) => return Ok(None),
        };
        if backend.is_some() {
            return Ok(None);
        }

        let (stream, handle) = match OutputStream::try_default() {
            Ok(pair) => pair,
            Err(err) => {
                warn!(error = %err, "no audio output device; audio is disabled");
                *backend = Some(Backend::Silent);
                return Ok(None);
            }
        };

        if let Some(path) = &self.soundfont_path {
            let mut file = BufReader::new(
                File::open(path)
                    .with_context(|| format!("Failed to open SoundFont: {}", path.display()))?,
            );
            let soundfont = Arc::new(
                SoundFont::new(&mut file)
                    .map_err(|e| anyhow::anyhow!("Failed to load SoundFont: {:?}", e))?,
            );
            let settings = SynthesizerSettings::new(SAMPLE_RATE as i32);
            let synth = Synthesizer::new(&soundfont, &settings)
                .map_err(|e| anyhow::anyhow!("Failed to create synthesizer: {:?}", e))?;
            let synth = Arc::new(Mutex::new(synth));

            handle
                .play_raw(SynthSource::new(Arc::clone(&synth)))
                .context("Failed to start audio playback")?;

            info!(soundfont = %path.display(), "audio initialized with SoundFont");
            *backend = Some(Backend::Synth {
                synth,
                _handle: handle,
            });
        } else {
            info!("audio initialized with sine voices (no SoundFont)");
            *backend = Some(Backend::Sine {
                sinks: Mutex::new(HashMap::new()),
                handle,
            });
        }
        Ok(Some(AudioOutput { _stream: stream }))
    }

    /// True when triggers will actually make sound.
    pub fn available(&self) -> bool {
        match self.backend.lock() {
            Ok(guard) => matches!(
                guard.as_ref(),
                Some(Backend::Synth { .. }) | Some(Backend::Sine { .. })
            ),
            Err(_) => false,
        }
    }

    /// Logs the degraded-audio notice once.
    fn note_degraded(&self) {
        if !self.degraded_logged.swap(true, Ordering::Relaxed) {
            warn!("audio unavailable; note triggers are no-ops");
        }
    }

    /// Stops every sounding voice.
    pub fn stop_all(&self) {
        let Ok(guard) = self.backend.lock() else {
            return;
        };
        match guard.as_ref() {
            Some(Backend::Synth { synth, .. }) => {
                if let Ok(mut synth) = synth.lock() {
                    synth.note_off_all(true);
                }
            }
            Some(Backend::Sine { sinks, .. }) => {
                if let Ok(mut sinks) = sinks.lock() {
                    for (_, sink) in sinks.drain() {
                        sink.stop();
                    }
                }
            }
            _ => {}
        }
    }

    /// Releases the audio device. Safe to call repeatedly.
    pub fn cleanup(&self) {
        self.stop_all();
        if let Ok(mut guard) = self.backend.lock() {
            *guard = None;
        }
    }
}

impl NoteSink for AudioEngine {
    fn note_on(&self, note: u8, velocity: u8) {
        let Ok(guard) = self.backend.lock() else {
            return;
        };
        match guard.as_ref() {
            Some(Backend::Synth { synth, .. }) => {
                if let Ok(mut synth) = synth.lock() {
                    synth.note_on(0, note as i32, velocity as i32);
                }
            }
            Some(Backend::Sine { sinks, handle, .. }) => {
                let Ok(sink) = Sink::try_new(handle) else {
                    debug!(note, "sine sink creation failed");
                    return;
                };
                let gain = SINE_GAIN * (velocity as f32 / 127.0);
                sink.append(SineWave::new(midi_to_frequency(note)).amplify(gain));
                if let Ok(mut sinks) = sinks.lock() {
                    // A retrigger replaces (and stops) the previous voice.
                    if let Some(previous) = sinks.insert(note, sink) {
                        previous.stop();
                    }
                }
            }
            _ => self.note_degraded(),
        }
    }

    fn note_off(&self, note: u8) {
        let Ok(guard) = self.backend.lock() else {
            return;
        };
        match guard.as_ref() {
            Some(Backend::Synth { synth, .. }) => {
                if let Ok(mut synth) = synth.lock() {
                    synth.note_off(0, note as i32);
                }
            }
            Some(Backend::Sine { sinks, .. }) => {
                if let Ok(mut sinks) = sinks.lock() {
                    if let Some(sink) = sinks.remove(&note) {
                        sink.stop();
                    }
                }
            }
            _ => {}
        }
    }

    fn control_change(&self, controller: u8, value: u8) {
        let Ok(guard) = self.backend.lock() else {
            return;
        };
        if let Some(Backend::Synth { synth, .. }) = guard.as_ref() {
            if let Ok(mut synth) = synth.lock() {
                synth.process_midi_message(0, 0xB0, controller as i32, value as i32);
            }
        }
        // Sine voices have no sustain model; the pedal only matters to the
        // SoundFont synth.
    }
}

/// Cancellation token for an in-flight sequence replay.
///
/// `cancel` is synchronous and hard: once it returns, no further trigger
/// callbacks fire from the replay thread. That is guaranteed by taking the
/// fire lock, which the replay loop holds across every check-then-trigger
/// pair.
#[derive(Clone)]
pub struct PlaybackGuard {
    cancelled: Arc<AtomicBool>,
    fire_lock: Arc<Mutex<()>>,
}

impl PlaybackGuard {
    /// Creates a live (not yet cancelled) guard.
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            fire_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Cancels the replay. Blocks until any in-flight trigger completes, so
    /// after this returns no further callbacks can fire.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        // Wait out a trigger that had already passed its cancellation check.
        drop(self.fire_lock.lock());
    }

    /// True once cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl Default for PlaybackGuard {
    fn default() -> Self {
        Self::new()
    }
}

/// One step of a replay schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReplayAction {
    NoteOn(u8, u8),
    NoteOff(u8),
    Sustain(u8),
}

/// Builds the time-ordered replay schedule for a note list.
fn build_schedule(notes: &[Note], sustain_events: &[SustainEvent]) -> Vec<(u64, ReplayAction)> {
    let mut schedule: Vec<(u64, ReplayAction)> = Vec::with_capacity(notes.len() * 2);
    for note in notes {
        schedule.push((
            note.onset_offset_ms,
            ReplayAction::NoteOn(note.midi_number, 100),
        ));
        schedule.push((note.end_offset_ms(), ReplayAction::NoteOff(note.midi_number)));
    }
    for event in sustain_events {
        let value = if event.is_active { 127 } else { 0 };
        schedule.push((event.onset_offset_ms, ReplayAction::Sustain(value)));
    }
    // Stable sort keeps note-ons ahead of simultaneous note-offs pushed later.
    schedule.sort_by_key(|(time, _)| *time);
    schedule
}

/// Replays a note sequence against a sink on a background thread.
///
/// A wait-then-fire loop: before each schedule entry the thread sleeps until
/// the entry's offset, in short slices so cancellation stays prompt. Notes
/// always fire in onset order. The loop re-checks the guard under the fire
/// lock immediately before every trigger, which is what makes
/// [`PlaybackGuard::cancel`] a hard cut.
///
/// # Arguments
///
/// * `sink` - Where triggers go
/// * `notes` - Notes to replay, timing relative to sequence start
/// * `sustain_events` - Pedal transitions forwarded as CC64
/// * `guard` - Cancellation token shared with the caller
///
/// # Returns
///
/// The join handle of the replay thread
pub fn play_sequence(
    sink: Arc<dyn NoteSink>,
    notes: Vec<Note>,
    sustain_events: Vec<SustainEvent>,
    guard: PlaybackGuard,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let schedule = build_schedule(&notes, &sustain_events);
        let start = Instant::now();

        for (offset_ms, action) in schedule {
            // Sleep up to the entry's offset in small slices.
            loop {
                if guard.is_cancelled() {
                    return;
                }
                let elapsed = start.elapsed().as_millis() as u64;
                if elapsed >= offset_ms {
                    break;
                }
                let remaining = offset_ms - elapsed;
                std::thread::sleep(Duration::from_millis(remaining.min(10)));
            }

            // Check-then-fire under the lock; cancel() synchronizes on it.
            let Ok(_fire) = guard.fire_lock.lock() else {
                return;
            };
            if guard.is_cancelled() {
                return;
            }
            match action {
                ReplayAction::NoteOn(note, velocity) => sink.note_on(note, velocity),
                ReplayAction::NoteOff(note) => sink.note_off(note),
                ReplayAction::Sustain(value) => sink.control_change(SUSTAIN_CONTROLLER, value),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::Note;
    use std::sync::Mutex;

    /// Sink that records every trigger with a timestamp.
    #[derive(Default)]
    struct RecordingSink {
        calls: Mutex<Vec<(String, u8)>>,
    }

    impl RecordingSink {
        fn calls(&self) -> Vec<(String, u8)> {
            self.calls.lock().unwrap().clone()
        }

        fn ons(&self) -> Vec<u8> {
            self.calls()
                .into_iter()
                .filter(|(kind, _)| kind == "on")
                .map(|(_, note)| note)
                .collect()
        }
    }

    impl NoteSink for RecordingSink {
        fn note_on(&self, note: u8, _velocity: u8) {
            self.calls.lock().unwrap().push(("on".into(), note));
        }

        fn note_off(&self, note: u8) {
            self.calls.lock().unwrap().push(("off".into(), note));
        }

        fn control_change(&self, _controller: u8, value: u8) {
            self.calls.lock().unwrap().push(("cc".into(), value));
        }
    }

    fn note(midi: u8, onset_ms: u64, duration_ms: u64) -> Note {
        Note::from_absolute(midi, onset_ms, onset_ms + duration_ms, 0, false)
    }

    #[test]
    fn test_schedule_order() {
        let notes = vec![note(60, 0, 200), note(64, 500, 200), note(67, 1000, 200)];
        let schedule = build_schedule(&notes, &[]);
        let times: Vec<u64> = schedule.iter().map(|(t, _)| *t).collect();
        let mut sorted = times.clone();
        sorted.sort_unstable();
        assert_eq!(times, sorted);
        assert_eq!(schedule[0].1, ReplayAction::NoteOn(60, 100));
    }

    #[test]
    fn test_play_sequence_fires_in_onset_order() {
        let sink = Arc::new(RecordingSink::default());
        let notes = vec![note(60, 0, 30), note(64, 60, 30), note(67, 120, 30)];
        let guard = PlaybackGuard::new();
        let handle = play_sequence(sink.clone(), notes, Vec::new(), guard);
        handle.join().unwrap();
        assert_eq!(sink.ons(), vec![60, 64, 67]);
    }

    #[test]
    fn test_stop_prevents_pending_triggers() {
        // Three notes at 0 / 500 / 1000 ms; cancelling at ~600 ms must keep
        // the third trigger from ever firing.
        let sink = Arc::new(RecordingSink::default());
        let notes = vec![note(60, 0, 200), note(64, 500, 200), note(67, 1000, 200)];
        let guard = PlaybackGuard::new();
        let handle = play_sequence(sink.clone(), notes, Vec::new(), guard.clone());

        std::thread::sleep(Duration::from_millis(600));
        guard.cancel();
        let after_cancel = sink.ons().len();

        handle.join().unwrap();
        assert_eq!(after_cancel, 2);
        assert_eq!(sink.ons(), vec![60, 64]);
    }

    #[test]
    fn test_cancel_before_start() {
        let sink = Arc::new(RecordingSink::default());
        let guard = PlaybackGuard::new();
        guard.cancel();
        let handle = play_sequence(sink.clone(), vec![note(60, 0, 100)], Vec::new(), guard);
        handle.join().unwrap();
        assert!(sink.calls().is_empty());
    }

    #[test]
    fn test_sustain_events_forwarded() {
        let sink = Arc::new(RecordingSink::default());
        let sustain = vec![
            SustainEvent {
                onset_offset_ms: 0,
                is_active: true,
            },
            SustainEvent {
                onset_offset_ms: 40,
                is_active: false,
            },
        ];
        let guard = PlaybackGuard::new();
        play_sequence(sink.clone(), vec![note(60, 0, 30)], sustain, guard)
            .join()
            .unwrap();
        let ccs: Vec<u8> = sink
            .calls()
            .into_iter()
            .filter(|(kind, _)| kind == "cc")
            .map(|(_, value)| value)
            .collect();
        assert_eq!(ccs, vec![127, 0]);
    }

    #[test]
    fn test_engine_initialize_idempotent() {
        // With or without a device, repeated initialization must be safe.
        let engine = AudioEngine::new(None);
        assert!(engine.initialize().is_ok());
        assert!(engine.initialize().is_ok());
        engine.cleanup();
        engine.cleanup();
    }

    #[test]
    fn test_missing_soundfont_is_an_error() {
        let engine = AudioEngine::new(Some(PathBuf::from("/no/such/font.sf2")));
        // Only fails when an output device exists to get that far; either
        // way it must not panic.
        let _ = engine.initialize();
    }
}
