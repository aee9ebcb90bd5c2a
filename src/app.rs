//! Application state and the single-writer event path.
//!
//! Every input source — the USB adapter's callback thread, the BLE adapter,
//! the on-screen keyboard, the computer-keyboard note map — enqueues
//! canonical events into one channel. [`App::update`], called once per
//! frame, is the only code that applies those events to session state, so
//! two sources firing within the same tick can never lose an update.
//! Audio triggering happens on the same drain and is fire-and-forget; note
//! timestamps were already captured at the source.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use ratatui::layout::Rect;
use tracing::{error, warn};

use crate::audio::{AudioEngine, AudioOutput, NoteSink};
use crate::clock::MonotonicClock;
use crate::midi::{MidiEvent, MidiMessage, NoteKind, Recording};
use crate::session::{PlaybackEngine, RecordingSession};
use crate::store::RecordingStore;
use crate::transport::{BleLink, BleMidiAdapter, MidiTransport, UsbMidiAdapter};

/// How long a status message stays visible.
const STATUS_TIMEOUT: Duration = Duration::from_secs(4);

/// Computer-keyboard note map: two rows covering two octaves from C4.
/// Lower row (Z-M) is the lower octave, upper row (Q-I) the upper.
pub const KEYBOARD_MAP: [(char, u8); 25] = [
    ('z', 60),
    ('s', 61),
    ('x', 62),
    ('d', 63),
    ('c', 64),
    ('v', 65),
    ('g', 66),
    ('b', 67),
    ('h', 68),
    ('n', 69),
    ('j', 70),
    ('m', 71),
    ('q', 72),
    ('2', 73),
    ('w', 74),
    ('3', 75),
    ('e', 76),
    ('r', 77),
    ('5', 78),
    ('t', 79),
    ('6', 80),
    ('y', 81),
    ('7', 82),
    ('u', 83),
    ('i', 84),
];

/// Screen regions used for mouse hit testing, refreshed every render.
#[derive(Debug, Default, Clone, Copy)]
pub struct LayoutRegions {
    pub status_bar: Rect,
    pub side_panel: Rect,
    pub timeline: Rect,
    pub keyboard: Rect,
    /// Inner key area of the keyboard panel (borders excluded).
    pub keyboard_keys: Rect,
}

/// Which panel has input focus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusedPanel {
    Library,
    Devices,
    Timeline,
    Keyboard,
}

/// State of the open rename dialog.
#[derive(Debug, Clone)]
pub struct RenameDialogState {
    /// Id of the recording being renamed.
    pub id: String,
    /// Text entered so far.
    pub input: String,
}

/// Top-level application state.
pub struct App {
    /// Shared session clock; every timestamp in the system comes from it.
    pub clock: MonotonicClock,

    /// The recording session (note assembly).
    pub session: RecordingSession,

    /// The playback engine (replay + sounding set).
    pub playback: PlaybackEngine,

    /// The audio trigger engine, shared with the replay thread.
    pub audio: Arc<AudioEngine>,

    /// Keep-alive for the audio device; dropping it silences everything.
    _audio_output: Option<AudioOutput>,

    /// Recording persistence.
    pub store: RecordingStore,

    /// BLE transport adapter.
    pub ble: BleMidiAdapter,

    /// USB transport adapter.
    pub usb: UsbMidiAdapter,

    /// Producer handle for the on-screen keyboard and key map.
    events_tx: Sender<MidiMessage>,

    /// The single consumer end; drained once per frame.
    events_rx: Receiver<MidiMessage>,

    /// Library cache, refreshed after every store mutation.
    pub recordings: Vec<Recording>,

    /// Index into `recordings`.
    pub selected_recording: usize,

    /// Keys held via touch (mouse) and the computer-keyboard map.
    touch_held: HashSet<u8>,

    /// The key currently held by the mouse button, if any.
    mouse_key: Option<u8>,

    /// Octave shift applied to the computer-keyboard map.
    pub octave_offset: i8,

    pub focused_panel: FocusedPanel,
    pub layout: LayoutRegions,
    pub status_message: Option<(String, Instant)>,
    pub rename_dialog: Option<RenameDialogState>,
}

impl App {
    /// Creates the application.
    ///
    /// # Arguments
    ///
    /// * `store_dir` - Directory for the recording library
    /// * `soundfont` - Optional .sf2 for SoundFont synthesis
    /// * `ble_link` - Platform BLE collaborator, or None on hosts without one
    pub fn new(
        store_dir: PathBuf,
        soundfont: Option<PathBuf>,
        ble_link: Option<Box<dyn BleLink>>,
    ) -> Result<Self> {
        let clock = MonotonicClock::new();
        let (events_tx, events_rx) = channel();

        let audio = Arc::new(AudioEngine::new(soundfont));
        let audio_output = audio
            .initialize()
            .context("Failed to initialize audio engine")?;

        let store = RecordingStore::open(&store_dir)
            .with_context(|| format!("Failed to open recording store at {}", store_dir.display()))?;
        let recordings = store.list().unwrap_or_default();

        let ble = BleMidiAdapter::new(ble_link, events_tx.clone(), clock);
        let usb = UsbMidiAdapter::new(events_tx.clone(), clock);

        let playback = PlaybackEngine::new(
            Arc::clone(&audio) as Arc<dyn NoteSink>,
            clock,
        );

        Ok(Self {
            clock,
            session: RecordingSession::new(),
            playback,
            audio,
            _audio_output: audio_output,
            store,
            ble,
            usb,
            events_tx,
            events_rx,
            recordings,
            selected_recording: 0,
            touch_held: HashSet::new(),
            mouse_key: None,
            octave_offset: 0,
            focused_panel: FocusedPanel::Keyboard,
            layout: LayoutRegions::default(),
            status_message: None,
            rename_dialog: None,
        })
    }

    /// Per-frame update: drives the adapters, drains the event channel, and
    /// advances both engines. This is the single writer for session state.
    pub fn update(&mut self) {
        self.ble.tick();
        self.usb.tick();

        while let Ok(event) = self.events_rx.try_recv() {
            self.apply_event(event);
        }

        self.session.tick(self.clock.now_ms());
        self.playback.tick();
    }

    /// Applies one canonical event: audio trigger plus session bookkeeping.
    fn apply_event(&mut self, message: MidiMessage) {
        match message {
            MidiMessage::Note(note_event) => {
                match note_event.kind {
                    NoteKind::On => self.audio.note_on(note_event.note, note_event.velocity),
                    NoteKind::Off => self.audio.note_off(note_event.note),
                }
                self.session.handle_note(note_event);
            }
            MidiMessage::Control(cc) => {
                self.audio.control_change(cc.controller, cc.value);
                self.session.handle_control(cc);
            }
        }
    }

    /// Held keys merged across every source, plus the keys sounding in an
    /// active replay (so playback lights up the keyboard too).
    pub fn merged_pressed_keys(&self) -> HashSet<u8> {
        let mut pressed = self.touch_held.clone();
        pressed.extend(self.usb.held_keys());
        pressed.extend(self.ble.held_keys());
        pressed.extend(self.playback.sounding_keys());
        pressed
    }

    // --- status messages ---

    /// Shows a transient status message.
    pub fn set_status(&mut self, message: impl Into<String>) {
        self.status_message = Some((message.into(), Instant::now()));
    }

    /// Drops the status message once it has been visible long enough.
    pub fn clear_expired_status(&mut self) {
        if let Some((_, since)) = &self.status_message {
            if since.elapsed() > STATUS_TIMEOUT {
                self.status_message = None;
            }
        }
    }

    // --- recording control ---

    /// Starts or stops recording. Stopping saves the take.
    pub fn toggle_recording(&mut self) {
        if self.session.is_recording() {
            self.stop_and_save();
        } else {
            // Recording and playback are mutually exclusive.
            self.playback.stop_playback();
            self.session.start_recording(self.clock.now_ms());
            self.set_status("Recording... press R to stop");
        }
    }

    /// Stops the session and persists the take, if it has any notes.
    fn stop_and_save(&mut self) {
        let (notes, sustain_events) = self.session.stop_recording(self.clock.now_ms());
        if notes.is_empty() {
            self.set_status("Nothing recorded");
            return;
        }
        let name = format!("Take {}", self.recordings.len() + 1);
        match self.store.save(name, notes, sustain_events) {
            Ok(recording) => {
                self.set_status(format!(
                    "Saved \"{}\" ({} notes)",
                    recording.name,
                    recording.note_count()
                ));
                self.refresh_recordings();
            }
            Err(err) => {
                // Session state is untouched; the user may retry the save.
                error!(error = %err, "failed to save recording");
                self.set_status(format!("Save failed: {}", err));
            }
        }
    }

    /// Discards the in-progress (or last unsaved) take.
    pub fn clear_recording(&mut self) {
        self.session.clear_recording();
        self.set_status("Recording cleared");
    }

    // --- playback control ---

    /// Starts replaying the selected recording, or stops the current replay.
    pub fn toggle_playback(&mut self) {
        if self.playback.is_playing() {
            self.playback.stop_playback();
            self.audio.stop_all();
            self.set_status("Stopped");
            return;
        }
        if self.session.is_recording() {
            self.set_status("Stop recording first");
            return;
        }
        let Some(recording) = self.recordings.get(self.selected_recording).cloned() else {
            self.set_status("No recording selected");
            return;
        };
        match self.playback.start_playback(&recording) {
            Ok(()) => self.set_status(format!("Playing \"{}\"", recording.name)),
            Err(err) => self.set_status(err.to_string()),
        }
    }

    // --- library ---

    /// Reloads the library cache from the store.
    pub fn refresh_recordings(&mut self) {
        match self.store.list() {
            Ok(recordings) => {
                self.recordings = recordings;
                if self.selected_recording >= self.recordings.len() {
                    self.selected_recording = self.recordings.len().saturating_sub(1);
                }
            }
            Err(err) => {
                error!(error = %err, "failed to list recordings");
                self.set_status(format!("Library error: {}", err));
            }
        }
    }

    /// Moves the library selection.
    pub fn select_recording(&mut self, delta: i32) {
        if self.recordings.is_empty() {
            return;
        }
        let last = self.recordings.len() as i32 - 1;
        let next = (self.selected_recording as i32 + delta).clamp(0, last);
        self.selected_recording = next as usize;
    }

    /// Deletes the selected recording.
    pub fn delete_selected(&mut self) {
        let Some(recording) = self.recordings.get(self.selected_recording) else {
            return;
        };
        let name = recording.name.clone();
        match self.store.delete(&recording.id) {
            Ok(true) => {
                self.set_status(format!("Deleted \"{}\"", name));
                self.refresh_recordings();
            }
            Ok(false) => self.set_status("Recording already gone"),
            Err(err) => self.set_status(format!("Delete failed: {}", err)),
        }
    }

    /// Exports the selected recording to a JSON file in the library
    /// directory's `exports` subfolder.
    pub fn export_selected(&mut self) {
        let Some(recording) = self.recordings.get(self.selected_recording) else {
            return;
        };
        let id = recording.id.clone();
        let name = recording.name.replace(' ', "_");
        match self.store.export(&id) {
            Ok(Some(document)) => {
                let dir = PathBuf::from("exports");
                let write = std::fs::create_dir_all(&dir)
                    .and_then(|_| std::fs::write(dir.join(format!("{}.json", name)), document));
                match write {
                    Ok(()) => self.set_status(format!("Exported to exports/{}.json", name)),
                    Err(err) => self.set_status(format!("Export failed: {}", err)),
                }
            }
            Ok(None) => self.set_status("Recording already gone"),
            Err(err) => self.set_status(format!("Export failed: {}", err)),
        }
    }

    // --- rename dialog ---

    /// Opens the rename dialog for the selected recording.
    pub fn open_rename_dialog(&mut self) {
        if let Some(recording) = self.recordings.get(self.selected_recording) {
            self.rename_dialog = Some(RenameDialogState {
                id: recording.id.clone(),
                input: recording.name.clone(),
            });
        }
    }

    /// Appends a character to the rename input.
    pub fn rename_dialog_input(&mut self, c: char) {
        if let Some(dialog) = &mut self.rename_dialog {
            if !c.is_control() && dialog.input.len() < 48 {
                dialog.input.push(c);
            }
        }
    }

    /// Removes the last character of the rename input.
    pub fn rename_dialog_backspace(&mut self) {
        if let Some(dialog) = &mut self.rename_dialog {
            dialog.input.pop();
        }
    }

    /// Applies the rename and closes the dialog.
    pub fn rename_dialog_confirm(&mut self) {
        let Some(dialog) = self.rename_dialog.take() else {
            return;
        };
        if dialog.input.trim().is_empty() {
            self.set_status("Name cannot be empty");
            return;
        }
        match self.store.rename(&dialog.id, dialog.input.trim()) {
            Ok(true) => {
                self.set_status("Renamed");
                self.refresh_recordings();
            }
            Ok(false) => self.set_status("Recording already gone"),
            Err(err) => self.set_status(format!("Rename failed: {}", err)),
        }
    }

    /// Closes the dialog without renaming.
    pub fn rename_dialog_cancel(&mut self) {
        self.rename_dialog = None;
    }

    // --- transports ---

    /// Refreshes USB devices and connects to the best-scoring one.
    pub fn usb_refresh_and_connect(&mut self) {
        self.usb.refresh_devices();
        match self.usb.connect_best() {
            Ok(()) => {
                let name = self.usb.connected_device_name().unwrap_or("?").to_string();
                self.set_status(format!("USB: connected to {}", name));
            }
            Err(err) => {
                warn!(error = %err, "USB connect failed");
                self.set_status(format!("USB: {}", err));
            }
        }
    }

    /// Starts or stops a BLE scan.
    pub fn ble_toggle_scan(&mut self) {
        if self.ble.is_scanning() {
            self.ble.stop_scanning();
            self.set_status("BLE scan stopped");
            return;
        }
        if !self.ble.is_available() {
            self.set_status("BLE MIDI is not available on this platform");
            return;
        }
        match self.ble.start_scanning() {
            Ok(()) => self.set_status("BLE: scanning (10s)..."),
            Err(err) => self.set_status(format!("BLE: {}", err)),
        }
    }

    /// Disconnects the BLE peripheral, if one is connected.
    pub fn ble_disconnect(&mut self) {
        if self.ble.connected_device_name().is_some() {
            self.ble.disconnect();
            self.set_status("BLE: disconnected");
        }
    }

    /// Connects to the first discovered BLE peripheral, if any.
    pub fn ble_connect_first(&mut self) {
        let Some(device) = self.ble.devices().first().cloned() else {
            self.set_status("No BLE devices discovered");
            return;
        };
        match self.ble.connect_to_device(&device.id) {
            Ok(()) => self.set_status(format!("BLE: connected to {}", device.display_name)),
            Err(err) => self.set_status(format!("BLE: {}", err)),
        }
    }

    // --- touch / key-map producers ---

    /// Presses a key from the on-screen keyboard or key map.
    ///
    /// Enqueues a canonical note-on; the event is applied on the next
    /// frame's drain, same as events from the hardware transports.
    pub fn press_key(&mut self, note: u8) {
        if !crate::midi::in_piano_range(note) || !self.touch_held.insert(note) {
            return;
        }
        let event = MidiEvent::note_on(note, 100, self.clock.now_ms());
        let _ = self.events_tx.send(MidiMessage::Note(event));
    }

    /// Releases a key pressed via [`press_key`](Self::press_key).
    pub fn release_key(&mut self, note: u8) {
        if !self.touch_held.remove(&note) {
            return;
        }
        let event = MidiEvent::note_off(note, self.clock.now_ms());
        let _ = self.events_tx.send(MidiMessage::Note(event));
    }

    /// Releases every touch-held key (used when focus or mode changes).
    pub fn release_all_keys(&mut self) {
        let held: Vec<u8> = self.touch_held.iter().copied().collect();
        for note in held {
            self.release_key(note);
        }
    }

    /// Maps a character to a note via the keyboard map and presses it.
    ///
    /// # Returns
    ///
    /// true if the character was a note key
    pub fn handle_note_key(&mut self, c: char) -> bool {
        let Some(note) = self.map_key(c) else {
            return false;
        };
        self.press_key(note);
        true
    }

    /// Releases a note previously pressed via the keyboard map.
    pub fn handle_note_key_release(&mut self, c: char) {
        if let Some(note) = self.map_key(c) {
            self.release_key(note);
        }
    }

    /// Resolves a character through the map and octave shift.
    fn map_key(&self, c: char) -> Option<u8> {
        let base = KEYBOARD_MAP
            .iter()
            .find(|(key, _)| *key == c.to_ascii_lowercase())
            .map(|(_, note)| *note)?;
        let shifted = base as i16 + self.octave_offset as i16 * 12;
        u8::try_from(shifted).ok().filter(|n| crate::midi::in_piano_range(*n))
    }

    /// Shifts the keyboard-map octave, releasing held keys first so no
    /// note-off gets lost in the transposition.
    pub fn change_octave(&mut self, delta: i8) {
        self.release_all_keys();
        self.octave_offset = (self.octave_offset + delta).clamp(-4, 2);
        self.set_status(format!("Octave shift: {:+}", self.octave_offset));
    }

    // --- mouse ---

    /// Handles a mouse press: keyboard keys sound, library rows select.
    pub fn handle_mouse_down(&mut self, x: u16, y: u16) {
        if let Some(note) = crate::ui::keyboard_hit_test(self.layout.keyboard_keys, x, y) {
            self.mouse_key = Some(note);
            self.press_key(note);
            self.focused_panel = FocusedPanel::Keyboard;
        }
    }

    /// Handles mouse release: lets go of the held key, if any.
    pub fn handle_mouse_up(&mut self) {
        if let Some(note) = self.mouse_key.take() {
            self.release_key(note);
        }
    }

    /// Updates hit-test regions after a render.
    pub fn update_layout(&mut self, layout: LayoutRegions) {
        self.layout = layout;
    }

    /// Cycles panel focus.
    pub fn cycle_focus(&mut self) {
        self.focused_panel = match self.focused_panel {
            FocusedPanel::Library => FocusedPanel::Devices,
            FocusedPanel::Devices => FocusedPanel::Timeline,
            FocusedPanel::Timeline => FocusedPanel::Keyboard,
            FocusedPanel::Keyboard => FocusedPanel::Library,
        };
    }
}
