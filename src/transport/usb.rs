//! USB MIDI adapter.
//!
//! Wraps the OS MIDI stack via `midir`: port enumeration, a scored
//! best-device heuristic, and a connection whose input callback decodes raw
//! bytes into canonical events and forwards them into the shared channel.
//!
//! Some OSes expose virtual/loopback endpoints ("Session 1" style) alongside
//! real controllers; the scoring heuristic exists to keep those from being
//! picked as the active device.

use std::collections::HashSet;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};

use midir::{Ignore, MidiInput, MidiInputConnection};
use tracing::{info, warn};

use crate::clock::MonotonicClock;
use crate::midi::{decode_midi_message, MidiMessage, NoteKind};
use crate::transport::{
    ConnectionState, DeviceHandle, MidiTransport, TransportError, TransportKind,
};

/// How often `tick` re-enumerates ports to detect plug/unplug, in ms.
const HOTPLUG_POLL_INTERVAL_MS: u64 = 2_000;

/// Manufacturers recognized by the device-scoring heuristic.
///
/// Matching is case-insensitive on the first word of the port name.
const KNOWN_MANUFACTURERS: [&str; 14] = [
    "Arturia", "Yamaha", "Roland", "Korg", "Casio", "Kawai", "Nord", "Novation", "Akai",
    "M-Audio", "Alesis", "Studiologic", "Kurzweil", "Donner",
];

/// Identity of a USB MIDI endpoint, as much of it as the platform exposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbDeviceInfo {
    /// Port identifier, stable for the life of the connection.
    pub id: String,

    /// Full port name as reported by the OS.
    pub name: String,

    /// Manufacturer, or "Unknown" when it cannot be determined.
    pub manufacturer: String,

    /// Model string, empty when unknown.
    pub model: String,
}

impl UsbDeviceInfo {
    /// Derives device identity from an OS port name.
    ///
    /// The OS gives us only a name string (e.g. "Arturia KeyLab 61 MIDI 1"),
    /// so manufacturer and model are recovered by matching the first word
    /// against the known-manufacturer table. Unrecognized names keep
    /// manufacturer "Unknown" and an empty model.
    pub fn from_port_name(id: impl Into<String>, name: impl Into<String>) -> Self {
        let name = name.into();
        // ALSA-style names append "client:port" noise after a colon.
        let base = name.split(':').next().unwrap_or(name.as_str()).trim();
        let mut words = base.split_whitespace();
        let first = words.next().unwrap_or("");

        let (manufacturer, model) = if KNOWN_MANUFACTURERS
            .iter()
            .any(|m| m.eq_ignore_ascii_case(first))
        {
            (first.to_string(), words.collect::<Vec<_>>().join(" "))
        } else {
            ("Unknown".to_string(), String::new())
        };

        Self {
            id: id.into(),
            name,
            manufacturer,
            model,
        }
    }

    /// True when the manufacturer is in the known table.
    fn has_known_manufacturer(&self) -> bool {
        KNOWN_MANUFACTURERS
            .iter()
            .any(|m| m.eq_ignore_ascii_case(&self.manufacturer))
    }

    /// True for "Session N" names, the signature of virtual loopback ports.
    fn is_session_port(&self) -> bool {
        let base = self.name.split(':').next().unwrap_or(&self.name).trim();
        match base.strip_prefix("Session ") {
            Some(rest) => !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()),
            None => false,
        }
    }
}

/// Scores a device for the best-match heuristic.
///
/// Known manufacturer: +100. Non-empty model: +50. "Session N" name: -200.
/// Unknown manufacturer with an empty model: -150.
pub fn score_device(device: &UsbDeviceInfo) -> i32 {
    let mut score = 0;
    if device.has_known_manufacturer() {
        score += 100;
    }
    if !device.model.is_empty() {
        score += 50;
    }
    if device.is_session_port() {
        score -= 200;
    }
    if !device.has_known_manufacturer() && device.model.is_empty() {
        score -= 150;
    }
    score
}

/// Picks the musically relevant device from a list.
///
/// # Returns
///
/// The highest-scoring device, or None for an empty list
pub fn best_device(devices: &[UsbDeviceInfo]) -> Option<&UsbDeviceInfo> {
    devices.iter().max_by_key(|d| score_device(d))
}

/// The USB MIDI transport adapter.
///
/// Holds at most one open connection (to the best-scoring port). The midir
/// input callback runs on its own thread; it only touches the shared held-key
/// set (behind a mutex) and the event channel, never session state.
pub struct UsbMidiAdapter {
    available: bool,
    devices: Vec<UsbDeviceInfo>,
    connected: Option<(UsbDeviceInfo, MidiInputConnection<()>)>,
    events: Sender<MidiMessage>,
    clock: MonotonicClock,
    held: Arc<Mutex<HashSet<u8>>>,
    last_poll_ms: u64,
    last_port_count: usize,
}

impl UsbMidiAdapter {
    /// Creates the adapter and probes platform support.
    ///
    /// # Arguments
    ///
    /// * `events` - Shared channel all input sources feed into
    /// * `clock` - The session clock used to stamp events
    pub fn new(events: Sender<MidiMessage>, clock: MonotonicClock) -> Self {
        let available = match MidiInput::new("keyfall-probe") {
            Ok(_) => true,
            Err(err) => {
                warn!(error = %err, "USB MIDI is not available on this platform");
                false
            }
        };
        let mut adapter = Self {
            available,
            devices: Vec::new(),
            connected: None,
            events,
            clock,
            held: Arc::new(Mutex::new(HashSet::new())),
            last_poll_ms: 0,
            last_port_count: 0,
        };
        if available {
            adapter.refresh_devices();
        }
        adapter
    }

    /// Re-enumerates MIDI input ports.
    ///
    /// # Returns
    ///
    /// The refreshed device list (also retained internally)
    pub fn refresh_devices(&mut self) -> Vec<UsbDeviceInfo> {
        if !self.available {
            return Vec::new();
        }
        let Ok(midi_in) = MidiInput::new("keyfall-enum") else {
            return Vec::new();
        };
        let ports = midi_in.ports();
        self.last_port_count = ports.len();
        self.devices = ports
            .iter()
            .enumerate()
            .filter_map(|(index, port)| {
                let name = midi_in.port_name(port).ok()?;
                Some(UsbDeviceInfo::from_port_name(format!("usb-{}", index), name))
            })
            .collect();
        self.devices.clone()
    }

    /// The device the scoring heuristic would pick right now.
    pub fn active_device(&self) -> Option<&UsbDeviceInfo> {
        best_device(&self.devices)
    }

    /// Connects to the best-scoring port, replacing any open connection.
    ///
    /// # Errors
    ///
    /// [`TransportError::Unavailable`] without platform support,
    /// [`TransportError::UnknownDevice`] when no ports exist, or a
    /// [`TransportError::ConnectFailed`] from the OS.
    pub fn connect_best(&mut self) -> Result<(), TransportError> {
        if !self.available {
            return Err(TransportError::Unavailable(TransportKind::Usb));
        }
        self.refresh_devices();
        let target = self
            .active_device()
            .cloned()
            .ok_or_else(|| TransportError::UnknownDevice("no USB MIDI ports".into()))?;
        self.connect(&target)
    }

    /// Connects to a specific enumerated device.
    fn connect(&mut self, target: &UsbDeviceInfo) -> Result<(), TransportError> {
        let mut midi_in = MidiInput::new("keyfall").map_err(|err| TransportError::ConnectFailed {
            device: target.name.clone(),
            reason: err.to_string(),
        })?;
        midi_in.ignore(Ignore::None);

        let ports = midi_in.ports();
        let port = ports
            .iter()
            .find(|p| midi_in.port_name(p).is_ok_and(|n| n == target.name))
            .ok_or_else(|| TransportError::UnknownDevice(target.name.clone()))?;

        let events = self.events.clone();
        let clock = self.clock;
        let held = Arc::clone(&self.held);

        let conn = midi_in
            .connect(
                port,
                "keyfall-in",
                move |_stamp_us, msg, _| {
                    let now = clock.now_ms();
                    let Some(message) = decode_midi_message(msg, now) else {
                        return;
                    };
                    if let MidiMessage::Note(note_event) = &message {
                        if let Ok(mut held) = held.lock() {
                            match note_event.kind {
                                NoteKind::On => {
                                    held.insert(note_event.note);
                                }
                                NoteKind::Off => {
                                    held.remove(&note_event.note);
                                }
                            }
                        }
                    }
                    let _ = events.send(message);
                },
                (),
            )
            .map_err(|err| TransportError::ConnectFailed {
                device: target.name.clone(),
                reason: err.to_string(),
            })?;

        info!(device = %target.name, "USB device connected");
        self.connected = Some((target.clone(), conn));
        Ok(())
    }

    /// Closes the open connection, clearing held-key state.
    pub fn disconnect(&mut self) {
        if let Some((device, conn)) = self.connected.take() {
            conn.close();
            info!(device = %device.name, "USB device disconnected");
        }
        if let Ok(mut held) = self.held.lock() {
            held.clear();
        }
    }

    /// Name of the connected port, if any.
    pub fn connected_device_name(&self) -> Option<&str> {
        self.connected.as_ref().map(|(d, _)| d.name.as_str())
    }
}

impl MidiTransport for UsbMidiAdapter {
    fn kind(&self) -> TransportKind {
        TransportKind::Usb
    }

    fn is_available(&self) -> bool {
        self.available
    }

    fn devices(&self) -> Vec<DeviceHandle> {
        self.devices
            .iter()
            .map(|d| {
                let connected = self
                    .connected
                    .as_ref()
                    .is_some_and(|(c, _)| c.name == d.name);
                DeviceHandle {
                    id: d.id.clone(),
                    display_name: d.name.clone(),
                    transport: TransportKind::Usb,
                    connection_state: if connected {
                        ConnectionState::Connected
                    } else {
                        ConnectionState::Disconnected
                    },
                }
            })
            .collect()
    }

    fn held_keys(&self) -> HashSet<u8> {
        self.held.lock().map(|h| h.clone()).unwrap_or_default()
    }

    fn tick(&mut self) {
        if !self.available {
            return;
        }
        // Cheap hotplug detection: re-enumerate on an interval and compare
        // port counts.
        let now = self.clock.now_ms();
        if now.saturating_sub(self.last_poll_ms) < HOTPLUG_POLL_INTERVAL_MS {
            return;
        }
        self.last_poll_ms = now;

        let before = self.last_port_count;
        self.refresh_devices();
        if self.last_port_count != before {
            info!(
                ports = self.last_port_count,
                "USB MIDI port list changed"
            );
            // If our port vanished, drop the stale connection.
            let vanished = self
                .connected
                .as_ref()
                .is_some_and(|(device, _)| !self.devices.iter().any(|d| d.name == device.name));
            if vanished {
                self.disconnect();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(name: &str, manufacturer: &str, model: &str) -> UsbDeviceInfo {
        UsbDeviceInfo {
            id: "usb-0".into(),
            name: name.into(),
            manufacturer: manufacturer.into(),
            model: model.into(),
        }
    }

    #[test]
    fn test_scoring_table() {
        // Known manufacturer + model
        assert_eq!(score_device(&info("Arturia KeyLab", "Arturia", "KeyLab 61")), 150);
        // Virtual loopback port
        assert_eq!(score_device(&info("Session 1", "Unknown", "")), -350);
        // Known manufacturer, no model
        assert_eq!(score_device(&info("Yamaha", "Yamaha", "")), 100);
        // Unknown manufacturer with a model
        assert_eq!(score_device(&info("Mystery Keys", "Unknown", "MK-1")), 50);
    }

    #[test]
    fn test_best_device_filters_session_ports() {
        let devices = vec![
            info("Session 1", "Unknown", ""),
            info("Arturia KeyLab", "Arturia", "KeyLab 61"),
        ];
        let best = best_device(&devices).unwrap();
        assert_eq!(best.manufacturer, "Arturia");
    }

    #[test]
    fn test_best_device_empty() {
        assert!(best_device(&[]).is_none());
    }

    #[test]
    fn test_session_pattern() {
        assert!(info("Session 1", "Unknown", "").is_session_port());
        assert!(info("Session 12", "Unknown", "").is_session_port());
        assert!(!info("Session", "Unknown", "").is_session_port());
        assert!(!info("Session One", "Unknown", "").is_session_port());
        assert!(!info("Jam Session 1", "Unknown", "").is_session_port());
    }

    #[test]
    fn test_from_port_name_known_manufacturer() {
        let device = UsbDeviceInfo::from_port_name("usb-0", "Arturia KeyLab 61 MIDI 1");
        assert_eq!(device.manufacturer, "Arturia");
        assert_eq!(device.model, "KeyLab 61 MIDI 1");
    }

    #[test]
    fn test_from_port_name_unknown() {
        let device = UsbDeviceInfo::from_port_name("usb-1", "Session 1");
        assert_eq!(device.manufacturer, "Unknown");
        assert_eq!(device.model, "");
    }

    #[test]
    fn test_from_port_name_strips_alsa_suffix() {
        let device = UsbDeviceInfo::from_port_name("usb-0", "Roland FP-30:Roland FP-30 MIDI 1 24:0");
        assert_eq!(device.manufacturer, "Roland");
        assert_eq!(device.model, "FP-30");
    }
}
