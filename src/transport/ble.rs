//! Bluetooth-LE MIDI adapter.
//!
//! Parses MIDI-over-BLE characteristic notifications into canonical events
//! and manages the scan/connect lifecycle. The radio itself is a platform
//! collaborator behind [`BleLink`]; when the host has none to offer, the
//! adapter reports `is_available() == false` and every operation is a safe
//! no-op with user-facing guidance logged once.
//!
//! Packet format (per the BLE-MIDI packing spec): an optional header byte
//! (top bit set), then a sequence of timestamp bytes (top bit set, not a
//! status) interleaved with complete 3-byte MIDI channel messages (status
//! byte with top bit set, two data bytes). Packets may coalesce several
//! messages; bytes that do not parse to a complete message are skipped
//! byte-by-byte rather than aborting the notification. Running status is
//! not supported: a message without its own status byte is dropped.

use std::collections::HashSet;
use std::sync::mpsc::Sender;

use tracing::{info, warn};

use crate::clock::MonotonicClock;
use crate::midi::{decode_midi_message, MidiMessage, NoteKind};
use crate::transport::{
    ConnectionState, DeviceHandle, MidiTransport, TransportError, TransportKind,
};

/// Standard MIDI-over-BLE GATT service UUID. [`BleLink`] implementations
/// scan for peripherals advertising this service.
#[allow(dead_code)]
pub const BLE_MIDI_SERVICE_UUID: &str = "03b80e5a-ede8-4b33-a751-6ce34ec4c700";

/// Standard MIDI-over-BLE data characteristic UUID. [`BleLink`]
/// implementations subscribe to notifications on this characteristic.
#[allow(dead_code)]
pub const BLE_MIDI_CHARACTERISTIC_UUID: &str = "7772e5db-3868-4112-a1a9-f2669d106bf3";

/// Scanning stops on its own after this long.
pub const SCAN_TIMEOUT_MS: u64 = 10_000;

/// Platform GATT collaborator.
///
/// Implementations wrap whatever native BLE central the host provides:
/// scanning for peripherals advertising [`BLE_MIDI_SERVICE_UUID`], connecting,
/// subscribing to [`BLE_MIDI_CHARACTERISTIC_UUID`], and buffering notification
/// payloads until the adapter drains them.
pub trait BleLink: Send {
    /// Starts scanning for MIDI peripherals.
    ///
    /// # Errors
    ///
    /// [`TransportError::PermissionDenied`] when the OS refuses the Bluetooth
    /// or location permission; [`TransportError::ScanFailed`] for radio
    /// errors.
    fn start_scan(&mut self) -> Result<(), TransportError>;

    /// Stops an in-progress scan. Safe to call when not scanning.
    fn stop_scan(&mut self);

    /// Peripherals discovered so far, as `(id, display name)` pairs.
    fn discovered(&self) -> Vec<(String, String)>;

    /// Connects to a discovered peripheral and subscribes to the MIDI
    /// characteristic.
    fn connect(&mut self, id: &str) -> Result<(), TransportError>;

    /// Tears down the current connection. Safe to call when not connected.
    fn disconnect(&mut self);

    /// True while the subscribed link is up.
    fn is_connected(&self) -> bool;

    /// Drains characteristic notifications received since the last call.
    fn drain_packets(&mut self) -> Vec<Vec<u8>>;
}

/// Parses one BLE-MIDI notification payload into canonical events.
///
/// Tolerates multiple coalesced messages per packet and interleaved
/// timestamp bytes. A Note-On with velocity 0 comes out as a Note-Off.
/// Unparseable bytes are skipped one at a time.
///
/// # Arguments
///
/// * `packet` - Raw characteristic notification bytes
/// * `timestamp_ms` - Session-clock stamp applied to every decoded event
///
/// # Returns
///
/// Decoded messages in packet order
pub fn parse_ble_packet(packet: &[u8], timestamp_ms: u64) -> Vec<MidiMessage> {
    let mut events = Vec::new();
    if packet.is_empty() {
        return events;
    }

    // Optional header byte (top bit set) carries the timestamp-high bits.
    let mut i = usize::from(packet[0] & 0x80 != 0);

    while i < packet.len() {
        let b = packet[i];

        // A complete channel message: 3-byte status family followed by two
        // data bytes. A timestamp byte fails this test (the byte after it
        // is a status byte, top bit set) and falls through to the skip.
        if is_three_byte_status(b)
            && i + 2 < packet.len()
            && packet[i + 1] & 0x80 == 0
            && packet[i + 2] & 0x80 == 0
        {
            if let Some(event) = decode_midi_message(&packet[i..i + 3], timestamp_ms) {
                events.push(event);
            }
            i += 3;
        } else {
            // Timestamp byte, stray data byte, or truncated message.
            i += 1;
        }
    }

    events
}

/// Status families that carry exactly two data bytes: note-off, note-on,
/// poly aftertouch, control change, pitch bend.
fn is_three_byte_status(b: u8) -> bool {
    matches!(b & 0xF0, 0x80 | 0x90 | 0xA0 | 0xB0 | 0xE0)
}

/// Lifecycle of the single BLE connection.
#[derive(Debug, Clone, PartialEq, Eq)]
enum BleState {
    Idle,
    Scanning { started_ms: u64 },
    Connected { id: String, name: String },
    Disconnected { id: String, name: String },
}

/// The BLE-MIDI transport adapter.
///
/// Owns the scan/connect state machine, the held-key set, and the parsing
/// of notification payloads. One connection at a time.
pub struct BleMidiAdapter {
    link: Option<Box<dyn BleLink>>,
    state: BleState,
    clock: MonotonicClock,
    events: Sender<MidiMessage>,
    held: HashSet<u8>,
    unavailable_logged: bool,
}

impl BleMidiAdapter {
    /// Creates the adapter.
    ///
    /// # Arguments
    ///
    /// * `link` - The platform GATT collaborator, or None when the host has
    ///   no BLE support (the adapter then degrades to no-ops)
    /// * `events` - Shared channel all input sources feed into
    /// * `clock` - The session clock used to stamp events
    pub fn new(
        link: Option<Box<dyn BleLink>>,
        events: Sender<MidiMessage>,
        clock: MonotonicClock,
    ) -> Self {
        Self {
            link,
            state: BleState::Idle,
            clock,
            events,
            held: HashSet::new(),
            unavailable_logged: false,
        }
    }

    /// Logs the missing-capability guidance once, then stays quiet.
    fn note_unavailable(&mut self) {
        if !self.unavailable_logged {
            warn!("BLE MIDI is not available on this platform; BLE operations are disabled");
            self.unavailable_logged = true;
        }
    }

    /// Starts scanning for BLE-MIDI peripherals.
    ///
    /// Scanning stops on its own after [`SCAN_TIMEOUT_MS`].
    ///
    /// # Errors
    ///
    /// Propagates permission refusals and radio failures from the link;
    /// both leave the adapter idle. Unavailable transport is not an error
    /// here (the operation is a logged no-op).
    pub fn start_scanning(&mut self) -> Result<(), TransportError> {
        let now = self.clock.now_ms();
        let Some(link) = self.link.as_mut() else {
            self.note_unavailable();
            return Ok(());
        };
        if matches!(self.state, BleState::Connected { .. }) {
            return Ok(());
        }
        match link.start_scan() {
            Ok(()) => {
                info!("BLE scan started");
                self.state = BleState::Scanning { started_ms: now };
                Ok(())
            }
            Err(err) => {
                // Scan errors abort scanning and reset state; no retry loop.
                self.state = BleState::Idle;
                Err(err)
            }
        }
    }

    /// Stops an in-progress scan.
    pub fn stop_scanning(&mut self) {
        if let Some(link) = self.link.as_mut() {
            if matches!(self.state, BleState::Scanning { .. }) {
                link.stop_scan();
                self.state = BleState::Idle;
                info!("BLE scan stopped");
            }
        }
    }

    /// Connects to a peripheral discovered during the scan.
    ///
    /// # Arguments
    ///
    /// * `id` - Peripheral id from the device list
    ///
    /// # Errors
    ///
    /// [`TransportError::UnknownDevice`] if the id was never discovered,
    /// or the link's connection failure.
    pub fn connect_to_device(&mut self, id: &str) -> Result<(), TransportError> {
        let Some(link) = self.link.as_mut() else {
            self.note_unavailable();
            return Ok(());
        };
        let name = link
            .discovered()
            .into_iter()
            .find(|(dev_id, _)| dev_id == id)
            .map(|(_, name)| name)
            .ok_or_else(|| TransportError::UnknownDevice(id.to_string()))?;

        link.stop_scan();
        link.connect(id)?;
        info!(device = %name, "BLE device connected");
        self.state = BleState::Connected {
            id: id.to_string(),
            name,
        };
        Ok(())
    }

    /// Disconnects from the current peripheral, clearing held-key state.
    pub fn disconnect(&mut self) {
        if let Some(link) = self.link.as_mut() {
            link.disconnect();
        }
        if let BleState::Connected { id, name } = std::mem::replace(&mut self.state, BleState::Idle)
        {
            info!(device = %name, "BLE device disconnected");
            self.state = BleState::Disconnected { id, name };
        }
        self.held.clear();
    }

    /// True while scanning is in progress.
    pub fn is_scanning(&self) -> bool {
        matches!(self.state, BleState::Scanning { .. })
    }

    /// Name of the connected peripheral, if any.
    pub fn connected_device_name(&self) -> Option<&str> {
        match &self.state {
            BleState::Connected { name, .. } => Some(name),
            _ => None,
        }
    }

    /// Applies one parsed message to the held-key set and forwards it.
    fn dispatch(&mut self, message: MidiMessage) {
        if let MidiMessage::Note(note_event) = &message {
            match note_event.kind {
                NoteKind::On => {
                    self.held.insert(note_event.note);
                }
                NoteKind::Off => {
                    self.held.remove(&note_event.note);
                }
            }
        }
        let _ = self.events.send(message);
    }
}

impl MidiTransport for BleMidiAdapter {
    fn kind(&self) -> TransportKind {
        TransportKind::Ble
    }

    fn is_available(&self) -> bool {
        self.link.is_some()
    }

    fn devices(&self) -> Vec<DeviceHandle> {
        let Some(link) = self.link.as_ref() else {
            return Vec::new();
        };
        match &self.state {
            BleState::Scanning { .. } => link
                .discovered()
                .into_iter()
                .map(|(id, display_name)| DeviceHandle {
                    id,
                    display_name,
                    transport: TransportKind::Ble,
                    connection_state: ConnectionState::Scanning,
                })
                .collect(),
            BleState::Connected { id, name } => vec![DeviceHandle {
                id: id.clone(),
                display_name: name.clone(),
                transport: TransportKind::Ble,
                connection_state: ConnectionState::Connected,
            }],
            BleState::Disconnected { id, name } => vec![DeviceHandle {
                id: id.clone(),
                display_name: name.clone(),
                transport: TransportKind::Ble,
                connection_state: ConnectionState::Disconnected,
            }],
            BleState::Idle => link
                .discovered()
                .into_iter()
                .map(|(id, display_name)| DeviceHandle {
                    id,
                    display_name,
                    transport: TransportKind::Ble,
                    connection_state: ConnectionState::Disconnected,
                })
                .collect(),
        }
    }

    fn held_keys(&self) -> HashSet<u8> {
        self.held.clone()
    }

    fn tick(&mut self) {
        let now = self.clock.now_ms();

        // Scan auto-timeout.
        let scan_started = match &self.state {
            BleState::Scanning { started_ms } => Some(*started_ms),
            _ => None,
        };
        if let Some(started_ms) = scan_started {
            if now.saturating_sub(started_ms) >= SCAN_TIMEOUT_MS {
                info!("BLE scan timed out");
                self.stop_scanning();
            }
        }

        if !matches!(self.state, BleState::Connected { .. }) {
            return;
        }

        let Some(link) = self.link.as_mut() else {
            return;
        };

        // Link dropped out from under us: clear held keys immediately so no
        // note stays stuck on screen.
        if !link.is_connected() {
            if let BleState::Connected { id, name } =
                std::mem::replace(&mut self.state, BleState::Idle)
            {
                warn!(device = %name, "BLE device connection lost");
                self.state = BleState::Disconnected { id, name };
            }
            self.held.clear();
            return;
        }

        let packets = link.drain_packets();
        for packet in packets {
            for event in parse_ble_packet(&packet, now) {
                self.dispatch(event);
            }
        }
    }
}
