//! MIDI input transports.
//!
//! Two physically different sources (USB via the OS MIDI stack, BLE-MIDI via
//! a GATT link) are normalized behind one interface: each adapter emits
//! canonical [`MidiMessage`](crate::midi::MidiMessage)s into a shared
//! channel, tracks its currently held keys, and manages device lifecycle.
//! Consumers depend only on [`MidiTransport`] and the canonical message
//! types, never on transport-specific ones.

pub mod ble;
pub mod usb;

use std::collections::HashSet;

pub use ble::{BleLink, BleMidiAdapter, BLE_MIDI_CHARACTERISTIC_UUID, BLE_MIDI_SERVICE_UUID};
pub use usb::{best_device, score_device, UsbDeviceInfo, UsbMidiAdapter};

/// Which physical transport a device arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Ble,
    Usb,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Ble => write!(f, "BLE"),
            TransportKind::Usb => write!(f, "USB"),
        }
    }
}

/// Connection lifecycle of a discovered device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Scanning,
    Connected,
    Disconnected,
}

/// A device as surfaced to the UI: identity plus lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceHandle {
    /// Transport-scoped identifier (BLE peripheral id or USB port id).
    pub id: String,

    /// Human-readable name for the device panel.
    pub display_name: String,

    /// Which transport this device belongs to.
    pub transport: TransportKind,

    /// Current lifecycle state.
    pub connection_state: ConnectionState,
}

/// Errors surfaced by transport adapters.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The platform has no support for this transport; the adapter stays
    /// constructed but every operation is a no-op.
    #[error("{0} transport is not available on this platform")]
    Unavailable(TransportKind),

    /// The user or OS refused the permission the transport needs.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Device scanning failed and was aborted.
    #[error("scan failed: {0}")]
    ScanFailed(String),

    /// Connecting to a specific device failed.
    #[error("failed to connect to {device}: {reason}")]
    ConnectFailed { device: String, reason: String },

    /// The requested device is not in the current device list.
    #[error("unknown device id: {0}")]
    UnknownDevice(String),
}

/// Common surface of the two input adapters.
///
/// Event delivery is push-based (adapters send into the channel given at
/// construction); this trait covers the pull side: lifecycle, the device
/// list, and the live held-key set used by the keyboard and the renderer.
pub trait MidiTransport {
    /// Which transport this adapter drives.
    fn kind(&self) -> TransportKind;

    /// False when the platform lacks support; all operations are then no-ops.
    fn is_available(&self) -> bool;

    /// Devices currently known to the adapter.
    fn devices(&self) -> Vec<DeviceHandle>;

    /// MIDI numbers of keys currently held down on this transport.
    fn held_keys(&self) -> HashSet<u8>;

    /// Drives time-based state (scan timeouts, pending disconnects).
    /// Called once per frame from the app loop.
    fn tick(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_kind_display() {
        assert_eq!(TransportKind::Ble.to_string(), "BLE");
        assert_eq!(TransportKind::Usb.to_string(), "USB");
    }

    #[test]
    fn test_error_messages() {
        let err = TransportError::Unavailable(TransportKind::Ble);
        assert!(err.to_string().contains("BLE"));

        let err = TransportError::ConnectFailed {
            device: "KeyLab".into(),
            reason: "timeout".into(),
        };
        assert!(err.to_string().contains("KeyLab"));
        assert!(err.to_string().contains("timeout"));
    }
}
