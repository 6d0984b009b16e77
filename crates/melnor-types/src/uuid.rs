//! Bluetooth UUIDs for Melnor timers.
//!
//! Every characteristic the timer exposes lives on the Bluetooth base UUID
//! (`0000xxxx-0000-1000-8000-00805f9b34fb`). The sync layer never handles
//! these directly; it addresses characteristics through [`Endpoint`] and
//! the transport maps each endpoint to its UUID.

use std::fmt;

use uuid::{Uuid, uuid};

// --- Melnor Characteristic UUIDs ---

/// Battery voltage, 2 bytes.
pub const BATTERY: Uuid = uuid!("0000ec08-0000-1000-8000-00805f9b34fb");

/// User-assigned device name.
pub const DEVICE_USER_NAME: Uuid = uuid!("0000ec01-0000-1000-8000-00805f9b34fb");

/// Clock sync, written with the current epoch-shifted timestamp.
pub const UPDATED_AT: Uuid = uuid!("0000ec09-0000-1000-8000-00805f9b34fb");

/// Manual watering settings for all four valves, 20 bytes.
pub const VALVE_MANUAL_SETTINGS: Uuid = uuid!("0000ec0b-0000-1000-8000-00805f9b34fb");

/// Schedule enabled flags for all four valves, 4 bytes.
pub const VALVE_ON_OFF: Uuid = uuid!("0000ec0a-0000-1000-8000-00805f9b34fb");

/// Manual watering end timestamps for all four valves, 20 bytes.
pub const VALVE_MANUAL_STATES: Uuid = uuid!("0000ec06-0000-1000-8000-00805f9b34fb");

/// Frequency schedule for valve 0, 8 bytes.
pub const VALVE_0_MODE: Uuid = uuid!("0000ec0f-0000-1000-8000-00805f9b34fb");

/// Frequency schedule for valve 1, 8 bytes.
pub const VALVE_1_MODE: Uuid = uuid!("0000ec10-0000-1000-8000-00805f9b34fb");

/// Frequency schedule for valve 2, 8 bytes.
pub const VALVE_2_MODE: Uuid = uuid!("0000ec11-0000-1000-8000-00805f9b34fb");

/// Frequency schedule for valve 3, 8 bytes.
pub const VALVE_3_MODE: Uuid = uuid!("0000ec12-0000-1000-8000-00805f9b34fb");

// --- Device Information Characteristic UUIDs ---

/// Model number string characteristic.
pub const MODEL_NUMBER: Uuid = uuid!("00002a24-0000-1000-8000-00805f9b34fb");

/// Manufacturer name string characteristic. Melnor timers put the model
/// code and valve count here.
pub const MANUFACTURER_NAME: Uuid = uuid!("00002a29-0000-1000-8000-00805f9b34fb");

/// Symbolic key for every characteristic the sync layer talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Endpoint {
    /// Battery voltage.
    Battery,
    /// Manufacturer string carrying the model code and valve count.
    Model,
    /// Manual watering settings (R/W).
    ManualSettings,
    /// Manual watering end timestamps (R).
    ManualRemaining,
    /// Schedule enabled flags (R/W).
    ScheduleEnabled,
    /// Per-valve frequency schedule (R/W), slot 0..=3.
    Frequency(u8),
    /// Clock sync (W).
    ClockSync,
}

impl Endpoint {
    /// The four frequency endpoints in slot order.
    pub const FREQUENCIES: [Endpoint; 4] = [
        Endpoint::Frequency(0),
        Endpoint::Frequency(1),
        Endpoint::Frequency(2),
        Endpoint::Frequency(3),
    ];

    /// The characteristic UUID backing this endpoint.
    ///
    /// Returns `None` for a frequency slot outside `0..=3`.
    pub fn uuid(&self) -> Option<Uuid> {
        match self {
            Endpoint::Battery => Some(BATTERY),
            Endpoint::Model => Some(MANUFACTURER_NAME),
            Endpoint::ManualSettings => Some(VALVE_MANUAL_SETTINGS),
            Endpoint::ManualRemaining => Some(VALVE_MANUAL_STATES),
            Endpoint::ScheduleEnabled => Some(VALVE_ON_OFF),
            Endpoint::Frequency(0) => Some(VALVE_0_MODE),
            Endpoint::Frequency(1) => Some(VALVE_1_MODE),
            Endpoint::Frequency(2) => Some(VALVE_2_MODE),
            Endpoint::Frequency(3) => Some(VALVE_3_MODE),
            Endpoint::Frequency(_) => None,
            Endpoint::ClockSync => Some(UPDATED_AT),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Battery => write!(f, "battery"),
            Endpoint::Model => write!(f, "model"),
            Endpoint::ManualSettings => write!(f, "manual settings"),
            Endpoint::ManualRemaining => write!(f, "manual remaining time"),
            Endpoint::ScheduleEnabled => write!(f, "schedule enabled"),
            Endpoint::Frequency(slot) => write!(f, "frequency (valve {})", slot),
            Endpoint::ClockSync => write!(f, "clock sync"),
        }
    }
}
