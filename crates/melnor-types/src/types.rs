//! Wire records exchanged with Melnor timers.
//!
//! All multi-byte integers are big-endian. Records that describe every valve
//! always carry four slots, even on one- and two-valve hardware, and are
//! decoded per fixed-offset slot so a corrupt slot cannot bleed into its
//! neighbours.

use std::fmt;

use bytes::{Buf, BufMut};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{ParseError, ParseResult};

/// Number of valve slots carried by every multi-valve record.
pub const VALVE_SLOTS: usize = 4;

/// Bytes per valve in the manual settings record.
pub const MANUAL_SETTING_SLOT_BYTES: usize = 5;

/// Size of the full manual settings record.
pub const MANUAL_SETTINGS_BYTES: usize = MANUAL_SETTING_SLOT_BYTES * VALVE_SLOTS;

/// Bytes per valve in the manual remaining-time record.
pub const MANUAL_REMAINING_SLOT_BYTES: usize = 5;

/// Size of the full manual remaining-time record.
pub const MANUAL_REMAINING_BYTES: usize = MANUAL_REMAINING_SLOT_BYTES * VALVE_SLOTS;

/// Size of the schedule enabled record (one flag per valve).
pub const SCHEDULE_ENABLED_BYTES: usize = VALVE_SLOTS;

/// Size of a single valve's frequency record.
pub const FREQUENCY_BYTES: usize = 8;

/// Size of the battery record.
pub const BATTERY_BYTES: usize = 2;

/// Minimum length of the manufacturer string carrying the model.
pub const MIN_MODEL_BYTES: usize = 7;

/// Return the `len`-byte slice for `slot`, or an error naming the record.
pub fn slot_slice<'a>(
    data: &'a [u8],
    slot: usize,
    len: usize,
    record: &'static str,
) -> ParseResult<&'a [u8]> {
    let start = slot * len;
    data.get(start..start + len)
        .ok_or_else(|| ParseError::insufficient(record, start + len, data.len()))
}

// --- Battery ---

/// Parse the 2-byte battery record into a percentage.
///
/// The timer reports a voltage-like fixed point value; `EE EE` means the
/// reading is unavailable and maps to 0.
///
/// # Errors
///
/// Returns [`ParseError::InsufficientBytes`] for buffers shorter than 2 bytes.
pub fn parse_battery(data: &[u8]) -> ParseResult<u8> {
    if data.len() < BATTERY_BYTES {
        return Err(ParseError::insufficient("battery", BATTERY_BYTES, data.len()));
    }

    let (high, low) = (data[0], data[1]);
    if high == 0xEE && low == 0xEE {
        return Ok(0);
    }

    let volts = f64::from(high) + f64::from(low) / 256.0;
    let percent = (volts - 2.35) * 181.818_181_818_181_87;

    Ok(percent.clamp(0.0, 100.0) as u8)
}

// --- Model and brand ---

/// Timer brands sold on the same hardware.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Brand {
    /// Melnor branded timers.
    Melnor,
    /// Eden branded timers.
    Eden,
    /// A manufacturer string we don't recognise, kept verbatim.
    Other(String),
}

impl Brand {
    /// Interpret a manufacturer string.
    ///
    /// Melnor firmware reports an `ML_` prefixed token; anything else is
    /// returned as-is.
    pub fn from_manufacturer(data: &[u8]) -> Self {
        let text = String::from_utf8_lossy(data);
        let text = text.trim_end_matches('\0');
        if text.starts_with("ML_") {
            Brand::Melnor
        } else {
            Brand::Other(text.to_string())
        }
    }
}

impl fmt::Display for Brand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Brand::Melnor => write!(f, "Melnor"),
            Brand::Eden => write!(f, "Eden"),
            Brand::Other(name) => write!(f, "{}", name),
        }
    }
}

/// A known timer model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    /// Five character model number.
    pub model: &'static str,
    /// Brand the model is sold under.
    pub brand: Brand,
    /// Number of physical valves.
    pub valve_count: u8,
    /// Whether the model has a rain sensor input.
    pub has_sensor: bool,
}

const fn entry(model: &'static str, brand: Brand, valve_count: u8, has_sensor: bool) -> CatalogEntry {
    CatalogEntry {
        model,
        brand,
        valve_count,
        has_sensor,
    }
}

/// Models shipped by Melnor and Eden.
pub static MODEL_CATALOG: [CatalogEntry; 12] = [
    entry("25443", Brand::Eden, 4, true),
    entry("25439", Brand::Eden, 4, false),
    entry("25442", Brand::Eden, 2, true),
    entry("25438", Brand::Eden, 2, false),
    entry("25441", Brand::Eden, 1, true),
    entry("25437", Brand::Eden, 1, false),
    entry("93281", Brand::Melnor, 4, true),
    entry("93280", Brand::Melnor, 4, false),
    entry("93101", Brand::Melnor, 2, true),
    entry("93100", Brand::Melnor, 2, false),
    entry("93016", Brand::Melnor, 1, true),
    entry("93015", Brand::Melnor, 1, false),
];

/// Model code and valve count read from the manufacturer characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ModelInfo {
    /// Five character model code.
    pub code: String,
    /// Number of valves the hardware exposes (1, 2 or 4).
    pub valve_count: u8,
}

impl ModelInfo {
    /// Parse the manufacturer string: characters `0..5` are the model code
    /// and the character at index 6 is the valve count.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::InsufficientBytes`] for strings shorter than 7
    /// bytes and [`ParseError::InvalidModel`] when the valve count is not
    /// one of 1, 2 or 4.
    pub fn from_bytes(data: &[u8]) -> ParseResult<Self> {
        if data.len() < MIN_MODEL_BYTES {
            return Err(ParseError::insufficient("model", MIN_MODEL_BYTES, data.len()));
        }
        if !data[..MIN_MODEL_BYTES].is_ascii() {
            return Err(ParseError::InvalidModel(
                String::from_utf8_lossy(data).into_owned(),
            ));
        }

        let code = String::from_utf8_lossy(&data[..5]).into_owned();
        let valve_count = match data[6] {
            digit @ (b'1' | b'2' | b'4') => digit - b'0',
            _ => {
                return Err(ParseError::InvalidModel(
                    String::from_utf8_lossy(data).into_owned(),
                ));
            }
        };

        Ok(Self { code, valve_count })
    }

    /// Look up this model in [`MODEL_CATALOG`].
    pub fn catalog_entry(&self) -> Option<&'static CatalogEntry> {
        MODEL_CATALOG.iter().find(|entry| entry.model == self.code)
    }

    /// Brand for this model, if it is a catalogued one.
    pub fn brand(&self) -> Option<Brand> {
        self.catalog_entry().map(|entry| entry.brand.clone())
    }
}

// --- Manual settings ---

/// One valve's slot in the manual settings record.
///
/// Layout: `[is_watering: u8][minutes: u16][minutes: u16]`. The device
/// carries the minutes twice; only the first copy is read back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ManualSetting {
    /// Whether manual watering is active.
    pub is_watering: bool,
    /// Manual watering duration in minutes.
    pub minutes: u16,
}

impl ManualSetting {
    /// Encode this slot.
    pub fn to_bytes(&self) -> [u8; MANUAL_SETTING_SLOT_BYTES] {
        let mut out = [0u8; MANUAL_SETTING_SLOT_BYTES];
        let mut buf = &mut out[..];
        buf.put_u8(u8::from(self.is_watering));
        buf.put_u16(self.minutes);
        buf.put_u16(self.minutes);
        out
    }

    /// Decode one 5-byte slot.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::InsufficientBytes`] for short buffers.
    pub fn from_bytes(data: &[u8]) -> ParseResult<Self> {
        if data.len() < MANUAL_SETTING_SLOT_BYTES {
            return Err(ParseError::insufficient(
                "manual setting",
                MANUAL_SETTING_SLOT_BYTES,
                data.len(),
            ));
        }
        let mut buf = data;
        let is_watering = buf.get_u8() != 0;
        let minutes = buf.get_u16();
        Ok(Self {
            is_watering,
            minutes,
        })
    }

    /// Decode the slot for `slot` out of the full 20-byte record.
    pub fn from_slot(data: &[u8], slot: usize) -> ParseResult<Self> {
        Self::from_bytes(slot_slice(
            data,
            slot,
            MANUAL_SETTING_SLOT_BYTES,
            "manual settings",
        )?)
    }
}

/// Concatenate four manual setting slots in slot order.
pub fn encode_manual_settings(settings: &[ManualSetting; VALVE_SLOTS]) -> [u8; MANUAL_SETTINGS_BYTES] {
    let mut out = [0u8; MANUAL_SETTINGS_BYTES];
    for (chunk, setting) in out
        .chunks_exact_mut(MANUAL_SETTING_SLOT_BYTES)
        .zip(settings.iter())
    {
        chunk.copy_from_slice(&setting.to_bytes());
    }
    out
}

// --- Manual remaining time ---

/// Raw epoch-shifted end timestamp for `slot`.
///
/// Layout per slot: `[unknown: u8][end: u32]`. A zero timestamp means no
/// manual watering is running.
pub fn manual_end_from_slot(data: &[u8], slot: usize) -> ParseResult<u32> {
    let mut buf = slot_slice(
        data,
        slot,
        MANUAL_REMAINING_SLOT_BYTES,
        "manual remaining time",
    )?;
    buf.advance(1);
    Ok(buf.get_u32())
}

// --- Schedule enabled ---

/// Schedule enabled flag for `slot`.
pub fn schedule_enabled_from_slot(data: &[u8], slot: usize) -> ParseResult<bool> {
    let byte = slot_slice(data, slot, 1, "schedule enabled")?;
    Ok(byte[0] != 0)
}

/// Pack four schedule enabled flags in slot order.
pub fn encode_schedule_enabled(flags: &[bool; VALVE_SLOTS]) -> [u8; SCHEDULE_ENABLED_BYTES] {
    (*flags).map(u8::from)
}

// --- Frequency ---

/// Raw frequency schedule for one valve.
///
/// Layout: `[reserved: u8 = 0][start: u32][duration_minutes: u16][interval_hours: u8]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FrequencyRecord {
    /// Start time in device epoch units.
    pub raw_start_time: u32,
    /// Watering duration in minutes.
    pub duration_minutes: u16,
    /// Repeat interval in hours.
    pub interval_hours: u8,
}

impl FrequencyRecord {
    /// Encode to the 8-byte wire format.
    pub fn to_bytes(&self) -> [u8; FREQUENCY_BYTES] {
        let mut out = [0u8; FREQUENCY_BYTES];
        let mut buf = &mut out[..];
        buf.put_u8(0);
        buf.put_u32(self.raw_start_time);
        buf.put_u16(self.duration_minutes);
        buf.put_u8(self.interval_hours);
        out
    }

    /// Decode the 8-byte wire format.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::InsufficientBytes`] for buffers shorter than 8 bytes.
    pub fn from_bytes(data: &[u8]) -> ParseResult<Self> {
        if data.len() < FREQUENCY_BYTES {
            return Err(ParseError::insufficient("frequency", FREQUENCY_BYTES, data.len()));
        }
        let mut buf = data;
        buf.advance(1);
        Ok(Self {
            raw_start_time: buf.get_u32(),
            duration_minutes: buf.get_u16(),
            interval_hours: buf.get_u8(),
        })
    }
}
