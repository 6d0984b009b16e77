//! Per-valve state and its wire records.

use std::fmt;

use chrono::DateTime;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use melnor_types::{
    ManualSetting, ParseResult, VALVE_SLOTS, manual_end_from_slot, schedule_enabled_from_slot,
};

use crate::error::{Error, Result};
use crate::frequency::Frequency;
use crate::timestamp::TimestampCodec;

/// Manual watering duration a new valve starts with.
pub const DEFAULT_MANUAL_MINUTES: u16 = 20;

/// A valve slot index, always within `0..4`.
///
/// Whether the zone is actually present depends on the device's valve
/// count; see [`DeviceState::valve`](crate::state::DeviceState::valve).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Zone(u8);

impl Zone {
    /// All four slots in wire order.
    pub const ALL: [Zone; VALVE_SLOTS] = [Zone(0), Zone(1), Zone(2), Zone(3)];

    /// Create a zone from a zero-based index.
    pub const fn new(index: u8) -> Option<Self> {
        if (index as usize) < VALVE_SLOTS {
            Some(Self(index))
        } else {
            None
        }
    }

    /// Zero-based index.
    pub const fn get(self) -> u8 {
        self.0
    }

    /// Zero-based index as a slot offset.
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl TryFrom<u8> for Zone {
    type Error = Error;

    fn try_from(index: u8) -> Result<Self> {
        Zone::new(index).ok_or(Error::InvalidZone {
            zone: index,
            valve_count: VALVE_SLOTS as u8,
        })
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "zone {}", self.0 + 1)
    }
}

/// State of one valve.
#[derive(Debug, Clone, PartialEq)]
pub struct Valve {
    id: Zone,
    codec: TimestampCodec,
    is_watering: bool,
    manual_minutes: u16,
    watering_end_time: i64,
    schedule_enabled: bool,
    frequency: Frequency,
}

impl Valve {
    /// A valve with default manual minutes and a fresh schedule.
    pub fn new(id: Zone, codec: TimestampCodec) -> Self {
        Self {
            id,
            codec,
            is_watering: false,
            manual_minutes: DEFAULT_MANUAL_MINUTES,
            watering_end_time: 0,
            schedule_enabled: false,
            frequency: Frequency::new(codec),
        }
    }

    /// Zone this valve sits in.
    pub fn id(&self) -> Zone {
        self.id
    }

    /// Whether manual watering is on.
    pub fn is_watering(&self) -> bool {
        self.is_watering
    }

    /// Turn manual watering on or off.
    pub fn set_is_watering(&mut self, value: bool) {
        self.is_watering = value;
    }

    /// Manual watering duration in minutes.
    pub fn manual_watering_minutes(&self) -> u16 {
        self.manual_minutes
    }

    /// Set the manual watering duration.
    pub fn set_manual_watering_minutes(&mut self, minutes: u16) {
        self.manual_minutes = minutes;
    }

    /// Unix seconds when manual watering ends, 0 when inactive.
    ///
    /// Read-only: the device computes it from the manual minutes.
    pub fn watering_end_time(&self) -> i64 {
        self.watering_end_time
    }

    /// Whether the periodic schedule is enabled.
    pub fn schedule_enabled(&self) -> bool {
        self.schedule_enabled
    }

    /// Enable or disable the periodic schedule.
    pub fn set_schedule_enabled(&mut self, value: bool) {
        self.schedule_enabled = value;
    }

    /// The valve's periodic schedule.
    pub fn frequency(&self) -> &Frequency {
        &self.frequency
    }

    /// Mutable access to the periodic schedule.
    pub fn frequency_mut(&mut self) -> &mut Frequency {
        &mut self.frequency
    }

    /// Next scheduled run, or `None` when the schedule is disabled.
    pub fn next_cycle(&self) -> Option<DateTime<Tz>> {
        if self.schedule_enabled {
            self.frequency.next_run_time()
        } else {
            None
        }
    }

    /// This valve's slot of the manual settings record.
    pub fn manual_setting(&self) -> ManualSetting {
        ManualSetting {
            is_watering: self.is_watering,
            minutes: self.manual_minutes,
        }
    }

    /// Apply this valve's slot of the 20-byte manual settings record.
    pub fn apply_manual_settings(&mut self, data: &[u8]) -> ParseResult<()> {
        let setting = ManualSetting::from_slot(data, self.id.index())?;
        self.is_watering = setting.is_watering;
        self.manual_minutes = setting.minutes;
        Ok(())
    }

    /// Apply this valve's slot of the 20-byte manual remaining-time record.
    pub fn apply_manual_remaining(&mut self, data: &[u8]) -> ParseResult<()> {
        let raw = manual_end_from_slot(data, self.id.index())?;
        self.watering_end_time = self.codec.decode_unix_seconds(raw);
        Ok(())
    }

    /// Apply this valve's flag from the 4-byte schedule enabled record.
    pub fn apply_schedule_enabled(&mut self, data: &[u8]) -> ParseResult<()> {
        self.schedule_enabled = schedule_enabled_from_slot(data, self.id.index())?;
        Ok(())
    }

    /// Apply this valve's 8-byte frequency record.
    pub fn apply_frequency(&mut self, data: &[u8]) -> ParseResult<()> {
        self.frequency.update_from_bytes(data)
    }
}

impl fmt::Display for Valve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Valve(id={}|is_watering={}|manual_minutes={}|end_time={})",
            self.id.get(),
            self.is_watering,
            self.manual_minutes,
            self.watering_end_time
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use melnor_types::FrequencyRecord;

    fn valve(index: u8) -> Valve {
        Valve::new(Zone::new(index).unwrap(), TimestampCodec::new(Tz::UTC))
    }

    #[test]
    fn test_zone_bounds() {
        assert_eq!(Zone::new(3).unwrap().index(), 3);
        assert!(Zone::new(4).is_none());
        assert!(matches!(
            Zone::try_from(7),
            Err(Error::InvalidZone { zone: 7, .. })
        ));
        assert_eq!(Zone::ALL[1].to_string(), "zone 2");
    }

    #[test]
    fn test_defaults() {
        let valve = valve(0);
        assert!(!valve.is_watering());
        assert_eq!(valve.manual_watering_minutes(), 20);
        assert_eq!(valve.watering_end_time(), 0);
        assert!(!valve.schedule_enabled());
        assert!(valve.next_cycle().is_none());
    }

    #[test]
    fn test_manual_settings_slot() {
        let mut data = [0u8; 20];
        data[5..10].copy_from_slice(&[0x01, 0x00, 0x05, 0x00, 0x05]);

        let mut second = valve(1);
        second.apply_manual_settings(&data).unwrap();
        assert!(second.is_watering());
        assert_eq!(second.manual_watering_minutes(), 5);
        assert_eq!(second.manual_setting().to_bytes(), [0x01, 0x00, 0x05, 0x00, 0x05]);

        let mut first = valve(0);
        first.apply_manual_settings(&data).unwrap();
        assert!(!first.is_watering());
        assert_eq!(first.manual_watering_minutes(), 0);
    }

    #[test]
    fn test_manual_remaining_decodes_through_codec() {
        let codec = TimestampCodec::new(Tz::UTC);
        let end = Utc.with_ymd_and_hms(2023, 6, 5, 8, 0, 0).unwrap();
        let raw = codec.encode(&end);

        let mut data = [0u8; 20];
        data[16..20].copy_from_slice(&raw.to_be_bytes());

        let mut last = valve(3);
        last.apply_manual_remaining(&data).unwrap();
        assert_eq!(last.watering_end_time(), end.timestamp());

        let mut first = valve(0);
        first.apply_manual_remaining(&data).unwrap();
        assert_eq!(first.watering_end_time(), 0);
    }

    #[test]
    fn test_short_record_keeps_previous_value() {
        let mut last = valve(3);
        last.set_manual_watering_minutes(45);
        assert!(last.apply_manual_settings(&[0u8; 12]).is_err());
        assert_eq!(last.manual_watering_minutes(), 45);
    }

    #[test]
    fn test_next_cycle_follows_schedule_flag() {
        let codec = TimestampCodec::new(Tz::UTC);
        let mut valve = valve(2);
        valve.frequency_mut().apply_record(FrequencyRecord {
            raw_start_time: codec.encode(&Utc.with_ymd_and_hms(2023, 6, 5, 0, 0, 0).unwrap()),
            duration_minutes: 10,
            interval_hours: 6,
        });
        assert!(valve.frequency().next_run_time().is_some());
        assert!(valve.next_cycle().is_none());

        valve.apply_schedule_enabled(&[0, 0, 1, 0]).unwrap();
        assert_eq!(valve.next_cycle(), valve.frequency().next_run_time());
    }
}
