//! Whole-device state: battery, model and the four valve slots.
//!
//! The timer always exchanges four valve slots, even on one- and two-valve
//! hardware. [`DeviceState`] keeps all four so every push carries complete
//! records, and hides the slots beyond the valve count from its zone
//! accessors.

use std::fmt;

use melnor_types::{
    Brand, ManualSetting, ModelInfo, ParseResult, VALVE_SLOTS, encode_manual_settings,
    encode_schedule_enabled, parse_battery,
    types::{MANUAL_SETTINGS_BYTES, SCHEDULE_ENABLED_BYTES},
};

use crate::timestamp::TimestampCodec;
use crate::valve::{Valve, Zone};

/// Valve count assumed until the model has been read.
pub const DEFAULT_VALVE_COUNT: u8 = VALVE_SLOTS as u8;

/// Snapshot of everything the library knows about a timer.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceState {
    battery: u8,
    model: Option<ModelInfo>,
    /// Brand token reported instead of a model code.
    brand: Option<Brand>,
    valves: [Valve; VALVE_SLOTS],
    /// Bumped on every local valve mutation.
    generation: u64,
}

impl DeviceState {
    /// Empty state: no battery reading, no model, four default valves.
    pub fn new(codec: TimestampCodec) -> Self {
        Self {
            battery: 0,
            model: None,
            brand: None,
            valves: Zone::ALL.map(|zone| Valve::new(zone, codec)),
            generation: 0,
        }
    }

    /// Battery level in percent.
    pub fn battery_level(&self) -> u8 {
        self.battery
    }

    /// Model read during the connection handshake.
    pub fn model(&self) -> Option<&ModelInfo> {
        self.model.as_ref()
    }

    /// Valve count of the model, 4 while it is unknown.
    pub fn valve_count(&self) -> u8 {
        self.model
            .as_ref()
            .map_or(DEFAULT_VALVE_COUNT, |model| model.valve_count)
    }

    /// Display name, e.g. "2 Valve Timer".
    pub fn name(&self) -> String {
        format!("{} Valve Timer", self.valve_count())
    }

    /// Whether `zone` exists on this hardware.
    pub fn has_zone(&self, zone: Zone) -> bool {
        zone.get() < self.valve_count()
    }

    /// The valve for `zone`, or `None` if the hardware doesn't have it.
    pub fn valve(&self, zone: Zone) -> Option<&Valve> {
        self.has_zone(zone).then(|| &self.valves[zone.index()])
    }

    /// Mutable access to a present valve.
    pub fn valve_mut(&mut self, zone: Zone) -> Option<&mut Valve> {
        if self.has_zone(zone) {
            Some(&mut self.valves[zone.index()])
        } else {
            None
        }
    }

    /// Valves present on this hardware, in zone order.
    pub fn visible_valves(&self) -> impl Iterator<Item = &Valve> {
        self.valves
            .iter()
            .take(usize::from(self.valve_count()))
    }

    /// All four slots including hidden ones.
    pub fn slots(&self) -> &[Valve; VALVE_SLOTS] {
        &self.valves
    }

    /// Brand of a catalogued model, or the brand token the timer reported.
    pub fn brand(&self) -> Option<Brand> {
        self.model
            .as_ref()
            .and_then(ModelInfo::brand)
            .or_else(|| self.brand.clone())
    }

    /// Whether the model endpoint has been read successfully.
    pub fn is_identified(&self) -> bool {
        self.model.is_some() || self.brand.is_some()
    }

    pub(crate) fn set_model(&mut self, model: ModelInfo) {
        self.model = Some(model);
    }

    pub(crate) fn set_brand(&mut self, brand: Brand) {
        self.brand = Some(brand);
    }

    /// Counter of local valve mutations.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Mutable access to a present valve, counted as a local mutation.
    pub(crate) fn edit_valve(&mut self, zone: Zone) -> Option<&mut Valve> {
        if !self.has_zone(zone) {
            return None;
        }
        self.generation = self.generation.wrapping_add(1);
        Some(&mut self.valves[zone.index()])
    }

    pub(crate) fn apply_battery(&mut self, data: &[u8]) -> ParseResult<()> {
        self.battery = parse_battery(data)?;
        Ok(())
    }

    /// Apply a record to every slot, returning the first slot error.
    ///
    /// Slots that decode are applied even when a later slot fails.
    fn apply_slots(
        &mut self,
        mut apply: impl FnMut(&mut Valve) -> ParseResult<()>,
    ) -> ParseResult<()> {
        let mut first_error = None;
        for valve in &mut self.valves {
            if let Err(err) = apply(valve) {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    pub(crate) fn apply_manual_settings(&mut self, data: &[u8]) -> ParseResult<()> {
        self.apply_slots(|valve| valve.apply_manual_settings(data))
    }

    pub(crate) fn apply_manual_remaining(&mut self, data: &[u8]) -> ParseResult<()> {
        self.apply_slots(|valve| valve.apply_manual_remaining(data))
    }

    pub(crate) fn apply_schedule_enabled(&mut self, data: &[u8]) -> ParseResult<()> {
        self.apply_slots(|valve| valve.apply_schedule_enabled(data))
    }

    pub(crate) fn apply_frequency(&mut self, zone: Zone, data: &[u8]) -> ParseResult<()> {
        self.valves[zone.index()].apply_frequency(data)
    }

    /// The 20-byte manual settings record for all four slots.
    pub fn manual_settings_bytes(&self) -> [u8; MANUAL_SETTINGS_BYTES] {
        let settings: [ManualSetting; VALVE_SLOTS] =
            std::array::from_fn(|slot| self.valves[slot].manual_setting());
        encode_manual_settings(&settings)
    }

    /// The 4-byte schedule enabled record for all four slots.
    pub fn schedule_enabled_bytes(&self) -> [u8; SCHEDULE_ENABLED_BYTES] {
        let flags: [bool; VALVE_SLOTS] =
            std::array::from_fn(|slot| self.valves[slot].schedule_enabled());
        encode_schedule_enabled(&flags)
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} (battery {}%)", self.name(), self.battery)?;
        for valve in self.visible_valves() {
            writeln!(f, "  {}", valve)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::Tz;

    fn state() -> DeviceState {
        DeviceState::new(TimestampCodec::new(Tz::UTC))
    }

    fn zone(index: u8) -> Zone {
        Zone::new(index).unwrap()
    }

    #[test]
    fn test_defaults_before_model_read() {
        let state = state();
        assert_eq!(state.valve_count(), 4);
        assert_eq!(state.name(), "4 Valve Timer");
        assert_eq!(state.visible_valves().count(), 4);
        assert!(state.model().is_none());
    }

    #[test]
    fn test_hidden_zones_are_absent() {
        let mut state = state();
        state.set_model(ModelInfo::from_bytes(b"93100 2").unwrap());

        assert_eq!(state.name(), "2 Valve Timer");
        assert!(state.valve(zone(1)).is_some());
        assert!(state.valve(zone(2)).is_none());
        assert!(state.valve_mut(zone(3)).is_none());
        assert_eq!(state.visible_valves().count(), 2);
        assert_eq!(state.slots().len(), 4);
    }

    #[test]
    fn test_hidden_zones_still_decode_and_encode() {
        let mut state = state();
        state.set_model(ModelInfo::from_bytes(b"93015 1").unwrap());

        let mut data = [0u8; 20];
        data[15..20].copy_from_slice(&[0x01, 0x00, 0x07, 0x00, 0x07]);
        state.apply_manual_settings(&data).unwrap();

        assert!(state.slots()[3].is_watering());
        assert_eq!(state.manual_settings_bytes(), data);
    }

    #[test]
    fn test_short_record_applies_covered_slots() {
        let mut state = state();
        let data = [0x01, 0x00, 0x03, 0x00, 0x03, 0x01, 0x00, 0x04, 0x00, 0x04];
        assert!(state.apply_manual_settings(&data).is_err());

        assert_eq!(state.slots()[0].manual_watering_minutes(), 3);
        assert_eq!(state.slots()[1].manual_watering_minutes(), 4);
        assert_eq!(state.slots()[2].manual_watering_minutes(), 20);
    }

    #[test]
    fn test_schedule_enabled_round_trip() {
        let mut state = state();
        state.apply_schedule_enabled(&[0, 1, 1, 0]).unwrap();
        assert!(state.valve(zone(1)).unwrap().schedule_enabled());
        assert_eq!(state.schedule_enabled_bytes(), [0, 1, 1, 0]);
    }

    #[test]
    fn test_edits_bump_generation() {
        let mut state = state();
        state.set_model(ModelInfo::from_bytes(b"93100 2").unwrap());
        assert_eq!(state.generation(), 0);

        state.edit_valve(zone(0)).unwrap().set_is_watering(true);
        assert_eq!(state.generation(), 1);

        assert!(state.edit_valve(zone(3)).is_none());
        state.apply_schedule_enabled(&[1, 1, 1, 1]).unwrap();
        assert_eq!(state.generation(), 1);
    }

    #[test]
    fn test_brand_token_identifies_without_model() {
        let mut state = state();
        assert!(!state.is_identified());

        state.set_brand(Brand::from_manufacturer(b"ML_BLE"));
        assert!(state.is_identified());
        assert_eq!(state.brand(), Some(Brand::Melnor));
        assert_eq!(state.valve_count(), 4);
        assert!(state.model().is_none());
    }

    #[test]
    fn test_battery_record() {
        let mut state = state();
        state.apply_battery(&[0x02, 0xA8]).unwrap();
        assert_eq!(state.battery_level(), 55);
        assert!(state.apply_battery(&[0x02]).is_err());
        assert_eq!(state.battery_level(), 55);
    }
}
