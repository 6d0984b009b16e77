//! Platform-agnostic wire records for Melnor Bluetooth irrigation timers.
//!
//! This crate holds everything about the timer's GATT protocol that does not
//! need a Bluetooth stack or an async runtime, so it can be shared by the
//! native sync layer (melnor-core) and by tooling that only inspects
//! captured bytes.
//!
//! # Features
//!
//! - Characteristic UUIDs and the symbolic [`Endpoint`] key
//! - Battery, model and brand parsing
//! - Manual setting, manual remaining-time, schedule enabled and
//!   frequency record codecs
//! - A catalog of known Melnor and Eden models
//!
//! # Example
//!
//! ```
//! use melnor_types::{ManualSetting, parse_battery};
//!
//! let setting = ManualSetting { is_watering: true, minutes: 10 };
//! assert_eq!(setting.to_bytes(), [0x01, 0x00, 0x0A, 0x00, 0x0A]);
//! assert_eq!(parse_battery(&[0x02, 0xA8]).unwrap(), 55);
//! ```

pub mod error;
pub mod types;
pub mod uuid;

pub use error::{ParseError, ParseResult};
pub use types::{
    Brand, CatalogEntry, FrequencyRecord, MODEL_CATALOG, ManualSetting, ModelInfo, VALVE_SLOTS,
    encode_manual_settings, encode_schedule_enabled, manual_end_from_slot, parse_battery,
    schedule_enabled_from_slot,
};
pub use uuid::Endpoint;
pub use uuid as uuids;
