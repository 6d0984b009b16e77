//! Core BLE synchronization library for Melnor irrigation timers.
//!
//! This crate keeps a local model of a one-, two- or four-valve Melnor (or
//! Eden) Bluetooth timer in sync with the device: it reads the timer's
//! fixed-layout records, computes upcoming watering windows from the valve
//! schedules, and writes local changes back.
//!
//! # Features
//!
//! - **Session state machine**: concurrent `connect()` calls collapse into one attempt
//! - **Parallel fetch**: all records read concurrently, partial failures tolerated
//! - **Atomic setters**: mutate one valve and push, under a per-session lock
//! - **Schedule engine**: next run time and live watering status per valve
//! - **Vendor clock codec**: the timer's epoch-shifted 4-byte timestamps
//! - **Pluggable transport**: btleplug for hardware, an in-memory mock for tests
//!
//! # Supported Devices
//!
//! | Valves | Melnor | Eden |
//! |--------|--------|------|
//! | 1 | 93015, 93016 | 25437, 25441 |
//! | 2 | 93100, 93101 | 25438, 25442 |
//! | 4 | 93280, 93281 | 25439, 25443 |
//!
//! # Quick Start
//!
//! ```no_run
//! use melnor_core::{BleTransport, ConnectionConfig, Device, TimestampCodec, Zone};
//!
//! # async fn example(
//! #     adapter: btleplug::platform::Adapter,
//! #     peripheral: btleplug::platform::Peripheral,
//! # ) -> melnor_core::Result<()> {
//! let transport = BleTransport::new(adapter, peripheral, ConnectionConfig::default()).await?;
//! let device = Device::new(transport, TimestampCodec::from_name("America/Detroit"));
//!
//! device.connect().await?;
//! device.fetch_state().await?;
//! println!("{} at {}% battery", device.name().await, device.battery_level().await);
//!
//! let zone = Zone::new(0).expect("zone 0 exists");
//! device.set_manual_watering_minutes(zone, 10).await?;
//! device.set_is_watering(zone, true).await?;
//!
//! device.disconnect().await?;
//! # Ok(())
//! # }
//! ```

pub mod ble;
pub mod config;
pub mod device;
pub mod error;
pub mod events;
pub mod frequency;
pub mod mock;
pub mod poller;
pub mod retry;
pub mod state;
pub mod timestamp;
pub mod traits;
pub mod util;
pub mod valve;

// Re-export the wire-level crate
pub use melnor_types::types;
pub use melnor_types::uuids;
pub use melnor_types::{Brand, Endpoint, ModelInfo};

// Core exports
pub use ble::{BleTransport, default_adapter};
pub use config::{ConnectionConfig, SyncConfig};
pub use device::{ConnectionState, Device};
pub use error::{ConnectionFailureReason, Error, Result};
pub use events::{DeviceEvent, DisconnectReason, EventReceiver, EventSender};
pub use frequency::Frequency;
pub use mock::{MockTransport, MockTransportBuilder};
pub use poller::StatePoller;
pub use retry::{RetryConfig, with_retry};
pub use state::DeviceState;
pub use timestamp::{TimeShift, TimestampCodec};
pub use traits::{DisconnectHandler, Transport};
pub use valve::{Valve, Zone};

/// A device session shared between tasks, e.g. with a [`StatePoller`].
pub type SharedDevice<T> = std::sync::Arc<Device<T>>;
