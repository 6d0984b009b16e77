//! Example: Sync a Timer and Start Manual Watering
//!
//! Discovers the timer with a short btleplug scan, fetches its state, prints
//! every visible valve and optionally starts manual watering on one zone.
//!
//! Run with: `cargo run --example sync_timer -- <DEVICE_ADDRESS> [ZONE MINUTES]`
//!
//! Set `TZ` (e.g. `TZ=America/Detroit`) to the zone the timer runs in.

use std::env;
use std::time::Duration;

use btleplug::api::{Central, Peripheral as _, ScanFilter};

use melnor_core::{BleTransport, Device, SyncConfig, Zone, default_adapter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();
    let Some(address) = args.get(1) else {
        eprintln!("Usage: {} <DEVICE_ADDRESS> [ZONE MINUTES]", args[0]);
        eprintln!();
        eprintln!("Example:");
        eprintln!("  {} AA:BB:CC:DD:EE:FF 1 10", args[0]);
        std::process::exit(1);
    };

    let adapter = default_adapter().await?;
    println!("Scanning for {}...", address);
    adapter.start_scan(ScanFilter::default()).await?;
    tokio::time::sleep(Duration::from_secs(5)).await;
    adapter.stop_scan().await?;

    let mut found = None;
    for peripheral in adapter.peripherals().await? {
        if peripheral.address().to_string().eq_ignore_ascii_case(address) {
            found = Some(peripheral);
            break;
        }
    }
    let Some(peripheral) = found else {
        eprintln!("Timer {} not found", address);
        std::process::exit(1);
    };

    let config = SyncConfig::default();
    let transport = BleTransport::new(adapter, peripheral, config.connection.clone()).await?;
    let device = Device::with_config(transport, &config);

    device.connect().await?;
    device.fetch_state().await?;

    println!();
    println!("{} ({}% battery)", device.name().await, device.battery_level().await);
    for valve in device.snapshot().await.visible_valves() {
        println!("  {}", valve);
    }

    if let (Some(zone), Some(minutes)) = (args.get(2), args.get(3)) {
        let zone = Zone::try_from(zone.parse::<u8>()?.saturating_sub(1))?;
        let minutes: u16 = minutes.parse()?;

        println!();
        println!("Watering {} for {} minutes", zone, minutes);
        device.set_manual_watering_minutes(zone, minutes).await?;
        device.set_is_watering(zone, true).await?;
    }

    device.disconnect().await?;
    Ok(())
}
