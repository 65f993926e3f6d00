// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # bric5-ble
//!
//! A cross-platform Rust library for streaming survey measurements from
//! BRIC5 borehole probes over Bluetooth Low Energy.
//!
//! A session scans for the first device advertising a `BRIC5_` name,
//! connects, enables indications on the three measurement characteristics
//! and reassembles every primary, metadata and errors triple into a
//! [`Measurement`].
//!
//! ## Features
//!
//! - **Discovery**: Name-prefix filtered LE scan with a bounded timeout
//! - **Measurement Streaming**: Indication-driven fragment reassembly
//! - **Device Time**: Write the probe clock from any date-time
//! - **Device Control**: Send raw commands to the control characteristic
//! - **Testable Core**: Sans-IO session state machine behind a transport trait
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bric5_ble::{BricClient, ClientConfig, ClientEvent, Result, SessionState};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let client = BricClient::new(ClientConfig::default()).await?;
//!     let mut events = client.subscribe();
//!
//!     client.start_scan().await?;
//!
//!     while let Ok(event) = events.recv().await {
//!         match event {
//!             ClientEvent::StateChanged(SessionState::Streaming) => {
//!                 client.sync_device_time().await?
//!             }
//!             ClientEvent::Measurement(m) => println!("{}", m),
//!             ClientEvent::Disconnected => break,
//!             _ => {}
//!         }
//!     }
//!
//!     client.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Platform Notes
//!
//! ### macOS
//! Requires Bluetooth permission. Add `NSBluetoothAlwaysUsageDescription`
//! to your Info.plist for bundled apps.
//!
//! ### Linux
//! Requires BlueZ. User may need to be in the `bluetooth` group.
//!
//! ### Windows
//! Requires Windows 10 or later with Bluetooth LE support.
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization/deserialization for data types

// Public modules
pub mod assembler;
pub mod ble;
pub mod client;
pub mod config;
pub mod data;
pub mod error;
pub mod protocol;
pub mod session;

// Re-exports for convenience
pub use client::{BricClient, CallbackHandle};
pub use config::ClientConfig;
pub use error::{Error, Result};
pub use session::{ClientEvent, Command, GattSession, Output, SessionEvent, SessionState};

// Re-export commonly used types from submodules
pub use assembler::MeasurementAssembler;
pub use ble::filter::{Advertisement, DeviceFilter, Transports};
pub use ble::transport::{CharacteristicInfo, GattTransport, WriteMode};
pub use data::{
    DeviceTimestamp, ErrorPair, ErrorsReading, Fragment, FragmentKind, Measurement,
    MetadataReading, PrimaryReading,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_exports() {
        // Verify that key types are exported
        let _ = std::any::TypeId::of::<BricClient>();
        let _ = std::any::TypeId::of::<GattSession>();
        let _ = std::any::TypeId::of::<Error>();
        let _ = std::any::TypeId::of::<Measurement>();
        let _ = std::any::TypeId::of::<DeviceTimestamp>();
        let _ = std::any::TypeId::of::<ClientConfig>();
    }
}
