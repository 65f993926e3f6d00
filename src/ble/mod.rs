//! BLE communication module.
//!
//! Discovery filtering, the transport seam the session drives, and the
//! btleplug implementation of that seam.

pub mod connection;
pub mod filter;
pub mod platform;
pub mod scanner;
pub mod transport;
pub mod uuids;

pub use connection::ConnectionManager;
pub use filter::{Advertisement, DeviceFilter, Transports, DEFAULT_NAME_PREFIX};
pub use platform::BtleplugTransport;
pub use scanner::BleScanner;
pub use transport::{CharacteristicInfo, GattTransport, WriteMode};
pub use uuids::*;
