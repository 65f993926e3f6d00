//! Data structures for probe data.
//!
//! This module contains the reading types decoded from the measurement
//! characteristics and the device timestamp shared by reads and writes.

pub mod readings;
pub mod timestamp;

pub use readings::{
    ErrorPair, ErrorsReading, Fragment, FragmentKind, Measurement, MetadataReading, PrimaryReading,
};
pub use timestamp::DeviceTimestamp;
