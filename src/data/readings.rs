//! Measurement data structures.
//!
//! A single survey shot arrives as three independent indications (primary,
//! metadata and errors). Each decodes into one of the reading types below and
//! the three together form a [`Measurement`].

use crate::data::DeviceTimestamp;

/// Primary survey reading: when and where the shot was taken.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PrimaryReading {
    /// Device time of the shot.
    pub timestamp: DeviceTimestamp,
    /// Distance in meters.
    pub distance_meters: f32,
    /// Azimuth in degrees.
    pub azimuth_degrees: f32,
    /// Inclination in degrees.
    pub inclination_degrees: f32,
}

impl Default for PrimaryReading {
    fn default() -> Self {
        Self {
            timestamp: DeviceTimestamp::default(),
            distance_meters: f32::NAN,
            azimuth_degrees: f32::NAN,
            inclination_degrees: f32::NAN,
        }
    }
}

/// Secondary data describing how the shot was acquired.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MetadataReading {
    /// Reference index assigned by the device, increasing per shot.
    pub reference_index: u32,
    /// Magnetic dip in degrees.
    pub dip_degrees: f32,
    /// Roll in degrees.
    pub roll_degrees: f32,
    /// Device temperature in °C.
    pub temperature_celsius: f32,
    /// Number of samples averaged into this shot.
    pub samples_averaged: u16,
    /// Device-specific measurement type code.
    pub measurement_type: u8,
}

impl Default for MetadataReading {
    fn default() -> Self {
        Self {
            reference_index: 0,
            dip_degrees: f32::NAN,
            roll_degrees: f32::NAN,
            temperature_celsius: f32::NAN,
            samples_averaged: 0,
            measurement_type: 0,
        }
    }
}

/// One error slot reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ErrorPair {
    /// Device error code.
    pub code: u8,
    /// First auxiliary value.
    pub data1: f32,
    /// Second auxiliary value.
    pub data2: f32,
}

/// The two error slots that accompany every shot.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ErrorsReading {
    /// First error slot.
    pub first: ErrorPair,
    /// Second error slot.
    pub second: ErrorPair,
}

impl ErrorsReading {
    /// Both slots, in wire order.
    pub fn pairs(&self) -> [ErrorPair; 2] {
        [self.first, self.second]
    }
}

/// A complete survey measurement assembled from all three fragments.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Measurement {
    /// Primary reading.
    pub primary: PrimaryReading,
    /// Acquisition metadata.
    pub metadata: MetadataReading,
    /// Error slots.
    pub errors: ErrorsReading,
}

impl std::fmt::Display for Measurement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ref={} dist={}m azi={}° inc={}° temp={}°C type={}",
            self.metadata.reference_index,
            self.primary.distance_meters,
            self.primary.azimuth_degrees,
            self.primary.inclination_degrees,
            self.metadata.temperature_celsius,
            self.metadata.measurement_type
        )
    }
}

/// Which part of a measurement a fragment carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FragmentKind {
    /// Primary reading.
    Primary,
    /// Acquisition metadata.
    Metadata,
    /// Error slots.
    Errors,
}

impl FragmentKind {
    /// All kinds, in the order the device usually sends them.
    pub const ALL: [FragmentKind; 3] = [Self::Primary, Self::Metadata, Self::Errors];

    /// Short lowercase name, used in logs and errors.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Metadata => "metadata",
            Self::Errors => "errors",
        }
    }
}

impl std::fmt::Display for FragmentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A decoded measurement fragment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Fragment {
    /// Decoded primary reading.
    Primary(PrimaryReading),
    /// Decoded metadata.
    Metadata(MetadataReading),
    /// Decoded error slots.
    Errors(ErrorsReading),
}

impl Fragment {
    /// The kind of this fragment.
    pub fn kind(&self) -> FragmentKind {
        match self {
            Self::Primary(_) => FragmentKind::Primary,
            Self::Metadata(_) => FragmentKind::Metadata,
            Self::Errors(_) => FragmentKind::Errors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_nan() {
        let primary = PrimaryReading::default();
        assert!(primary.distance_meters.is_nan());
        assert!(primary.azimuth_degrees.is_nan());
        assert!(primary.inclination_degrees.is_nan());

        let metadata = MetadataReading::default();
        assert!(metadata.dip_degrees.is_nan());
        assert!(metadata.temperature_celsius.is_nan());
        assert_eq!(metadata.samples_averaged, 0);
    }

    #[test]
    fn test_fragment_kind() {
        let fragment = Fragment::Errors(ErrorsReading::default());
        assert_eq!(fragment.kind(), FragmentKind::Errors);
        assert_eq!(FragmentKind::Metadata.to_string(), "metadata");
    }

    #[test]
    fn test_measurement_display() {
        let mut m = Measurement::default();
        m.metadata.reference_index = 7;
        m.primary.distance_meters = 1.5;
        m.primary.azimuth_degrees = 90.0;
        m.primary.inclination_degrees = -5.0;
        m.metadata.temperature_celsius = 21.0;
        m.metadata.measurement_type = 2;

        assert_eq!(
            m.to_string(),
            "ref=7 dist=1.5m azi=90° inc=-5° temp=21°C type=2"
        );
    }
}
