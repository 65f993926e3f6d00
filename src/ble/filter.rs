//! Discovery filtering.
//!
//! Decides which advertisements belong to a BRIC5 probe. The policy is
//! first-match: the session connects to the first accepted device and stops
//! scanning, with no ranking by signal strength.

/// Default advertised name prefix of BRIC5 probes.
pub const DEFAULT_NAME_PREFIX: &str = "BRIC5_";

/// Radio transports a device reports support for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Transports {
    /// Bluetooth Low Energy.
    pub low_energy: bool,
    /// Bluetooth Classic (BR/EDR).
    pub classic: bool,
}

impl Transports {
    /// LE only.
    pub const LOW_ENERGY: Self = Self {
        low_energy: true,
        classic: false,
    };

    /// Classic only.
    pub const CLASSIC: Self = Self {
        low_energy: false,
        classic: true,
    };

    /// Both LE and Classic.
    pub const DUAL: Self = Self {
        low_energy: true,
        classic: true,
    };

    /// Check if LE is supported.
    pub fn supports_low_energy(&self) -> bool {
        self.low_energy
    }
}

/// A single advertisement observation.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Advertisement {
    /// Platform identifier of the peripheral; opaque to the session.
    pub identifier: String,
    /// Advertised local name, if any.
    pub name: Option<String>,
    /// Transports the device supports.
    pub transports: Transports,
    /// Signal strength in dBm. Informational only.
    pub rssi: Option<i16>,
}

impl Advertisement {
    /// Create an observation of an LE device.
    pub fn low_energy(identifier: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            name: Some(name.into()),
            transports: Transports::LOW_ENERGY,
            rssi: None,
        }
    }
}

/// Predicate selecting BRIC5 probes from discovery results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceFilter {
    name_prefix: String,
}

impl DeviceFilter {
    /// Create a filter for the given name prefix.
    pub fn new(name_prefix: impl Into<String>) -> Self {
        Self {
            name_prefix: name_prefix.into(),
        }
    }

    /// The name prefix this filter matches.
    pub fn name_prefix(&self) -> &str {
        &self.name_prefix
    }

    /// Check whether an advertisement comes from a probe.
    pub fn accepts(&self, advertisement: &Advertisement) -> bool {
        if !advertisement.transports.supports_low_energy() {
            return false;
        }

        advertisement
            .name
            .as_deref()
            .map(|name| name.starts_with(&self.name_prefix))
            .unwrap_or(false)
    }
}

impl Default for DeviceFilter {
    fn default() -> Self {
        Self::new(DEFAULT_NAME_PREFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_bric_device() {
        let filter = DeviceFilter::default();
        assert!(filter.accepts(&Advertisement::low_energy("dev-1", "BRIC5_42")));
    }

    #[test]
    fn test_rejects_other_name() {
        let filter = DeviceFilter::default();
        assert!(!filter.accepts(&Advertisement::low_energy("dev-2", "OtherDevice_1")));
        assert!(!filter.accepts(&Advertisement::low_energy("dev-3", "bric5_42")));
        assert!(!filter.accepts(&Advertisement::low_energy("dev-4", "BRIC4_1")));
    }

    #[test]
    fn test_rejects_classic_only() {
        let filter = DeviceFilter::default();
        let advertisement = Advertisement {
            transports: Transports::CLASSIC,
            ..Advertisement::low_energy("dev-5", "BRIC5_42")
        };
        assert!(!filter.accepts(&advertisement));
    }

    #[test]
    fn test_accepts_dual_mode() {
        let filter = DeviceFilter::default();
        let advertisement = Advertisement {
            transports: Transports::DUAL,
            ..Advertisement::low_energy("dev-6", "BRIC5_7")
        };
        assert!(filter.accepts(&advertisement));
    }

    #[test]
    fn test_rejects_unnamed() {
        let filter = DeviceFilter::default();
        let advertisement = Advertisement {
            name: None,
            ..Advertisement::low_energy("dev-7", "")
        };
        assert!(!filter.accepts(&advertisement));
    }

    #[test]
    fn test_custom_prefix() {
        let filter = DeviceFilter::new("LAB_");
        assert!(filter.accepts(&Advertisement::low_energy("dev-8", "LAB_probe")));
        assert!(!filter.accepts(&Advertisement::low_energy("dev-9", "BRIC5_42")));
    }
}
