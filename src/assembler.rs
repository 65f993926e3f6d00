//! Measurement reassembly.
//!
//! The probe sends each measurement as three separate indications with no
//! sequence number tying them together. Fragments are grouped purely by
//! arrival order: the latest fragment of each kind wins, and a measurement is
//! emitted as soon as all three kinds have been seen.
//!
//! If the device ever interleaves two cycles, a late fragment silently
//! replaces the in-flight one and the emitted measurement mixes both cycles.
//! Overwrites are logged so the hazard is at least visible.

use tracing::debug;

use crate::data::{Fragment, FragmentKind, Measurement};

/// Set of fragment kinds received for the in-flight measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FragmentSet(u8);

impl FragmentSet {
    /// No fragments.
    pub const EMPTY: Self = Self(0);
    /// All three fragments.
    pub const COMPLETE: Self = Self(0b111);

    fn bit(kind: FragmentKind) -> u8 {
        match kind {
            FragmentKind::Primary => 0b001,
            FragmentKind::Metadata => 0b010,
            FragmentKind::Errors => 0b100,
        }
    }

    /// Check if `kind` has been received.
    pub fn contains(&self, kind: FragmentKind) -> bool {
        self.0 & Self::bit(kind) != 0
    }

    /// Mark `kind` as received. Returns `true` if it was not set before.
    pub fn insert(&mut self, kind: FragmentKind) -> bool {
        let was_set = self.contains(kind);
        self.0 |= Self::bit(kind);
        !was_set
    }

    /// Check if every kind has been received.
    pub fn is_complete(&self) -> bool {
        *self == Self::COMPLETE
    }

    /// Check if nothing has been received.
    pub fn is_empty(&self) -> bool {
        *self == Self::EMPTY
    }

    /// Number of kinds received.
    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }
}

/// Accumulates fragments into complete measurements.
#[derive(Debug, Clone, Default)]
pub struct MeasurementAssembler {
    pending: Measurement,
    received: FragmentSet,
}

impl MeasurementAssembler {
    /// Create an empty assembler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a decoded fragment.
    ///
    /// Returns the completed measurement once all three kinds are present, and
    /// starts a fresh cycle.
    pub fn push(&mut self, fragment: Fragment) -> Option<Measurement> {
        let kind = fragment.kind();

        match fragment {
            Fragment::Primary(primary) => self.pending.primary = primary,
            Fragment::Metadata(metadata) => self.pending.metadata = metadata,
            Fragment::Errors(errors) => self.pending.errors = errors,
        }

        if !self.received.insert(kind) {
            debug!(
                "Overwrote in-flight {} fragment before the cycle completed",
                kind
            );
        }

        if !self.received.is_complete() {
            return None;
        }

        let measurement = std::mem::take(&mut self.pending);
        self.received = FragmentSet::EMPTY;
        Some(measurement)
    }

    /// Discard any partially assembled measurement.
    pub fn reset(&mut self) {
        self.pending = Measurement::default();
        self.received = FragmentSet::EMPTY;
    }

    /// Fragment kinds received for the in-flight measurement.
    pub fn pending(&self) -> FragmentSet {
        self.received
    }
}
