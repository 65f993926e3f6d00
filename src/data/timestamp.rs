//! Device timestamp type.
//!
//! The probe stamps every primary reading with its own clock and accepts the
//! same layout when the host sets the device time.

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};

/// Wall-clock time as kept by the probe.
///
/// Fields are stored exactly as they travel on the wire. No calendar
/// validation is performed; use [`DeviceTimestamp::to_naive_datetime`] to
/// obtain a checked calendar time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceTimestamp {
    /// Full year, e.g. 2024.
    pub year: u16,
    /// Month of year (1-12).
    pub month: u8,
    /// Day of month (1-31).
    pub day: u8,
    /// Hour of day (0-23).
    pub hour: u8,
    /// Minute (0-59).
    pub minute: u8,
    /// Second (0-59).
    pub second: u8,
    /// Hundredths of a second (0-99).
    pub centisecond: u8,
}

impl DeviceTimestamp {
    /// Create a new timestamp from its raw fields.
    pub fn new(
        year: u16,
        month: u8,
        day: u8,
        hour: u8,
        minute: u8,
        second: u8,
        centisecond: u8,
    ) -> Self {
        Self {
            year,
            month,
            day,
            hour,
            minute,
            second,
            centisecond,
        }
    }

    /// Build a timestamp from any chrono date-time.
    ///
    /// Years outside the `u16` range are clamped. Sub-centisecond precision is
    /// dropped.
    pub fn from_datetime<T: Datelike + Timelike>(datetime: &T) -> Self {
        let year = datetime.year().clamp(0, u16::MAX as i32) as u16;
        // Leap seconds report nanoseconds >= 1e9
        let centisecond = (datetime.nanosecond() / 10_000_000).min(99) as u8;

        Self {
            year,
            month: datetime.month() as u8,
            day: datetime.day() as u8,
            hour: datetime.hour() as u8,
            minute: datetime.minute() as u8,
            second: datetime.second() as u8,
            centisecond,
        }
    }

    /// The current local time, suitable for a device time sync.
    pub fn now_local() -> Self {
        Self::from_datetime(&chrono::Local::now())
    }

    /// Convert to a calendar time.
    ///
    /// Returns `None` when any field is out of range (including the all-zero
    /// timestamp a probe reports before its clock is set).
    pub fn to_naive_datetime(&self) -> Option<NaiveDateTime> {
        if self.centisecond > 99 {
            return None;
        }

        NaiveDate::from_ymd_opt(self.year as i32, self.month as u32, self.day as u32)?
            .and_hms_milli_opt(
                self.hour as u32,
                self.minute as u32,
                self.second as u32,
                self.centisecond as u32 * 10,
            )
    }

    /// Check whether the fields form a valid calendar time.
    pub fn is_valid(&self) -> bool {
        self.to_naive_datetime().is_some()
    }
}

impl std::fmt::Display for DeviceTimestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}.{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second, self.centisecond
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_naive_datetime() {
        let ts = DeviceTimestamp::new(2024, 6, 15, 10, 30, 5, 42);
        let dt = ts.to_naive_datetime().unwrap();

        assert_eq!(dt.year(), 2024);
        assert_eq!(dt.month(), 6);
        assert_eq!(dt.day(), 15);
        assert_eq!(dt.hour(), 10);
        assert_eq!(dt.minute(), 30);
        assert_eq!(dt.second(), 5);
        assert_eq!(dt.nanosecond(), 420_000_000);
    }

    #[test]
    fn test_invalid_calendar_time() {
        assert!(!DeviceTimestamp::default().is_valid());
        assert!(!DeviceTimestamp::new(2024, 2, 30, 0, 0, 0, 0).is_valid());
        assert!(!DeviceTimestamp::new(2024, 1, 1, 24, 0, 0, 0).is_valid());
        assert!(!DeviceTimestamp::new(2024, 1, 1, 0, 0, 0, 100).is_valid());
    }

    #[test]
    fn test_from_datetime() {
        let dt = NaiveDate::from_ymd_opt(2023, 12, 31)
            .unwrap()
            .and_hms_milli_opt(23, 59, 58, 987)
            .unwrap();

        let ts = DeviceTimestamp::from_datetime(&dt);
        assert_eq!(ts, DeviceTimestamp::new(2023, 12, 31, 23, 59, 58, 98));
    }

    #[test]
    fn test_display() {
        let ts = DeviceTimestamp::new(2024, 6, 5, 7, 8, 9, 1);
        assert_eq!(ts.to_string(), "2024-06-05 07:08:09.01");
    }

    #[test]
    fn test_now_local_is_valid() {
        assert!(DeviceTimestamp::now_local().is_valid());
    }
}
