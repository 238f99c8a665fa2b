//! MS-DOS packed timestamps.
//!
//! ZIP records store modification times as two 16-bit words:
//!
//! ```text
//! time: | hour (5) | minute (6) | second / 2 (5) |
//! date: | year - 1980 (7) | month (4) | day (5) |
//! ```
//!
//! The packed `u32` used here carries the date in the high word and the
//! time in the low word. All conversions are in UTC.

use std::fmt;

use jiff::Timestamp;
use jiff::civil::DateTime;
use jiff::tz::TimeZone;

/// 1980-01-01T00:00:00Z, the earliest representable DOS timestamp.
pub const DOS_EPOCH: Timestamp = Timestamp::constant(315_532_800, 0);

/// 2107-12-31T23:59:58Z, the latest representable DOS timestamp.
pub const DOS_MAX: Timestamp = Timestamp::constant(4_354_819_198, 0);

/// A packed DOS date and time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DosDateTime(u32);

impl DosDateTime {
    pub fn from_packed(packed: u32) -> Self {
        Self(packed)
    }

    /// Pack a timestamp, clamping it into the DOS range first.
    ///
    /// Odd seconds round down to the previous even second.
    pub fn from_timestamp(timestamp: Timestamp) -> Self {
        let zoned = clamp(timestamp).to_zoned(TimeZone::UTC);

        let time = ((zoned.second() as u32) >> 1)
            | ((zoned.minute() as u32) << 5)
            | ((zoned.hour() as u32) << 11);
        let date = (zoned.day() as u32)
            | ((zoned.month() as u32) << 5)
            | (((zoned.year() as u32) - 1980) << 9);

        Self((date << 16) | time)
    }

    /// Unpack into a UTC timestamp.
    ///
    /// Packed values with out-of-range fields (month zero, 62 seconds, ...)
    /// are common in archives from other tools; they map to [`DOS_EPOCH`].
    pub fn to_timestamp(self) -> Timestamp {
        let second = (self.time() & 0x1F) * 2;
        let minute = (self.time() >> 5) & 0x3F;
        let hour = (self.time() >> 11) & 0x1F;
        let day = self.date() & 0x1F;
        let month = (self.date() >> 5) & 0x0F;
        let year = ((self.date() >> 9) & 0x7F) + 1980;

        DateTime::new(
            year as i16,
            month as i8,
            day as i8,
            hour as i8,
            minute as i8,
            second as i8,
            0,
        )
        .and_then(|datetime| datetime.to_zoned(TimeZone::UTC))
        .map(|zoned| zoned.timestamp())
        .unwrap_or(DOS_EPOCH)
    }

    pub fn packed(self) -> u32 {
        self.0
    }

    /// The low word, as stored in the "last mod file time" field.
    pub fn time(self) -> u16 {
        self.0 as u16
    }

    /// The high word, as stored in the "last mod file date" field.
    pub fn date(self) -> u16 {
        (self.0 >> 16) as u16
    }
}

impl From<Timestamp> for DosDateTime {
    fn from(timestamp: Timestamp) -> Self {
        Self::from_timestamp(timestamp)
    }
}

impl fmt::Display for DosDateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_timestamp())
    }
}

/// Clamp a timestamp into `[DOS_EPOCH, DOS_MAX]`, dropping sub-second precision.
pub fn clamp(timestamp: Timestamp) -> Timestamp {
    let seconds = timestamp
        .as_second()
        .clamp(DOS_EPOCH.as_second(), DOS_MAX.as_second());
    Timestamp::from_second(seconds).unwrap_or(DOS_EPOCH)
}

/// Pack a timestamp into the DOS format.
pub fn to_dos(timestamp: Timestamp) -> u32 {
    DosDateTime::from_timestamp(timestamp).packed()
}

/// Unpack a DOS timestamp.
pub fn to_unix(packed: u32) -> Timestamp {
    DosDateTime::from_packed(packed).to_timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> Timestamp {
        s.parse().unwrap()
    }

    #[test]
    fn known_vector() {
        assert_eq!(to_dos(ts("2023-03-29T13:02:10Z")), 1_451_059_269);
        assert_eq!(to_unix(1_451_059_269).to_string(), "2023-03-29T13:02:10Z");
    }

    #[test]
    fn words() {
        let packed = DosDateTime::from_packed(1_451_059_269);
        assert_eq!(packed.date(), 0x567D);
        assert_eq!(packed.time(), 0x6845);
    }

    #[test]
    fn round_trip_even_seconds() {
        for s in [
            "1980-01-01T00:00:00Z",
            "1999-12-31T23:59:58Z",
            "2000-02-29T12:30:44Z",
            "2038-01-19T03:14:06Z",
            "2107-12-31T23:59:58Z",
        ] {
            assert_eq!(to_unix(to_dos(ts(s))), ts(s), "{s}");
        }
    }

    #[test]
    fn odd_seconds_round_down() {
        assert_eq!(
            to_unix(to_dos(ts("2023-03-29T13:02:11Z"))),
            ts("2023-03-29T13:02:10Z")
        );
    }

    #[test]
    fn clamps_out_of_range() {
        assert_eq!(to_unix(to_dos(ts("1970-01-01T00:00:00Z"))), DOS_EPOCH);
        assert_eq!(to_unix(to_dos(ts("1979-12-31T23:59:59Z"))), DOS_EPOCH);
        assert_eq!(to_unix(to_dos(ts("2200-06-01T00:00:00Z"))), DOS_MAX);
        assert_eq!(clamp(ts("2023-03-29T13:02:10.750Z")), ts("2023-03-29T13:02:10Z"));
    }

    #[test]
    fn invalid_fields_fall_back_to_epoch() {
        // Month zero, day zero.
        assert_eq!(to_unix(0), DOS_EPOCH);
    }
}
