//! Conversion between calendar time and the timer's 4-byte clock value.
//!
//! The timer stores every timestamp as an unsigned 32-bit count of seconds.
//! The vendor app produces that value by shifting unix time back by roughly
//! thirty years and by the difference between the China Standard Time
//! offset and the phone's standard offset. The timer and the vendor app
//! both key watering off this value, so the shift is reproduced exactly.

use chrono::{DateTime, Offset, TimeZone, Utc};
use chrono_tz::{OffsetComponents, Tz};
use tracing::warn;

/// Zone the vendor shift is measured against.
pub const ANCHOR_TIMEZONE: Tz = chrono_tz::Asia::Shanghai;

/// Fixed part of the vendor shift, in seconds.
pub const EPOCH_SHIFT_SECONDS: i64 = 946_656_000;

/// Result of a shift computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeShift {
    /// Seconds to add to unix time to get the device value.
    pub seconds: i64,
    /// The target zone could not be resolved and `seconds` is 0.
    /// Schedules must not be computed from a degraded shift.
    pub degraded: bool,
}

/// Encoder/decoder for the device clock in a given local timezone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestampCodec {
    timezone: Option<Tz>,
}

impl Default for TimestampCodec {
    fn default() -> Self {
        Self::new(Tz::UTC)
    }
}

/// UTC offset of `tz` at `at` with any daylight saving delta removed.
fn standard_offset_seconds(tz: Tz, at: DateTime<Utc>) -> i64 {
    let offset = tz.offset_from_utc_datetime(&at.naive_utc());
    i64::from(offset.fix().local_minus_utc()) - offset.dst_offset().num_seconds()
}

impl TimestampCodec {
    /// Create a codec for a resolved timezone.
    pub fn new(timezone: Tz) -> Self {
        Self {
            timezone: Some(timezone),
        }
    }

    /// Create a codec from an IANA zone name.
    ///
    /// An unknown name yields a degraded codec with a zero shift rather than
    /// an error, so records can still be decoded; see [`TimeShift::degraded`].
    pub fn from_name(name: &str) -> Self {
        match name.parse::<Tz>() {
            Ok(tz) => Self::new(tz),
            Err(_) => {
                warn!(timezone = name, "Unknown timezone, device clock shift degraded to 0");
                Self { timezone: None }
            }
        }
    }

    /// The zone local times are expressed in. Degraded codecs use UTC.
    pub fn timezone(&self) -> Tz {
        self.timezone.unwrap_or(Tz::UTC)
    }

    /// Whether the zone failed to resolve.
    pub fn is_degraded(&self) -> bool {
        self.timezone.is_none()
    }

    /// Compute the shift using zone offsets in effect at `at`.
    pub fn time_shift_at(&self, at: DateTime<Utc>) -> TimeShift {
        let Some(tz) = self.timezone else {
            return TimeShift {
                seconds: 0,
                degraded: true,
            };
        };

        let base_offset = standard_offset_seconds(ANCHOR_TIMEZONE, at);
        let local_offset = standard_offset_seconds(tz, at);

        TimeShift {
            seconds: -(base_offset - local_offset) - EPOCH_SHIFT_SECONDS,
            degraded: false,
        }
    }

    /// Compute the shift using zone offsets in effect now.
    pub fn time_shift(&self) -> TimeShift {
        self.time_shift_at(Utc::now())
    }

    /// Encode an instant as a device clock value, saturating at the `u32`
    /// bounds.
    pub fn encode<Z: TimeZone>(&self, instant: &DateTime<Z>) -> u32 {
        let raw = instant.timestamp() + self.time_shift().seconds;
        raw.clamp(0, i64::from(u32::MAX)) as u32
    }

    /// Encode the current time.
    pub fn encode_now(&self) -> u32 {
        self.encode(&Utc::now())
    }

    /// Big-endian bytes of the current time for the clock sync endpoint.
    pub fn current_time_bytes(&self) -> [u8; 4] {
        self.encode_now().to_be_bytes()
    }

    /// Decode a device clock value into local time. Zero means "unset".
    pub fn decode(&self, raw: u32) -> Option<DateTime<Tz>> {
        if raw == 0 {
            return None;
        }
        let unix = i64::from(raw) - self.time_shift().seconds;
        Utc.timestamp_opt(unix, 0)
            .single()
            .map(|utc| utc.with_timezone(&self.timezone()))
    }

    /// Decode a device clock value into unix seconds. Zero stays zero.
    pub fn decode_unix_seconds(&self, raw: u32) -> i64 {
        self.decode(raw).map_or(0, |t| t.timestamp())
    }

    /// Current time in the codec's zone.
    pub fn local_now(&self) -> DateTime<Tz> {
        Utc::now().with_timezone(&self.timezone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shift_for_utc() {
        let codec = TimestampCodec::new(Tz::UTC);
        let shift = codec.time_shift();
        assert!(!shift.degraded);
        // Shanghai is UTC+8 with no daylight saving.
        assert_eq!(shift.seconds, -28_800 - EPOCH_SHIFT_SECONDS);
    }

    #[test]
    fn test_offset_ignores_daylight_saving() {
        let detroit = TimestampCodec::new(chrono_tz::America::Detroit);
        let winter = Utc.with_ymd_and_hms(2022, 3, 11, 5, 0, 0).unwrap();
        let summer = Utc.with_ymd_and_hms(2022, 3, 14, 4, 0, 0).unwrap();

        // base_offset - local_offset = 28800 - (-18000) in both seasons.
        let expected = -46_800 - EPOCH_SHIFT_SECONDS;
        assert_eq!(detroit.time_shift_at(winter).seconds, expected);
        assert_eq!(detroit.time_shift_at(summer).seconds, expected);
    }

    #[test]
    fn test_encode_known_timestamp() {
        // 2022-03-11 00:00 in Detroit is 05:00 UTC.
        let instant = Utc.with_ymd_and_hms(2022, 3, 11, 5, 0, 0).unwrap();
        let codec = TimestampCodec::new(Tz::UTC);
        assert_eq!(codec.encode(&instant), 700_290_000);
    }

    #[test]
    fn test_decode_zero_is_unset() {
        let codec = TimestampCodec::default();
        assert!(codec.decode(0).is_none());
        assert_eq!(codec.decode_unix_seconds(0), 0);
    }

    #[test]
    fn test_round_trip() {
        let codec = TimestampCodec::new(chrono_tz::Europe::Berlin);
        let instant = chrono_tz::Europe::Berlin
            .with_ymd_and_hms(2023, 6, 5, 7, 30, 15)
            .unwrap();
        let raw = codec.encode(&instant);
        assert_eq!(codec.decode(raw).unwrap(), instant);
        assert_eq!(codec.decode_unix_seconds(raw), instant.timestamp());
    }

    #[test]
    fn test_encode_saturates_before_device_epoch() {
        let codec = TimestampCodec::new(Tz::UTC);
        let instant = Utc.with_ymd_and_hms(1990, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(codec.encode(&instant), 0);
    }

    #[test]
    fn test_unknown_timezone_is_degraded() {
        let codec = TimestampCodec::from_name("Mars/Olympus_Mons");
        assert!(codec.is_degraded());
        let shift = codec.time_shift();
        assert_eq!(shift.seconds, 0);
        assert!(shift.degraded);
        assert_eq!(codec.timezone(), Tz::UTC);
    }

    #[test]
    fn test_current_time_bytes_are_big_endian() {
        let codec = TimestampCodec::new(Tz::UTC);
        let before = codec.encode_now();
        let bytes = codec.current_time_bytes();
        let decoded = u32::from_be_bytes(bytes);
        assert!(decoded >= before && decoded - before < 5);
    }
}
