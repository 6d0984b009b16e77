//! Periodic watering schedule ("frequency") for a single valve.
//!
//! A frequency is three numbers on the wire: a start time in device clock
//! units, a duration in minutes and a repeat interval in hours. Only the
//! hour and minute of the start time are reliable; the date the timer
//! reports is not, so schedules are always anchored on today's date.

use std::fmt;

use chrono::{DateTime, NaiveDateTime, NaiveTime, TimeDelta, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

use melnor_types::{FrequencyRecord, ParseResult};

use crate::timestamp::TimestampCodec;

/// Longest watering duration the vendor app accepts.
pub const MAX_DURATION_MINUTES: u16 = 360;

/// Longest repeat interval the vendor app accepts (one week).
pub const MAX_INTERVAL_HOURS: u8 = 168;

/// Duration assigned to a new valve.
pub const DEFAULT_DURATION_MINUTES: u16 = 10;

/// Interval assigned to a new valve.
pub const DEFAULT_INTERVAL_HOURS: u8 = 24;

/// A valve's periodic schedule and the watering window derived from it.
#[derive(Debug, Clone, PartialEq)]
pub struct Frequency {
    codec: TimestampCodec,
    raw_start_time: u32,
    duration_minutes: u16,
    interval_hours: u8,
    next_run_time: Option<DateTime<Tz>>,
    is_watering: bool,
    schedule_end: Option<DateTime<Tz>>,
}

impl Frequency {
    /// Create a schedule starting now with the default duration and interval.
    ///
    /// Derived fields stay empty until an input changes or the schedule is
    /// refreshed from the device.
    pub fn new(codec: TimestampCodec) -> Self {
        Self {
            codec,
            raw_start_time: codec.encode_now(),
            duration_minutes: DEFAULT_DURATION_MINUTES,
            interval_hours: DEFAULT_INTERVAL_HOURS,
            next_run_time: None,
            is_watering: false,
            schedule_end: None,
        }
    }

    /// Raw start time in device clock units.
    pub fn raw_start_time(&self) -> u32 {
        self.raw_start_time
    }

    /// Watering duration in minutes.
    pub fn duration_minutes(&self) -> u16 {
        self.duration_minutes
    }

    /// Repeat interval in hours.
    pub fn interval_hours(&self) -> u8 {
        self.interval_hours
    }

    /// Start of the current or next watering window.
    pub fn next_run_time(&self) -> Option<DateTime<Tz>> {
        self.next_run_time
    }

    /// Whether the schedule is inside a watering window.
    pub fn is_watering(&self) -> bool {
        self.is_watering
    }

    /// End of the current or next watering window.
    pub fn schedule_end(&self) -> Option<DateTime<Tz>> {
        self.schedule_end
    }

    /// Hour and minute the schedule starts at, or `None` when unset.
    pub fn start_time(&self) -> Option<NaiveTime> {
        let start = self.codec.decode(self.raw_start_time)?;
        NaiveTime::from_hms_opt(start.hour(), start.minute(), 0)
    }

    /// Set the watering duration, clamped to [`MAX_DURATION_MINUTES`].
    pub fn set_duration_minutes(&mut self, minutes: u16) {
        self.duration_minutes = minutes.min(MAX_DURATION_MINUTES);
        self.recompute();
    }

    /// Set the repeat interval, clamped to [`MAX_INTERVAL_HOURS`].
    pub fn set_interval_hours(&mut self, hours: u8) {
        self.interval_hours = hours.min(MAX_INTERVAL_HOURS);
        self.recompute();
    }

    /// Set the start hour and minute.
    ///
    /// The date already encoded in the raw start time is kept; an unset start
    /// time takes today's date.
    pub fn set_start_time(&mut self, time: NaiveTime) {
        let date = self
            .codec
            .decode(self.raw_start_time)
            .unwrap_or_else(|| self.codec.local_now())
            .date_naive();
        let naive = date.and_time(NaiveTime::from_hms_opt(time.hour(), time.minute(), 0).unwrap_or(time));

        if let Some(local) = resolve_local(self.codec.timezone(), naive) {
            self.raw_start_time = self.codec.encode(&local);
        }
        self.recompute();
    }

    /// Replace all inputs with a record read from the device.
    pub fn apply_record(&mut self, record: FrequencyRecord) {
        self.raw_start_time = record.raw_start_time;
        self.duration_minutes = record.duration_minutes;
        self.interval_hours = record.interval_hours;
        self.recompute();
    }

    /// Decode the 8-byte frequency record and apply it.
    ///
    /// A malformed record leaves the schedule untouched.
    pub fn update_from_bytes(&mut self, data: &[u8]) -> ParseResult<()> {
        let record = FrequencyRecord::from_bytes(data)?;
        self.apply_record(record);
        Ok(())
    }

    /// The inputs as a wire record.
    pub fn record(&self) -> FrequencyRecord {
        FrequencyRecord {
            raw_start_time: self.raw_start_time,
            duration_minutes: self.duration_minutes,
            interval_hours: self.interval_hours,
        }
    }

    /// Encode for the valve's frequency endpoint.
    pub fn to_bytes(&self) -> [u8; melnor_types::types::FREQUENCY_BYTES] {
        self.record().to_bytes()
    }

    /// Recompute the derived window against the current time.
    pub fn recompute(&mut self) {
        self.recompute_at(Utc::now());
    }

    /// Recompute the derived window as seen at `now`.
    pub fn recompute_at(&mut self, now: DateTime<Utc>) {
        self.clear_derived();

        // A zero interval would never advance the candidate below.
        if self.raw_start_time == 0
            || self.interval_hours == 0
            || self.duration_minutes == 0
            || self.codec.is_degraded()
        {
            return;
        }

        let Some(start) = self.codec.decode(self.raw_start_time) else {
            return;
        };

        let tz = self.codec.timezone();
        let now = now.with_timezone(&tz);
        let Some(anchor) = now
            .date_naive()
            .and_hms_opt(start.hour(), start.minute(), 0)
            .and_then(|naive| resolve_local(tz, naive))
        else {
            return;
        };

        let duration = TimeDelta::minutes(i64::from(self.duration_minutes));
        let interval = TimeDelta::hours(i64::from(self.interval_hours));

        let mut candidate = anchor;
        while candidate < now {
            let end = candidate + duration;
            if now < end {
                self.is_watering = true;
                self.next_run_time = Some(candidate);
                self.schedule_end = Some(end);
                return;
            }
            candidate += interval;
        }

        self.next_run_time = Some(candidate);
        self.schedule_end = Some(candidate + duration);
    }

    fn clear_derived(&mut self) {
        self.next_run_time = None;
        self.is_watering = false;
        self.schedule_end = None;
    }
}

/// Resolve a wall-clock time, preferring the earlier instant when it is
/// ambiguous and skipping forward an hour when it falls in a DST gap.
fn resolve_local(tz: Tz, naive: NaiveDateTime) -> Option<DateTime<Tz>> {
    tz.from_local_datetime(&naive)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(naive + TimeDelta::hours(1))).earliest())
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.next_run_time {
            Some(next) => write!(f, "Next run time: {}", next.format("%Y-%m-%d %H:%M"))?,
            None => write!(f, "Next run time: none")?,
        }
        write!(
            f,
            " (Frequency: {} hours, Duration: {} minutes)",
            self.interval_hours, self.duration_minutes
        )?;
        if let (true, Some(end)) = (self.is_watering, self.schedule_end) {
            write!(f, " (Watering ends at {})", end.format("%H:%M"))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 6, day, hour, minute, 0).unwrap()
    }

    fn scheduled(duration: u16, interval: u8, start: DateTime<Utc>) -> Frequency {
        let codec = TimestampCodec::new(Tz::UTC);
        let mut frequency = Frequency::new(codec);
        frequency.apply_record(FrequencyRecord {
            raw_start_time: codec.encode(&start),
            duration_minutes: duration,
            interval_hours: interval,
        });
        frequency
    }

    #[test]
    fn test_zero_state() {
        let frequency = Frequency::new(TimestampCodec::default());
        assert_eq!(frequency.duration_minutes(), 10);
        assert_eq!(frequency.interval_hours(), 24);
        assert!(frequency.next_run_time().is_none());
        assert!(!frequency.is_watering());
        assert_ne!(frequency.raw_start_time(), 0);
    }

    #[test]
    fn test_schedule_currently_running() {
        let mut frequency = scheduled(10, 6, utc(5, 0, 0));
        frequency.recompute_at(utc(5, 0, 5));

        assert!(frequency.is_watering());
        assert_eq!(frequency.next_run_time().unwrap(), utc(5, 0, 0));
        assert_eq!(frequency.schedule_end().unwrap(), utc(5, 0, 10));
    }

    #[test]
    fn test_schedule_not_running() {
        let mut frequency = scheduled(10, 6, utc(5, 0, 0));
        frequency.recompute_at(utc(5, 1, 0));

        assert!(!frequency.is_watering());
        assert_eq!(frequency.next_run_time().unwrap(), utc(5, 6, 0));
        assert_eq!(frequency.schedule_end().unwrap(), utc(5, 6, 10));
    }

    #[test]
    fn test_stale_device_date_is_ignored() {
        // Start date years in the past; only 00:00 matters.
        let mut frequency = scheduled(10, 6, Utc.with_ymd_and_hms(2001, 1, 1, 0, 0, 0).unwrap());
        frequency.recompute_at(utc(5, 13, 0));
        assert_eq!(frequency.next_run_time().unwrap(), utc(5, 18, 0));
    }

    #[test]
    fn test_anchor_later_today() {
        let mut frequency = scheduled(30, 24, utc(1, 23, 0));
        frequency.recompute_at(utc(5, 1, 0));
        assert!(!frequency.is_watering());
        assert_eq!(frequency.next_run_time().unwrap(), utc(5, 23, 0));
    }

    #[test]
    fn test_window_end_is_exclusive() {
        let mut frequency = scheduled(10, 6, utc(5, 0, 0));
        frequency.recompute_at(utc(5, 0, 10));
        assert!(!frequency.is_watering());
        assert_eq!(frequency.next_run_time().unwrap(), utc(5, 6, 0));
    }

    #[test]
    fn test_zero_inputs_mean_no_schedule() {
        for (duration, interval) in [(10, 0), (0, 6)] {
            let mut frequency = scheduled(duration, interval, utc(5, 0, 0));
            frequency.recompute_at(utc(5, 12, 0));
            assert!(frequency.next_run_time().is_none());
            assert!(!frequency.is_watering());
        }

        let mut frequency = Frequency::new(TimestampCodec::default());
        frequency.apply_record(FrequencyRecord {
            raw_start_time: 0,
            duration_minutes: 10,
            interval_hours: 6,
        });
        assert!(frequency.next_run_time().is_none());
        assert!(frequency.start_time().is_none());
    }

    #[test]
    fn test_degraded_codec_never_schedules() {
        let mut frequency = Frequency::new(TimestampCodec::from_name("Not/AZone"));
        frequency.apply_record(FrequencyRecord {
            raw_start_time: 700_290_000,
            duration_minutes: 10,
            interval_hours: 6,
        });
        assert!(frequency.next_run_time().is_none());
    }

    #[test]
    fn test_setters_clamp() {
        let mut frequency = Frequency::new(TimestampCodec::default());
        frequency.set_duration_minutes(500);
        assert_eq!(frequency.duration_minutes(), MAX_DURATION_MINUTES);
        frequency.set_interval_hours(200);
        assert_eq!(frequency.interval_hours(), MAX_INTERVAL_HOURS);
        frequency.set_interval_hours(12);
        assert_eq!(frequency.interval_hours(), 12);
    }

    #[test]
    fn test_set_start_time_keeps_encoded_date() {
        let mut frequency = scheduled(10, 6, utc(2, 9, 45));
        frequency.set_start_time(NaiveTime::from_hms_opt(0, 0, 0).unwrap());

        let codec = TimestampCodec::new(Tz::UTC);
        assert_eq!(frequency.raw_start_time(), codec.encode(&utc(2, 0, 0)));
        assert_eq!(
            frequency.start_time(),
            Some(NaiveTime::from_hms_opt(0, 0, 0).unwrap())
        );

        frequency.recompute_at(utc(5, 0, 5));
        assert!(frequency.is_watering());
        assert_eq!(frequency.schedule_end().unwrap(), utc(5, 0, 10));
    }

    #[test]
    fn test_start_time_drops_seconds() {
        let mut frequency = Frequency::new(TimestampCodec::default());
        frequency.set_start_time(NaiveTime::from_hms_opt(6, 30, 42).unwrap());
        assert_eq!(
            frequency.start_time(),
            Some(NaiveTime::from_hms_opt(6, 30, 0).unwrap())
        );
    }

    #[test]
    fn test_bytes_round_trip_through_schedule() {
        let source = scheduled(45, 12, utc(5, 7, 15));
        let mut target = Frequency::new(TimestampCodec::new(Tz::UTC));
        target.update_from_bytes(&source.to_bytes()).unwrap();
        assert_eq!(target.record(), source.record());
    }

    #[test]
    fn test_short_buffer_leaves_schedule_untouched() {
        let mut frequency = scheduled(45, 12, utc(5, 7, 15));
        let before = frequency.record();
        assert!(frequency.update_from_bytes(&[0, 1, 2, 3]).is_err());
        assert_eq!(frequency.record(), before);
    }

    #[test]
    fn test_display_mentions_watering_end() {
        let mut frequency = scheduled(10, 6, utc(5, 0, 0));
        frequency.recompute_at(utc(5, 0, 5));
        let text = frequency.to_string();
        assert!(text.contains("Frequency: 6 hours"));
        assert!(text.contains("Watering ends at 00:10"));
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// The next run never precedes today's anchor and sits a whole
        /// number of intervals after it.
        #[test]
        fn next_run_is_anchor_plus_intervals(
            duration in 1u16..=360,
            interval in 1u8..=168,
            hour in 0u32..24,
            minute in 0u32..60,
            now_secs in 0i64..86_400,
        ) {
            let codec = TimestampCodec::new(Tz::UTC);
            let start = Utc.with_ymd_and_hms(2023, 6, 1, hour, minute, 0).unwrap();
            let now = Utc.with_ymd_and_hms(2023, 6, 5, 0, 0, 0).unwrap() + TimeDelta::seconds(now_secs);
            let anchor = Utc.with_ymd_and_hms(2023, 6, 5, hour, minute, 0).unwrap();

            let mut frequency = Frequency::new(codec);
            frequency.apply_record(FrequencyRecord {
                raw_start_time: codec.encode(&start),
                duration_minutes: duration,
                interval_hours: interval,
            });
            frequency.recompute_at(now);

            let next = frequency.next_run_time().unwrap().with_timezone(&Utc);
            prop_assert!(next >= anchor);
            let offset = (next - anchor).num_seconds();
            prop_assert_eq!(offset % (i64::from(interval) * 3600), 0);
            if frequency.is_watering() {
                prop_assert!(next <= now && now < next + TimeDelta::minutes(i64::from(duration)));
            } else {
                prop_assert!(next >= now);
            }
        }
    }
}
