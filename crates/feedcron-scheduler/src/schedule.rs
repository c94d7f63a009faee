use chrono::{
    DateTime, Days, Duration, FixedOffset, Months, NaiveDateTime, NaiveTime, Offset, TimeZone, Utc,
};
use chrono_tz::Tz;
use feedcron_core::config::SchedulerConfig;
use feedcron_core::types::parse_offset;
use feedcron_core::Frequency;
use tracing::warn;

use crate::error::{Result, SchedulerError};

/// Which timezone a wall-clock time is read in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Zone {
    /// The timezone tenants configure their start times in.
    Configured,
    /// The process-wide default timezone.
    Default,
}

/// A timezone as configured: an IANA name or a fixed UTC offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneSpec {
    Named(Tz),
    Fixed(FixedOffset),
}

impl ZoneSpec {
    /// Parse `"UTC"`, `"+02:00"`, `"-0530"` or a name such as `"Europe/Madrid"`.
    pub fn parse(s: &str) -> Result<Self> {
        if let Ok(offset) = parse_offset(s) {
            return Ok(ZoneSpec::Fixed(offset));
        }
        s.trim()
            .parse::<Tz>()
            .map(ZoneSpec::Named)
            .map_err(|e| SchedulerError::Configuration(format!("unknown timezone {s:?}: {e}")))
    }

    /// Wall-clock reading of `at` in this zone.
    pub fn local(&self, at: DateTime<Utc>) -> NaiveDateTime {
        match self {
            ZoneSpec::Named(tz) => at.with_timezone(tz).naive_local(),
            ZoneSpec::Fixed(offset) => at.with_timezone(offset).naive_local(),
        }
    }

    /// The instant a wall-clock time denotes in this zone.
    ///
    /// An ambiguous time (clocks turned back) resolves to its earlier
    /// instant. A time skipped by a forward change is read one hour later,
    /// the way the wall clock itself jumps.
    pub fn resolve(&self, local: NaiveDateTime) -> DateTime<FixedOffset> {
        match self {
            ZoneSpec::Named(tz) => tz
                .from_local_datetime(&local)
                .earliest()
                .or_else(|| tz.from_local_datetime(&(local + Duration::hours(1))).earliest())
                .map(|t| t.fixed_offset())
                .unwrap_or_else(|| tz.from_utc_datetime(&local).fixed_offset()),
            ZoneSpec::Fixed(offset) => {
                let utc = local - Duration::seconds(i64::from(offset.local_minus_utc()));
                DateTime::from_naive_utc_and_offset(utc, *offset)
            }
        }
    }
}

/// The two zones wall-clock arithmetic can be anchored to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Zones {
    pub configured: ZoneSpec,
    pub default: ZoneSpec,
}

impl Zones {
    pub fn utc() -> Self {
        let utc = ZoneSpec::Fixed(Utc.fix());
        Self {
            configured: utc,
            default: utc,
        }
    }

    pub fn from_config(config: &SchedulerConfig) -> Result<Self> {
        Ok(Self {
            configured: ZoneSpec::parse(&config.timezone)?,
            default: ZoneSpec::parse(&config.default_timezone)?,
        })
    }

    pub fn spec(&self, zone: Zone) -> ZoneSpec {
        match zone {
            Zone::Configured => self.configured,
            Zone::Default => self.default,
        }
    }

    /// [`advance_if_past`] on the wall clock of `zone`, so a daily 09:00
    /// start stays at 09:00 local across daylight-saving changes.
    pub fn advance_in_zone(
        &self,
        zone: Zone,
        instant: DateTime<FixedOffset>,
        frequency: &Frequency,
        now: DateTime<Utc>,
    ) -> DateTime<FixedOffset> {
        if instant >= now {
            return instant;
        }
        let spec = self.spec(zone);
        let local = spec.local(instant.with_timezone(&Utc));
        match step_local(local, frequency) {
            Some(next) => spec.resolve(next),
            None => instant,
        }
    }
}

/// Build an absolute instant from a time of day on `anchor`'s calendar date.
///
/// The calendar date is taken in `zone`, and components larger than their
/// unit carry over: minute 75 is 1h15m past the hour, hour 25 is 1am the
/// following day.
pub fn compose_instant(
    zones: &Zones,
    hour: u32,
    minute: u32,
    second: u32,
    zone: Zone,
    anchor: DateTime<Utc>,
) -> DateTime<FixedOffset> {
    let spec = zones.spec(zone);
    let midnight = spec.local(anchor).date().and_time(NaiveTime::MIN);
    let local = midnight
        + Duration::hours(i64::from(hour))
        + Duration::minutes(i64::from(minute))
        + Duration::seconds(i64::from(second));
    spec.resolve(local)
}

/// Roll `instant` forward by one `frequency` period if it lies before `now`.
///
/// An instant equal to `now` is not past. Months are added on the local
/// calendar, clamping to the last day of shorter months (Jan 31 → Feb 28/29).
/// Unknown frequencies leave the instant untouched.
pub fn advance_if_past<Z: TimeZone>(
    instant: DateTime<Z>,
    frequency: &Frequency,
    now: DateTime<Utc>,
) -> DateTime<Z> {
    if instant >= now {
        return instant;
    }
    step_local(instant.naive_local(), frequency)
        .and_then(|next| instant.timezone().from_local_datetime(&next).earliest())
        .unwrap_or(instant)
}

fn step_local(local: NaiveDateTime, frequency: &Frequency) -> Option<NaiveDateTime> {
    match frequency {
        Frequency::Daily => local.checked_add_days(Days::new(1)),
        Frequency::Weekly => local.checked_add_days(Days::new(7)),
        Frequency::Monthly => local.checked_add_months(Months::new(1)),
        Frequency::Unknown(raw) => {
            warn!(frequency = %raw, "unknown feed frequency; schedule date left as is");
            None
        }
    }
}
