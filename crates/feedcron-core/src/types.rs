use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{FeedcronError, Result};

/// Identifies the store/tenant that owns a feed process (e.g. `"default"`, `"es"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantKey(pub String);

impl TenantKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for TenantKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TenantKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Wall-clock time of day at which a tenant's feed generation starts.
///
/// Accepts either `"HH:MM:SS"` / `"HH:MM"` strings or `[h, m, s]` arrays in
/// config files; always serialises as `"HH:MM:SS"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "TimeOfDayRepr", into = "String")]
pub struct TimeOfDay {
    pub hour: u32,
    pub minute: u32,
    pub second: u32,
}

impl TimeOfDay {
    pub fn new(hour: u32, minute: u32, second: u32) -> Result<Self> {
        if hour > 23 || minute > 59 || second > 59 {
            return Err(FeedcronError::InvalidTime(format!(
                "{hour:02}:{minute:02}:{second:02}"
            )));
        }
        Ok(Self {
            hour,
            minute,
            second,
        })
    }

    /// Midnight, the start time used when a tenant does not configure one.
    pub fn midnight() -> Self {
        Self {
            hour: 0,
            minute: 0,
            second: 0,
        }
    }
}

impl Default for TimeOfDay {
    fn default() -> Self {
        Self::midnight()
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}:{:02}", self.hour, self.minute, self.second)
    }
}

impl FromStr for TimeOfDay {
    type Err = FeedcronError;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.trim().split(':').collect();
        if parts.len() < 2 || parts.len() > 3 {
            return Err(FeedcronError::InvalidTime(s.to_string()));
        }
        let mut nums = [0u32; 3];
        for (slot, part) in nums.iter_mut().zip(&parts) {
            *slot = part
                .parse()
                .map_err(|_| FeedcronError::InvalidTime(s.to_string()))?;
        }
        Self::new(nums[0], nums[1], nums[2])
    }
}

impl From<TimeOfDay> for String {
    fn from(t: TimeOfDay) -> Self {
        t.to_string()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TimeOfDayRepr {
    Text(String),
    Parts(Vec<u32>),
}

impl TryFrom<TimeOfDayRepr> for TimeOfDay {
    type Error = FeedcronError;

    fn try_from(repr: TimeOfDayRepr) -> Result<Self> {
        match repr {
            TimeOfDayRepr::Text(s) => s.parse(),
            TimeOfDayRepr::Parts(parts) => match parts.as_slice() {
                [h, m] => Self::new(*h, *m, 0),
                [h, m, s] => Self::new(*h, *m, *s),
                _ => Err(FeedcronError::InvalidTime(format!("{parts:?}"))),
            },
        }
    }
}

/// How often a tenant's feed is regenerated.
///
/// Unrecognised values are kept as [`Frequency::Unknown`] instead of failing
/// config parsing; the schedule arithmetic treats them as "never advance".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Unknown(String),
}

impl Default for Frequency {
    fn default() -> Self {
        Frequency::Daily
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frequency::Daily => write!(f, "daily"),
            Frequency::Weekly => write!(f, "weekly"),
            Frequency::Monthly => write!(f, "monthly"),
            Frequency::Unknown(raw) => write!(f, "{raw}"),
        }
    }
}

impl From<String> for Frequency {
    fn from(s: String) -> Self {
        // Single-letter codes are what cron frequency selectors store.
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" | "d" => Frequency::Daily,
            "weekly" | "w" => Frequency::Weekly,
            "monthly" | "m" => Frequency::Monthly,
            _ => Frequency::Unknown(s),
        }
    }
}

impl From<&str> for Frequency {
    fn from(s: &str) -> Self {
        Frequency::from(s.to_string())
    }
}

impl From<Frequency> for String {
    fn from(f: Frequency) -> Self {
        f.to_string()
    }
}

/// Parse a timezone setting into a fixed UTC offset.
///
/// Accepts `"UTC"`, `"Z"` and signed offsets such as `"+02:00"` or `"-0530"`.
pub fn parse_offset(s: &str) -> Result<FixedOffset> {
    let trimmed = s.trim();
    if trimmed.eq_ignore_ascii_case("utc") || trimmed == "Z" || trimmed.is_empty() {
        return FixedOffset::east_opt(0)
            .ok_or_else(|| FeedcronError::InvalidTimezone(s.to_string()));
    }

    let (sign, rest) = match trimmed.as_bytes()[0] {
        b'+' => (1, &trimmed[1..]),
        b'-' => (-1, &trimmed[1..]),
        _ => return Err(FeedcronError::InvalidTimezone(s.to_string())),
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(FeedcronError::InvalidTimezone(s.to_string()));
    }
    let hours: i32 = digits[..2]
        .parse()
        .map_err(|_| FeedcronError::InvalidTimezone(s.to_string()))?;
    let minutes: i32 = digits[2..]
        .parse()
        .map_err(|_| FeedcronError::InvalidTimezone(s.to_string()))?;
    if minutes > 59 {
        return Err(FeedcronError::InvalidTimezone(s.to_string()));
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
        .ok_or_else(|| FeedcronError::InvalidTimezone(s.to_string()))
}
