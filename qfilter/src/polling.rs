//! Polling interval specifications.
//!
//! ```text
//! 00:05:00~10%, updatestatus==pending -> 00:01:00, type=in=(os,app);name==dev* -> PT30S~5%
//! ```
//!
//! The base interval comes first. Each override pairs a filter query with
//! the interval used for entities it matches; the first matching override
//! wins. Override queries may contain commas, so entries are delimited by
//! the `->` arrows rather than split on commas.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use rand::Rng;
use serde::{Serialize, Serializer};

use crate::duration::{format_duration, parse_duration};
use crate::error::IntervalError;

/// Lower clamp used when no minimum is configured.
pub const DEFAULT_MIN_POLLING: Duration = Duration::ZERO;

/// Upper clamp used when no maximum is configured: 100 years.
pub const DEFAULT_MAX_POLLING: Duration = Duration::from_secs(100 * 365 * 86_400);

/// An interval with an optional symmetric random deviation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PollingInterval {
    #[serde(serialize_with = "serialize_hms")]
    pub interval: Duration,
    /// Maximum deviation as a percentage of `interval`, 0..=99
    pub deviation_percent: u8,
}

fn serialize_hms<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_duration(*duration))
}

impl PollingInterval {
    pub fn new(interval: Duration, deviation_percent: u8) -> Self {
        Self {
            interval,
            deviation_percent,
        }
    }

    /// Parse `HH:mm:ss` or ISO-8601, optionally followed by `~N%`.
    pub fn parse(text: &str) -> Result<Self, IntervalError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(IntervalError::Empty);
        }
        let (duration, deviation) = match text.split_once('~') {
            Some((d, dev)) => (d, Some(dev.trim())),
            None => (text, None),
        };

        let deviation_percent = match deviation {
            None => 0,
            Some(dev) => dev
                .strip_suffix('%')
                .filter(|n| (1..=2).contains(&n.len()) && n.chars().all(|c| c.is_ascii_digit()))
                .and_then(|n| n.parse::<u8>().ok())
                .ok_or_else(|| IntervalError::InvalidDeviation(text.to_string()))?,
        };

        Ok(Self {
            interval: parse_duration(duration)?,
            deviation_percent,
        })
    }

    /// The jittered interval clamped to `[min, max]`.
    pub fn effective<R: Rng + ?Sized>(&self, min: Duration, max: Duration, rng: &mut R) -> Duration {
        compute_effective_interval(self, min, max, rng)
    }
}

impl fmt::Display for PollingInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", format_duration(self.interval))?;
        if self.deviation_percent > 0 {
            write!(f, "~{}%", self.deviation_percent)?;
        }
        Ok(())
    }
}

/// Interval used for entities matching `query`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PollingOverride {
    pub query: String,
    pub interval: PollingInterval,
}

/// A base interval plus ordered overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PollingTime {
    pub base: PollingInterval,
    pub overrides: Vec<PollingOverride>,
}

impl PollingTime {
    pub fn new(base: PollingInterval) -> Self {
        Self {
            base,
            overrides: Vec::new(),
        }
    }

    /// Interval of the first override whose query `matches` accepts, else the base.
    pub fn select<F>(&self, mut matches: F) -> &PollingInterval
    where
        F: FnMut(&str) -> bool,
    {
        self.overrides
            .iter()
            .find(|o| matches(&o.query))
            .map_or(&self.base, |o| &o.interval)
    }
}

impl FromStr for PollingTime {
    type Err = IntervalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_polling_time(s)
    }
}

impl fmt::Display for PollingTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.base)?;
        for o in &self.overrides {
            write!(f, ", {} -> {}", o.query, o.interval)?;
        }
        Ok(())
    }
}

/// Parse `base(, query -> interval)*`.
pub fn parse_polling_time(text: &str) -> Result<PollingTime, IntervalError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(IntervalError::Empty);
    }

    let Some(base_end) = text.find(',') else {
        return Ok(PollingTime::new(PollingInterval::parse(text)?));
    };
    let mut polling = PollingTime::new(PollingInterval::parse(&text[..base_end])?);

    let rest = &text[base_end + 1..];
    if rest.trim().is_empty() {
        return Err(IntervalError::InvalidOverride(String::new()));
    }

    let mut pos = 0;
    while pos < rest.len() {
        let remaining = &rest[pos..];
        let arrow = remaining
            .find("->")
            .ok_or_else(|| IntervalError::InvalidOverride(remaining.trim().to_string()))?;
        let query = remaining[..arrow].trim();
        if query.is_empty() {
            return Err(IntervalError::InvalidOverride(remaining.trim().to_string()));
        }

        // Intervals never contain commas, so the next comma ends this entry
        let after_arrow = arrow + 2;
        let interval_end = remaining[after_arrow..]
            .find(',')
            .map_or(remaining.len(), |i| after_arrow + i);
        let interval = PollingInterval::parse(&remaining[after_arrow..interval_end])?;
        if interval_end < remaining.len() && remaining[interval_end + 1..].trim().is_empty() {
            return Err(IntervalError::InvalidOverride(remaining.trim().to_string()));
        }

        polling.overrides.push(PollingOverride {
            query: query.to_string(),
            interval,
        });
        pos += interval_end + 1;
    }

    Ok(polling)
}

/// Apply the base interval's random deviation and clamp to `[min, max]`.
///
/// With no deviation the base interval is returned as-is, unclamped. When
/// `min > max`, `max` wins.
pub fn compute_effective_interval<R: Rng + ?Sized>(
    base: &PollingInterval,
    min: Duration,
    max: Duration,
    rng: &mut R,
) -> Duration {
    if base.deviation_percent == 0 {
        return base.interval;
    }

    let millis = i64::try_from(base.interval.as_millis()).unwrap_or(i64::MAX);
    let max_deviation = millis / 100 * i64::from(base.deviation_percent)
        + millis % 100 * i64::from(base.deviation_percent) / 100;
    let jitter = if max_deviation > 0 {
        rng.gen_range(-max_deviation..=max_deviation)
    } else {
        0
    };

    let jittered = Duration::from_millis(millis.saturating_add(jitter).max(0) as u64);
    jittered.max(min).min(max)
}
