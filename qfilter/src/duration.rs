//! Duration text formats: `HH:mm:ss` and ISO-8601 (`PnDTnHnMn.nS`).

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

use crate::error::IntervalError;

fn hms_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d{2,}):([0-5]\d):([0-5]\d)$").expect("valid regex"))
}

fn iso_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^P(?:(\d+)D)?(?:T(?:(\d+)H)?(?:(\d+)M)?(?:(\d+)(?:\.(\d{1,9}))?S)?)?$")
            .expect("valid regex")
    })
}

/// Parse `HH:mm:ss` (hours may exceed 23) or an ISO-8601 duration.
pub fn parse_duration(text: &str) -> Result<Duration, IntervalError> {
    let text = text.trim();
    let invalid = || IntervalError::InvalidDuration(text.to_string());

    if let Some(caps) = hms_regex().captures(text) {
        let field = |i: usize| caps[i].parse::<u64>().map_err(|_| invalid());
        let (hours, minutes, seconds) = (field(1)?, field(2)?, field(3)?);
        let secs = hours
            .checked_mul(3600)
            .and_then(|h| h.checked_add(minutes * 60 + seconds))
            .ok_or_else(invalid)?;
        return Ok(Duration::from_secs(secs));
    }

    let caps = iso_regex().captures(text).ok_or_else(invalid)?;
    if caps.iter().skip(1).all(|c| c.is_none()) || text.to_ascii_uppercase().ends_with('T') {
        return Err(invalid());
    }
    let number = |i: usize| -> Result<u64, IntervalError> {
        caps.get(i)
            .map_or(Ok(0), |m| m.as_str().parse::<u64>().map_err(|_| invalid()))
    };

    let secs = [(1, 86_400u64), (2, 3_600), (3, 60), (4, 1)]
        .into_iter()
        .try_fold(0u64, |acc, (i, unit)| {
            number(i)?
                .checked_mul(unit)
                .and_then(|v| acc.checked_add(v))
                .ok_or_else(invalid)
        })?;
    let nanos = match caps.get(5) {
        Some(m) => {
            let digits = m.as_str();
            let value: u32 = digits.parse().map_err(|_| invalid())?;
            value * 10u32.pow(9 - digits.len() as u32)
        }
        None => 0,
    };
    Ok(Duration::new(secs, nanos))
}

/// Format as `HH:mm:ss`, dropping sub-second precision.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}
