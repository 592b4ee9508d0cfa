//! `${name}` placeholder expansion, applied to query text before parsing.
//!
//! - `${now_ts}`: current time in epoch milliseconds
//! - `${overdue_ts}`: `now_ts` minus the tenant's polling interval and
//!   overdue grace period, in epoch milliseconds
//! - `$$` produces a literal `$`, so `$${now_ts}` stays unexpanded
//!
//! Names ignore case. Unknown names expand to an empty string.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::config::{
    TenantConfig, DEFAULT_POLLING_OVERDUE_TIME, DEFAULT_POLLING_TIME, POLLING_OVERDUE_TIME_KEY,
    POLLING_TIME_KEY,
};
use crate::duration::parse_duration;
use crate::polling::parse_polling_time;

pub const NOW_TS: &str = "now_ts";
pub const OVERDUE_TS: &str = "overdue_ts";

/// Expand every `${name}` in `text` using `lookup`.
///
/// An unterminated `${` is left as written.
pub fn expand<F>(text: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    expand_mapped(text, lookup).text
}

/// Expanded text that remembers where each character came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Expanded {
    pub text: String,
    /// Source character offset per expanded character, plus one for the end
    origins: Vec<usize>,
}

impl Expanded {
    /// Character offset in the unexpanded text for a character offset in
    /// the expanded one. Characters produced by a placeholder map to its `$`.
    pub fn source_position(&self, position: usize) -> usize {
        self.origins
            .get(position)
            .or_else(|| self.origins.last())
            .copied()
            .unwrap_or(0)
    }

    /// Append source text verbatim; returns its length in characters.
    fn copy(&mut self, source: &str, start: usize) -> usize {
        let mut count = 0;
        for c in source.chars() {
            self.text.push(c);
            self.origins.push(start + count);
            count += 1;
        }
        count
    }

    /// Append replacement text attributed to one source offset.
    fn emit(&mut self, replacement: &str, origin: usize) {
        for c in replacement.chars() {
            self.text.push(c);
            self.origins.push(origin);
        }
    }
}

/// Like [`expand`], keeping a map back to the source offsets.
pub fn expand_mapped<F>(text: &str, lookup: F) -> Expanded
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = Expanded {
        text: String::with_capacity(text.len()),
        origins: Vec::with_capacity(text.len() + 1),
    };
    let mut rest = text;
    let mut offset = 0;

    while let Some(idx) = rest.find('$') {
        offset += out.copy(&rest[..idx], offset);
        let tail = &rest[idx..];

        if let Some(after) = tail.strip_prefix("$$") {
            out.emit("$", offset);
            offset += 2;
            rest = after;
        } else if let Some(body) = tail.strip_prefix("${") {
            match body.find('}') {
                Some(end) => {
                    let name = body[..end].trim();
                    if let Some(value) = lookup(name) {
                        out.emit(&value, offset);
                    }
                    offset += body[..end].chars().count() + 3;
                    rest = &body[end + 1..];
                }
                None => {
                    offset += out.copy(tail, offset);
                    rest = "";
                }
            }
        } else {
            out.emit("$", offset);
            offset += 1;
            rest = &tail[1..];
        }
    }
    offset += out.copy(rest, offset);
    out.origins.push(offset);
    out
}

/// Resolves the builtin time placeholders from a clock and tenant config.
///
/// Every lookup reads the clock and configuration afresh.
pub struct PollingMacros<C> {
    config: C,
    clock: Box<dyn Fn() -> DateTime<Utc> + Send + Sync>,
}

impl<C: TenantConfig> PollingMacros<C> {
    pub fn new(config: C) -> Self {
        Self {
            config,
            clock: Box::new(Utc::now),
        }
    }

    /// Replace the clock, e.g. with a fixed instant in tests.
    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        self.clock = Box::new(clock);
        self
    }

    pub fn config(&self) -> &C {
        &self.config
    }

    /// Value of a builtin placeholder, `None` for unknown names.
    pub fn lookup(&self, name: &str) -> Option<String> {
        let now = (self.clock)().timestamp_millis();
        if name.eq_ignore_ascii_case(NOW_TS) {
            Some(now.to_string())
        } else if name.eq_ignore_ascii_case(OVERDUE_TS) {
            let lag = self.polling_interval() + self.overdue_interval();
            let lag_ms = i64::try_from(lag.as_millis()).unwrap_or(i64::MAX);
            Some(now.saturating_sub(lag_ms).to_string())
        } else {
            None
        }
    }

    /// Expand placeholders in `text`.
    pub fn expand(&self, text: &str) -> String {
        expand(text, |name| self.lookup(name))
    }

    pub fn expand_mapped(&self, text: &str) -> Expanded {
        expand_mapped(text, |name| self.lookup(name))
    }

    /// Base interval of the tenant's polling specification.
    fn polling_interval(&self) -> Duration {
        let text = self
            .config
            .get_string(POLLING_TIME_KEY)
            .unwrap_or_else(|| DEFAULT_POLLING_TIME.to_string());
        match parse_polling_time(&text) {
            Ok(polling) => polling.base.interval,
            Err(e) => {
                warn!(value = %text, error = %e, "invalid polling time, using default");
                fallback(DEFAULT_POLLING_TIME)
            }
        }
    }

    fn overdue_interval(&self) -> Duration {
        let text = self
            .config
            .get_string(POLLING_OVERDUE_TIME_KEY)
            .unwrap_or_else(|| DEFAULT_POLLING_OVERDUE_TIME.to_string());
        parse_duration(&text).unwrap_or_else(|e| {
            warn!(value = %text, error = %e, "invalid polling overdue time, using default");
            fallback(DEFAULT_POLLING_OVERDUE_TIME)
        })
    }
}

fn fallback(default: &str) -> Duration {
    parse_duration(default).unwrap_or(Duration::from_secs(300))
}

/// Stand-in values for validating queries without a clock or tenant:
/// builtin placeholders become `0`, a valid epoch timestamp.
pub fn placeholder_stand_in(name: &str) -> Option<String> {
    (name.eq_ignore_ascii_case(NOW_TS) || name.eq_ignore_ascii_case(OVERDUE_TS)).then(|| "0".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::HashMap;

    fn fixed_now() -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_000_000).unwrap()
    }

    fn macros(pairs: &[(&str, &str)]) -> PollingMacros<HashMap<String, String>> {
        let config = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        PollingMacros::new(config).with_clock(fixed_now)
    }

    #[test]
    fn test_expand_basic() {
        let out = expand("a==${x};b==${Y}", |name| match name {
            "x" => Some("1".to_string()),
            "Y" => Some("2".to_string()),
            _ => None,
        });
        assert_eq!(out, "a==1;b==2");
    }

    #[test]
    fn test_unresolved_is_empty() {
        assert_eq!(expand("a==${missing}x", |_| None), "a==x");
    }

    #[test]
    fn test_dollar_escape() {
        assert_eq!(expand("a==$${now_ts}", |_| Some("1".to_string())), "a==${now_ts}");
        assert_eq!(expand("cost==$$5", |_| None), "cost==$5");
        assert_eq!(expand("cost==$5", |_| None), "cost==$5");
    }

    #[test]
    fn test_unterminated_placeholder_is_kept() {
        assert_eq!(expand("a==${now_ts", |_| Some("1".to_string())), "a==${now_ts");
    }

    #[test]
    fn test_source_positions() {
        let out = expand_mapped("a==${x};b==$$c", |_| Some("12345".to_string()));
        assert_eq!(out.text, "a==12345;b==$c");
        assert_eq!(out.source_position(2), 2);
        assert_eq!(out.source_position(3), 3);
        assert_eq!(out.source_position(7), 3);
        assert_eq!(out.source_position(8), 7);
        assert_eq!(out.source_position(12), 11);
        assert_eq!(out.source_position(13), 13);
        assert_eq!(out.source_position(14), 14);
        assert_eq!(out.source_position(99), 14);
    }

    #[test]
    fn test_source_positions_after_empty_expansion() {
        let out = expand_mapped("ä${gone}==", |_| None);
        assert_eq!(out.text, "ä==");
        assert_eq!(out.source_position(1), 8);
        assert_eq!(out.source_position(3), 10);
    }

    #[test]
    fn test_now_ts() {
        let m = macros(&[]);
        assert_eq!(m.expand("t==${NOW_TS}"), "t==1700000000000");
    }

    #[test]
    fn test_overdue_ts_uses_config() {
        let m = macros(&[(POLLING_TIME_KEY, "00:01:00~10%, a==b -> 00:00:10"), (POLLING_OVERDUE_TIME_KEY, "00:00:30")]);
        let expected = 1_700_000_000_000i64 - 60_000 - 30_000;
        assert_eq!(m.expand("t=le=${overdue_ts}"), format!("t=le={}", expected));
    }

    #[test]
    fn test_overdue_ts_defaults() {
        let m = macros(&[]);
        let expected = 1_700_000_000_000i64 - 300_000 - 300_000;
        assert_eq!(m.lookup("overdue_ts"), Some(expected.to_string()));
    }

    #[test]
    fn test_overdue_ts_falls_back_on_bad_config() {
        let m = macros(&[(POLLING_TIME_KEY, "whenever")]);
        let expected = 1_700_000_000_000i64 - 300_000 - 300_000;
        assert_eq!(m.lookup("overdue_ts"), Some(expected.to_string()));
    }

    #[test]
    fn test_clock_is_read_per_lookup() {
        use std::sync::atomic::{AtomicI64, Ordering};
        use std::sync::Arc;

        let now = Arc::new(AtomicI64::new(1_000_000));
        let clock_now = Arc::clone(&now);
        let m = PollingMacros::new(|_: &str| -> Option<String> { None }).with_clock(move || {
            Utc.timestamp_millis_opt(clock_now.load(Ordering::SeqCst)).unwrap()
        });
        assert_eq!(m.lookup("now_ts"), Some("1000000".to_string()));
        now.store(2_000_000, Ordering::SeqCst);
        assert_eq!(m.lookup("now_ts"), Some("2000000".to_string()));
    }

    #[test]
    fn test_placeholder_stand_in() {
        assert_eq!(expand("t<${Overdue_TS}", placeholder_stand_in), "t<0");
        assert_eq!(expand("t<${other}", placeholder_stand_in), "t<");
    }
}
