//! One handle over a field schema and a tenant's configuration.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use tracing::{debug, warn};

use crate::compile::compile;
use crate::config::{TenantConfig, DEFAULT_POLLING_TIME, POLLING_TIME_KEY};
use crate::macros::PollingMacros;
use crate::polling::{compute_effective_interval, parse_polling_time, PollingTime};
use crate::predicate::{Predicate, Record};
use crate::query::{parse, Node};
use crate::schema::FieldSchema;
use crate::suggest::SchemaOracle;
use crate::Result;

pub struct QueryEngine<C> {
    schema: FieldSchema,
    macros: PollingMacros<C>,
}

impl<C: TenantConfig> QueryEngine<C> {
    pub fn new(schema: FieldSchema, config: C) -> Self {
        Self {
            schema,
            macros: PollingMacros::new(config),
        }
    }

    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        self.macros = self.macros.with_clock(clock);
        self
    }

    pub fn schema(&self) -> &FieldSchema {
        &self.schema
    }

    pub fn config(&self) -> &C {
        self.macros.config()
    }

    /// Expand `${...}` placeholders.
    pub fn expand(&self, rsql: &str) -> String {
        self.macros.expand(rsql)
    }

    /// Expand placeholders, then parse.
    ///
    /// Error positions are character offsets into `rsql` as written; an
    /// error inside an expanded placeholder points at its `$`.
    pub fn parse(&self, rsql: &str) -> Result<Node> {
        let expanded = self.macros.expand_mapped(rsql);
        parse(&expanded.text).map_err(|mut e| {
            e.position = expanded.source_position(e.position);
            e.into()
        })
    }

    /// Expand placeholders, parse and compile against `entity_type`.
    ///
    /// Syntax error positions refer to `rsql` as written, see [`Self::parse`].
    pub fn compile(&self, entity_type: &str, rsql: &str) -> Result<Predicate> {
        let node = self.parse(rsql)?;
        let predicate = compile(&node, &self.schema, entity_type)?;
        debug!(entity_type, query = rsql, predicate = %predicate, "compiled query");
        Ok(predicate)
    }

    /// Whether `record` satisfies `rsql`.
    pub fn matches<R: Record + ?Sized>(&self, entity_type: &str, rsql: &str, record: &R) -> Result<bool> {
        Ok(self.compile(entity_type, rsql)?.matches(record))
    }

    /// Validation and completion for queries on `entity_type`.
    pub fn oracle(&self, entity_type: &str) -> SchemaOracle<'_> {
        SchemaOracle::new(&self.schema, entity_type)
    }

    /// The tenant's polling specification.
    pub fn polling_time(&self) -> Result<PollingTime> {
        let text = self
            .config()
            .get_string(POLLING_TIME_KEY)
            .unwrap_or_else(|| DEFAULT_POLLING_TIME.to_string());
        Ok(parse_polling_time(&text)?)
    }

    /// Effective polling interval for one entity: the first override whose
    /// query matches `record`, else the base, jittered and clamped.
    /// Overrides whose query fails to compile are skipped.
    pub fn polling_interval_for<R, G>(
        &self,
        entity_type: &str,
        record: &R,
        min: Duration,
        max: Duration,
        rng: &mut G,
    ) -> Result<Duration>
    where
        R: Record + ?Sized,
        G: Rng + ?Sized,
    {
        let polling = self.polling_time()?;
        let selected = polling.select(|query| match self.compile(entity_type, query) {
            Ok(predicate) => predicate.matches(record),
            Err(e) => {
                warn!(query, error = %e, "skipping polling override");
                false
            }
        });
        Ok(compute_effective_interval(selected, min, max, rng))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::POLLING_OVERDUE_TIME_KEY;
    use crate::predicate::Value;
    use crate::schema::FieldDescriptor;
    use crate::Error;
    use chrono::TimeZone;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashMap;

    const NOW_MS: i64 = 1_700_000_000_000;

    fn engine(polling_time: &str) -> QueryEngine<HashMap<String, String>> {
        let mut schema = FieldSchema::new();
        schema
            .register_field("target", "name", FieldDescriptor::text("name"))
            .register_field(
                "target",
                "updatestatus",
                FieldDescriptor::enumeration("updateStatus", ["error", "in_sync", "pending"]),
            )
            .register_field("target", "lastrequest", FieldDescriptor::number("lastTargetQuery"));
        let config: HashMap<String, String> = [
            (POLLING_TIME_KEY.to_string(), polling_time.to_string()),
            (POLLING_OVERDUE_TIME_KEY.to_string(), "00:05:00".to_string()),
        ]
        .into_iter()
        .collect();
        QueryEngine::new(schema, config).with_clock(|| Utc.timestamp_millis_opt(NOW_MS).unwrap())
    }

    fn target(status: &str, last_request: i64) -> HashMap<String, Value> {
        [
            ("name".to_string(), Value::from("dev1")),
            ("updateStatus".to_string(), Value::Enum(status.to_string())),
            ("lastTargetQuery".to_string(), Value::from(last_request)),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_compile_expands_macros() {
        let e = engine("00:05:00");
        let p = e.compile("target", "lastrequest=le=${overdue_ts}").unwrap();
        assert_eq!(p.to_string(), format!("LE(lastTargetQuery, {})", NOW_MS - 600_000));
    }

    #[test]
    fn test_overdue_match() {
        let e = engine("00:05:00");
        let query = "lastrequest=le=${overdue_ts}";
        assert!(e.matches("target", query, &target("in_sync", NOW_MS - 700_000)).unwrap());
        assert!(!e.matches("target", query, &target("in_sync", NOW_MS - 10_000)).unwrap());
    }

    #[test]
    fn test_errors_surface() {
        let e = engine("00:05:00");
        assert!(matches!(e.compile("target", "name=="), Err(Error::Parse(_))));
        assert!(matches!(e.compile("target", "bogus==1"), Err(Error::Compile(_))));
    }

    #[test]
    fn test_error_position_refers_to_unexpanded_query() {
        let e = engine("00:05:00");
        let query = "lastrequest=le=${now_ts};name==";
        match e.parse(query) {
            Err(Error::Parse(err)) => assert_eq!(err.position, query.chars().count()),
            other => panic!("expected a parse error, got {:?}", other),
        }
        match e.compile("target", "lastrequest=le=${now_ts};name=foo=x") {
            Err(Error::Parse(err)) => assert_eq!(err.position, 29),
            other => panic!("expected a parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_polling_interval_first_matching_override() {
        let e = engine("00:05:00, updatestatus==pending -> 00:01:00, name==dev* -> 00:02:00");
        let mut rng = StdRng::seed_from_u64(0);
        let max = Duration::from_secs(3600);

        let pending = target("pending", 0);
        assert_eq!(
            e.polling_interval_for("target", &pending, Duration::ZERO, max, &mut rng).unwrap(),
            Duration::from_secs(60)
        );
        let synced = target("in_sync", 0);
        assert_eq!(
            e.polling_interval_for("target", &synced, Duration::ZERO, max, &mut rng).unwrap(),
            Duration::from_secs(120)
        );
    }

    #[test]
    fn test_polling_interval_skips_broken_override() {
        let e = engine("00:05:00, bogus==1 -> 00:01:00");
        let mut rng = StdRng::seed_from_u64(0);
        let d = e
            .polling_interval_for("target", &target("pending", 0), Duration::ZERO, Duration::MAX, &mut rng)
            .unwrap();
        assert_eq!(d, Duration::from_secs(300));
    }

    #[test]
    fn test_invalid_polling_time() {
        let e = engine("sometimes");
        assert!(matches!(e.polling_time(), Err(Error::Interval(_))));
    }

    #[test]
    fn test_oracle_uses_schema() {
        let e = engine("00:05:00");
        use crate::suggest::{ValidationOracle, ValidationOutcome};
        assert_eq!(e.oracle("target").suggest("name==x", -1), ValidationOutcome::Valid);
    }
}
