//! CLI command implementations.

use std::collections::BTreeMap;
use std::io;

use qfilter::{
    parse, parse_polling_time, Config, FieldSchema, PollingTime, QueryEngine, Result, SchemaOracle, TenantConfig, ValidationOracle,
    ValidationOutcome, Value,
};
use serde::Serialize;
use tracing::debug;

use crate::domain;

/// Field schema from QFILTER_ROOT/schema.toml, or the built-in one.
fn load_schema(config: &Config) -> Result<FieldSchema> {
    let path = config.schema_path();
    if path.exists() {
        debug!(path = %path.display(), "loading field schema");
        FieldSchema::load(&path)
    } else {
        Ok(domain::builtin_schema())
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).map_err(io::Error::from)?;
    println!("{}", text);
    Ok(())
}

/// Record given as `-F path=value` pairs. Values stay text; comparisons
/// read them as numbers where the query value is numeric.
fn record(fields: &[(String, String)]) -> BTreeMap<String, Value> {
    fields
        .iter()
        .map(|(path, value)| (path.clone(), Value::Text(value.clone())))
        .collect()
}

/// Parse a query and print its syntax tree.
pub fn parse_query(query: &str, format: &str) -> Result<()> {
    let node = parse(query)?;
    match format {
        "json" => print_json(&node),
        _ => {
            println!("{}", node);
            for comparison in node.comparisons() {
                println!(
                    "  {} {} [{}]",
                    comparison.selector,
                    comparison.operator,
                    comparison.arguments.join(", ")
                );
            }
            Ok(())
        }
    }
}

/// Expand, parse and compile a query.
pub fn compile(query: &str, entity: &str, tenant: &str, format: &str) -> Result<()> {
    let config = Config::load()?;
    let engine = QueryEngine::new(load_schema(&config)?, config.tenant(tenant));
    let predicate = engine.compile(entity, query)?;
    match format {
        "json" => print_json(&predicate),
        _ => {
            println!("{}", predicate);
            Ok(())
        }
    }
}

/// Validate a query, or print completions at `cursor`.
pub fn suggest(query: &str, cursor: i64, entity: &str, format: &str) -> Result<()> {
    let config = Config::load()?;
    let schema = load_schema(&config)?;
    let outcome = SchemaOracle::new(&schema, entity).suggest(query, cursor);

    if format == "json" {
        return print_json(&outcome);
    }
    match outcome {
        ValidationOutcome::Valid => println!("valid"),
        ValidationOutcome::SyntaxError { position, message } => {
            if position < 0 {
                println!("error: {}", message);
            } else {
                println!("error at {}: {}", position, message);
            }
        }
        ValidationOutcome::Suggestions { tokens, .. } => {
            for token in tokens {
                println!("{}\t{}..{}\t{}", token.suggestion, token.start, token.end, token.typed);
            }
        }
    }
    Ok(())
}

/// Evaluate a query against one record.
pub fn check(query: &str, fields: &[(String, String)], entity: &str, tenant: &str) -> Result<()> {
    let config = Config::load()?;
    let engine = QueryEngine::new(load_schema(&config)?, config.tenant(tenant));
    let matched = engine.matches(entity, query, &record(fields))?;
    println!("{}", if matched { "match" } else { "no match" });
    Ok(())
}

/// Parse a polling specification, by default the tenant's configured one.
pub fn polling(spec: Option<&str>, tenant: &str, format: &str) -> Result<()> {
    let polling: PollingTime = match spec {
        Some(text) => parse_polling_time(text)?,
        None => {
            let config = Config::load()?;
            let engine = QueryEngine::new(FieldSchema::new(), config.tenant(tenant));
            engine.polling_time()?
        }
    };

    match format {
        "json" => print_json(&polling),
        _ => {
            println!("base: {}", polling.base);
            for o in &polling.overrides {
                println!("{} -> {}", o.query, o.interval);
            }
            Ok(())
        }
    }
}

/// Draw effective polling intervals for one record.
pub fn interval(fields: &[(String, String)], entity: &str, tenant: &str, samples: usize) -> Result<()> {
    let config = Config::load()?;
    let min = config.min_polling()?;
    let max = config.max_polling()?;
    let engine = QueryEngine::new(load_schema(&config)?, config.tenant(tenant));
    let record = record(fields);
    let mut rng = rand::thread_rng();

    for _ in 0..samples.max(1) {
        let d = engine.polling_interval_for(entity, &record, min, max, &mut rng)?;
        println!("{}", qfilter::format_duration(d));
    }
    Ok(())
}

/// List selectors per entity type.
pub fn fields(entity: Option<&str>) -> Result<()> {
    let config = Config::load()?;
    let schema = load_schema(&config)?;

    let entity_types: Vec<String> = match entity {
        Some(e) => {
            // Surface unknown entity types as errors
            schema.fields(e).ok_or_else(|| qfilter::FieldError::UnknownEntity(e.to_string()))?;
            vec![e.to_string()]
        }
        None => schema.entity_types().into_iter().map(str::to_string).collect(),
    };

    for entity_type in &entity_types {
        if entity.is_none() {
            println!("{}:", entity_type);
        }
        for selector in schema.selectors(entity_type) {
            if entity.is_none() {
                println!("  {}", selector);
            } else {
                println!("{}", selector);
            }
        }
    }
    Ok(())
}

/// Print the effective configuration.
pub fn config_show() -> Result<()> {
    let config = Config::load()?;
    let tenant = config.tenant("default");
    println!("root: {}", config.root.display());
    println!("schema: {}", if config.schema_path().exists() { "schema.toml" } else { "built-in" });
    println!("min polling: {}", qfilter::format_duration(config.min_polling()?));
    println!("max polling: {}", qfilter::format_duration(config.max_polling()?));
    for key in [qfilter::config::POLLING_TIME_KEY, qfilter::config::POLLING_OVERDUE_TIME_KEY] {
        println!("{}: {}", key, tenant.get_string(key).unwrap_or_default());
    }
    for (name, values) in &config.tenants {
        println!("[{}]", name);
        for (key, value) in values {
            println!("  {} = {}", key, value);
        }
    }
    Ok(())
}

/// Print the configuration root.
pub fn config_path() -> Result<()> {
    let config = Config::load()?;
    println!("{}", config.root.display());
    Ok(())
}

/// Set a value for one tenant or for all of them.
pub fn config_set(key: &str, value: &str, tenant: Option<&str>) -> Result<()> {
    let mut config = Config::load()?;
    config.set(tenant, key, value);
    config.save()?;
    match tenant {
        Some(t) => eprintln!("Set {} for tenant {}", key, t),
        None => eprintln!("Set {} for all tenants", key),
    }
    Ok(())
}
