//! qfilter: RSQL filter queries for entity inventories.
//!
//! Parses RSQL text into a syntax tree, resolves selectors against per-entity
//! field schemas, compiles the tree into backend-neutral predicates, offers
//! validation and completion for query editors, and evaluates polling
//! interval specifications whose overrides are themselves filter queries.

pub mod compile;
pub mod config;
pub mod duration;
pub mod engine;
pub mod error;
pub mod macros;
pub mod polling;
pub mod predicate;
pub mod query;
pub mod schema;
pub mod suggest;

pub use compile::compile;
pub use config::{Config, TenantConfig};
pub use duration::{format_duration, parse_duration};
pub use engine::QueryEngine;
pub use error::{CompileError, Error, FieldError, IntervalError, ParseError, Result};
pub use macros::{expand, PollingMacros};
pub use polling::{compute_effective_interval, parse_polling_time, PollingInterval, PollingOverride, PollingTime};
pub use predicate::{CompareOp, Predicate, Record, Value};
pub use query::{parse, parse_tolerant, Comparison, Node, Operator};
pub use schema::{FieldDescriptor, FieldSchema, FieldSet, ValueConverter, ValueKind};
pub use suggest::{SchemaOracle, SuggestToken, ValidationOracle, ValidationOutcome};
