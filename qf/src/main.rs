//! qf: command line front-end for RSQL filter queries.

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod domain;

#[derive(Parser)]
#[command(name = "qf")]
#[command(about = "qf - parse, compile and complete RSQL filter queries")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a query and print its syntax tree
    Parse {
        /// RSQL query (e.g. "name==dev*;updatestatus=in=(pending,error)")
        query: String,

        /// Output format: text, json
        #[arg(short = 'f', long = "format", default_value = "text")]
        format: String,
    },

    /// Expand macros, parse and compile a query into a predicate
    #[command(visible_alias = "c")]
    Compile {
        query: String,

        /// Entity type the query targets
        #[arg(short = 'e', long = "entity", default_value = "target")]
        entity: String,

        /// Tenant whose configuration resolves ${...} macros
        #[arg(short = 't', long = "tenant", default_value = "default")]
        tenant: String,

        /// Output format: text, json
        #[arg(short = 'f', long = "format", default_value = "text")]
        format: String,
    },

    /// Validate a query, or list completions at a cursor position
    #[command(visible_alias = "s")]
    Suggest {
        query: String,

        /// Cursor offset in characters; -1 validates only
        #[arg(short = 'c', long = "cursor", default_value = "-1", allow_hyphen_values = true)]
        cursor: i64,

        #[arg(short = 'e', long = "entity", default_value = "target")]
        entity: String,

        /// Output format: text, json
        #[arg(short = 'f', long = "format", default_value = "text")]
        format: String,
    },

    /// Evaluate a query against one record
    Check {
        query: String,

        /// Record field as backend path and value (e.g. -F updateStatus=pending)
        #[arg(short = 'F', long = "field", value_parser = parse_field)]
        fields: Vec<(String, String)>,

        #[arg(short = 'e', long = "entity", default_value = "target")]
        entity: String,

        #[arg(short = 't', long = "tenant", default_value = "default")]
        tenant: String,
    },

    /// Parse a polling specification (defaults to the tenant's configured one)
    Polling {
        /// Specification such as "00:05:00~10%, updatestatus==pending -> 00:01:00"
        spec: Option<String>,

        #[arg(short = 't', long = "tenant", default_value = "default")]
        tenant: String,

        /// Output format: text, json
        #[arg(short = 'f', long = "format", default_value = "text")]
        format: String,
    },

    /// Compute effective polling intervals for one record
    Interval {
        /// Record field as backend path and value (e.g. -F updateStatus=pending)
        #[arg(short = 'F', long = "field", value_parser = parse_field)]
        fields: Vec<(String, String)>,

        #[arg(short = 'e', long = "entity", default_value = "target")]
        entity: String,

        #[arg(short = 't', long = "tenant", default_value = "default")]
        tenant: String,

        /// Number of samples to draw
        #[arg(short = 'n', long = "samples", default_value = "1")]
        samples: usize,
    },

    /// List the selectors an entity type accepts
    Fields {
        /// Entity type (all types when omitted)
        entity: Option<String>,
    },

    /// Show or change configuration
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the configuration file
    Show,
    /// Print the configuration root
    Path,
    /// Set a tenant value (all tenants when --tenant is omitted)
    Set {
        key: String,
        value: String,
        #[arg(short = 't', long = "tenant")]
        tenant: Option<String>,
    },
}

/// Parse `path=value`.
fn parse_field(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected path=value, got '{}'", s))
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Parse { query, format } => commands::parse_query(&query, &format),
        Commands::Compile { query, entity, tenant, format } => commands::compile(&query, &entity, &tenant, &format),
        Commands::Suggest { query, cursor, entity, format } => commands::suggest(&query, cursor, &entity, &format),
        Commands::Check { query, fields, entity, tenant } => commands::check(&query, &fields, &entity, &tenant),
        Commands::Polling { spec, tenant, format } => commands::polling(spec.as_deref(), &tenant, &format),
        Commands::Interval { fields, entity, tenant, samples } => commands::interval(&fields, &entity, &tenant, samples),
        Commands::Fields { entity } => commands::fields(entity.as_deref()),
        Commands::Config { action } => match action.unwrap_or(ConfigAction::Show) {
            ConfigAction::Show => commands::config_show(),
            ConfigAction::Path => commands::config_path(),
            ConfigAction::Set { key, value, tenant } => commands::config_set(&key, &value, tenant.as_deref()),
        },
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
