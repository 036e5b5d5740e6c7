//! Command runners for the chmacro CLI.
//!
//! Kept apart from the entry point so every command can be driven from tests.

use std::{
    fs::read_to_string,
    io::{self, Read},
    path::Path,
    sync::Arc,
    time::Duration
};

use chrono::{DateTime, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::debug;

use crate::{
    cli::Format,
    config::Config,
    connection::{ConfiguredConnection, Connection},
    context::{AdHocFilter, QueryContext, TimeRange},
    error::{AppError, AppResult, config_error, file_read_error},
    interpolator::Interpolator,
    macros::MacroRegistry,
    metadata::MetadataProvider,
    output::{
        InterpolationOutput, OutputFormat, OutputOptions, format_ast, format_ctes,
        format_interpolation
    },
    resources::{handle_ast, handle_macro_ctes},
    scope::Scope
};

/// Parameters for the interpolate command
#[derive(Debug, Clone)]
pub struct InterpolateParams {
    pub query_path:    String,
    pub from:          String,
    pub to:            String,
    pub interval:      String,
    pub round:         Option<String>,
    pub filters_path:  Option<String>,
    pub url:           Option<String>,
    pub output_format: Format,
    pub verbose:       bool,
    pub no_color:      bool
}

/// Rendered command output and the process exit code it implies
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub output:    String,
    pub exit_code: i32
}

/// Convert CLI format to internal OutputFormat
pub fn convert_format(format: Format) -> OutputFormat {
    match format {
        Format::Text => OutputFormat::Text,
        Format::Json => OutputFormat::Json,
        Format::Yaml => OutputFormat::Yaml
    }
}

/// Create output options from parameters
pub fn create_output_options(format: Format, no_color: bool, verbose: bool) -> OutputOptions {
    OutputOptions {
        format: convert_format(format),
        colored: !no_color,
        verbose
    }
}

/// Read a query from file or stdin
pub fn read_query_input(path: &str) -> AppResult<String> {
    if path == "-" {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .map_err(|e| file_read_error("stdin", e))?;
        Ok(buffer)
    } else {
        read_to_string(path).map_err(|e| file_read_error(path, e))
    }
}

/// Read ad-hoc filters from a JSON array file
pub fn read_filters(path: &Path) -> AppResult<Vec<AdHocFilter>> {
    let display = path.display().to_string();
    let content = read_to_string(path).map_err(|e| file_read_error(&display, e))?;
    serde_json::from_str(&content)
        .map_err(|e| config_error(format!("Invalid filters file '{}': {}", display, e)))
}

/// Parse an RFC 3339 timestamp
pub fn parse_time(value: &str) -> AppResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|time| time.with_timezone(&Utc))
        .map_err(|e| AppError::bad_request(format!("Invalid time '{}': {}", value, e)))
}

/// Parse a human-readable interval such as `20s`
pub fn parse_interval(value: &str) -> AppResult<Duration> {
    humantime::parse_duration(value)
        .map_err(|e| AppError::bad_request(format!("Invalid interval '{}': {}", value, e)))
}

/// Build the query context the interpolate command works on
pub fn build_context(params: &InterpolateParams, raw_sql: String) -> AppResult<QueryContext> {
    let range = TimeRange::new(parse_time(&params.from)?, parse_time(&params.to)?);
    let interval = parse_interval(&params.interval)?;
    let mut context = QueryContext::new(raw_sql, range, interval);
    if let Some(round) = &params.round {
        context = context.with_round(round.as_str());
    }
    if let Some(path) = &params.filters_path {
        context = context.with_filters(read_filters(Path::new(path))?);
    }
    Ok(context)
}

/// Run the interpolate command
pub async fn run_interpolate(params: InterpolateParams, mut config: Config) -> AppResult<String> {
    let raw_sql = read_query_input(&params.query_path)?;
    let context = build_context(&params, raw_sql)?;
    if params.url.is_some() {
        config.datasource.url = params.url.clone();
    }

    let connection = ConfiguredConnection::from_config(&config)?;
    let offline = connection.is_offline();
    debug!(
        offline,
        database = connection.default_database(),
        "Connection configured"
    );
    let interpolator = Interpolator::new(
        Arc::new(MacroRegistry::builtin()),
        MetadataProvider::with_ttl(connection, config.metadata.cache_ttl())
    );
    let scope = Scope::with_timeout(config.query.timeout());

    let pb = ProgressBar::new_spinner();
    if !offline {
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
            pb.set_style(style);
        }
        pb.set_message("Resolving table metadata...");
        pb.enable_steady_tick(Duration::from_millis(100));
    }
    let result = interpolator.interpolate(&context, &scope).await;
    pb.finish_and_clear();

    let output = InterpolationOutput {
        raw_sql:     context.raw_sql.clone(),
        sql:         result?,
        from:        context.time_range.from.to_rfc3339(),
        to:          context.time_range.to.to_rfc3339(),
        interval_ms: u64::try_from(context.interval.as_millis()).unwrap_or(u64::MAX)
    };
    let opts = create_output_options(params.output_format, params.no_color, params.verbose);
    Ok(format_interpolation(&output, &opts))
}

/// Run the ast command
pub fn run_ast(query_path: &str, format: Format) -> AppResult<CommandOutput> {
    let body = request_body(&read_query_input(query_path)?);
    let envelope = handle_ast(&body);
    let opts = create_output_options(format, true, false);
    Ok(CommandOutput {
        output:    format_ast(&envelope, &opts),
        exit_code: i32::from(envelope.error)
    })
}

/// Run the ctes command
pub fn run_ctes(
    query_path: &str,
    format: Format,
    no_color: bool,
    verbose: bool
) -> AppResult<CommandOutput> {
    let body = request_body(&read_query_input(query_path)?);
    let envelope = handle_macro_ctes(&body);
    let opts = create_output_options(format, no_color, verbose);
    Ok(CommandOutput {
        output:    format_ctes(&envelope, &opts),
        exit_code: i32::from(envelope.error)
    })
}

fn request_body(query: &str) -> Vec<u8> {
    serde_json::json!({"data": {"query": query}})
        .to_string()
        .into_bytes()
}
