use colored::Colorize;
use serde::Serialize;
use serde_json::Value;

use crate::{ast::CteRecord, resources::Envelope};

/// Output format for results
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Yaml
}

/// Output options
#[derive(Debug, Clone)]
pub struct OutputOptions {
    pub format:  OutputFormat,
    pub colored: bool,
    pub verbose: bool
}

impl Default for OutputOptions {
    fn default() -> Self {
        Self {
            format:  OutputFormat::Text,
            colored: true,
            verbose: false
        }
    }
}

/// Interpolation result for serialization
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InterpolationOutput {
    pub raw_sql:     String,
    pub sql:         String,
    pub from:        String,
    pub to:          String,
    pub interval_ms: u64
}

/// Format an interpolation result
///
/// Text output is the bare SQL so it can be piped into a client; verbose text
/// adds the original query and the time range above it.
pub fn format_interpolation(result: &InterpolationOutput, opts: &OutputOptions) -> String {
    match opts.format {
        OutputFormat::Json => serde_json::to_string_pretty(result).unwrap_or_default(),
        OutputFormat::Yaml => serde_yaml::to_string(result).unwrap_or_default(),
        OutputFormat::Text if opts.verbose => {
            let mut output = String::new();
            output.push_str(&header("=== Macro Interpolation ===", opts));
            output.push_str("\n\n");
            output.push_str(&format!("Range: {} .. {}\n", result.from, result.to));
            output.push_str(&format!("Interval: {}ms\n\n", result.interval_ms));
            output.push_str(&label("Raw SQL:", opts));
            output.push('\n');
            output.push_str(&result.raw_sql);
            output.push_str("\n\n");
            output.push_str(&label("Interpolated SQL:", opts));
            output.push('\n');
            output.push_str(&result.sql);
            output
        }
        OutputFormat::Text => result.sql.clone()
    }
}

/// Format an `/ast` envelope
///
/// The envelope is structured data; text output is pretty JSON.
pub fn format_ast(envelope: &Envelope<Value>, opts: &OutputOptions) -> String {
    match opts.format {
        OutputFormat::Yaml => serde_yaml::to_string(envelope).unwrap_or_default(),
        OutputFormat::Json | OutputFormat::Text => {
            serde_json::to_string_pretty(envelope).unwrap_or_default()
        }
    }
}

/// Format a `/macroCTE` envelope
pub fn format_ctes(envelope: &Envelope<Vec<CteRecord>>, opts: &OutputOptions) -> String {
    match opts.format {
        OutputFormat::Json => serde_json::to_string_pretty(envelope).unwrap_or_default(),
        OutputFormat::Yaml => serde_yaml::to_string(envelope).unwrap_or_default(),
        OutputFormat::Text => format_ctes_text(envelope, opts)
    }
}

fn format_ctes_text(envelope: &Envelope<Vec<CteRecord>>, opts: &OutputOptions) -> String {
    if envelope.error {
        let message = format!("Error: {}", envelope.error_message);
        return if opts.colored {
            message.red().to_string()
        } else {
            message
        };
    }
    let records = envelope.data.as_deref().unwrap_or_default();
    if records.is_empty() {
        return String::from("No macros bound to a FROM source");
    }

    let mut output = String::new();
    output.push_str(&header("Macro CTEs:", opts));
    output.push_str("\n\n");
    for record in records {
        let title = format!("{} @ {}", record.macro_name, record.macro_pos);
        output.push_str(&label(&title, opts));
        output.push('\n');
        output.push_str(&format!("  Source: {}\n", record.cte));
        if !record.table.is_empty() {
            let table = if record.database.is_empty() {
                record.table.clone()
            } else {
                format!("{}.{}", record.database, record.table)
            };
            output.push_str(&format!("  Table: {}\n", table));
        }
        if opts.verbose {
            output.push_str(&format!("  SELECT at: {}\n", record.pos));
        }
    }
    output
}

fn header(text: &str, opts: &OutputOptions) -> String {
    if opts.colored {
        text.bold().to_string()
    } else {
        text.to_string()
    }
}

fn label(text: &str, opts: &OutputOptions) -> String {
    if opts.colored {
        text.cyan().bold().to_string()
    } else {
        text.to_string()
    }
}
