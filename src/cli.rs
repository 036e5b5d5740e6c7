use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// chmacro - Expand dashboard macros in ClickHouse SQL
#[derive(Parser, Debug)]
#[command(name = "chmacro")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Replace every macro call with the SQL it expands to
    Interpolate {
        /// Path to the SQL query file (use - for stdin)
        #[arg(short, long)]
        query: PathBuf,

        /// Start of the time range (RFC 3339)
        #[arg(long)]
        from: String,

        /// End of the time range (RFC 3339)
        #[arg(long)]
        to: String,

        /// Query interval, e.g. 20s or 1m
        #[arg(short, long, default_value = "20s")]
        interval: String,

        /// Round both ends of the range to this interval, e.g. 1m
        #[arg(short, long)]
        round: Option<String>,

        /// JSON file with ad-hoc filters
        #[arg(long)]
        filters: Option<PathBuf>,

        /// ClickHouse HTTP endpoint used for metadata lookups
        #[arg(long, env = "CLICKHOUSE_URL")]
        url: Option<String>,

        /// Output format
        #[arg(short = 'f', long, value_enum, default_value = "text")]
        output_format: Format,

        /// Disable colored output
        #[arg(long)]
        no_color: bool
    },

    /// Print the parsed statements of a query as JSON
    Ast {
        /// Path to the SQL query file (use - for stdin)
        #[arg(short, long)]
        query: PathBuf,

        /// Output format
        #[arg(short = 'f', long, value_enum, default_value = "json")]
        output_format: Format
    },

    /// List the FROM source every macro call binds to
    Ctes {
        /// Path to the SQL query file (use - for stdin)
        #[arg(short, long)]
        query: PathBuf,

        /// Output format
        #[arg(short = 'f', long, value_enum, default_value = "text")]
        output_format: Format,

        /// Disable colored output
        #[arg(long)]
        no_color: bool
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum Format {
    Text,
    Json,
    Yaml
}
