//! # chmacro
//!
//! Expands dashboard macros in ClickHouse SQL.
//!
//! Dashboard queries carry placeholders such as `$__timeFilter(ts)` or
//! `$__adHocFilter()`. `chmacro` replaces each call with plain SQL computed
//! from the dashboard time range, the query interval, ad-hoc filters and,
//! when a column is omitted, the primary key of the table the call sits in.
//!
//! # Quick Start
//!
//! ```bash
//! # Expand macros with explicit columns, no database needed
//! chmacro interpolate -q query.sql \
//!     --from 2024-01-01T00:00:00Z --to 2024-01-02T00:00:00Z
//!
//! # Resolve primary keys and ad-hoc filter columns from ClickHouse
//! export CLICKHOUSE_URL="http://localhost:8123"
//! chmacro interpolate -q query.sql --from ... --to ... --filters filters.json
//!
//! # Show which FROM source each macro binds to
//! echo 'SELECT * FROM logs WHERE $__timeFilter()' | chmacro ctes -q -
//!
//! # Dump the parsed statements
//! chmacro ast -q query.sql
//! ```
//!
//! # Exit Codes
//!
//! - `0` - Success
//! - `1` - Any error, including an error envelope from `ast` or `ctes`
//!
//! # Logging
//!
//! Log level comes from `RUST_LOG` (default `warn`); `-v` raises it to
//! `debug`.

use std::process;

use chmacro::{
    app::{InterpolateParams, run_ast, run_ctes, run_interpolate},
    cli::{Cli, Commands},
    config::Config,
    error::{AppResult, error_message}
};
use clap::Parser;
use tokio::main;
use tracing_subscriber::EnvFilter;

#[main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match run(cli).await {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", error_message(&e));
            process::exit(1);
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> AppResult<i32> {
    let config = Config::load()?;
    match cli.command {
        Commands::Interpolate {
            query,
            from,
            to,
            interval,
            round,
            filters,
            url,
            output_format,
            no_color
        } => {
            let params = InterpolateParams {
                query_path: query.display().to_string(),
                from,
                to,
                interval,
                round,
                filters_path: filters.map(|path| path.display().to_string()),
                url,
                output_format,
                verbose: cli.verbose,
                no_color
            };
            let output = run_interpolate(params, config).await?;
            println!("{}", output);
            Ok(0)
        }
        Commands::Ast {
            query,
            output_format
        } => {
            let result = run_ast(&query.display().to_string(), output_format)?;
            println!("{}", result.output);
            Ok(result.exit_code)
        }
        Commands::Ctes {
            query,
            output_format,
            no_color
        } => {
            let result = run_ctes(
                &query.display().to_string(),
                output_format,
                no_color,
                cli.verbose
            )?;
            println!("{}", result.output);
            Ok(result.exit_code)
        }
    }
}
