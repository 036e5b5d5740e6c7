//! # chmacro
//!
//! Macro interpolation engine for ClickHouse dashboard SQL.
//!
//! A query such as
//!
//! ```sql
//! SELECT $__timeInterval(ts), count() FROM logs WHERE $__timeFilter() GROUP BY 1
//! ```
//!
//! is rewritten into plain SQL by [`interpolator::Interpolator`]. Macro calls
//! without a column argument bind to the table of the SELECT they sit in
//! ([`ast::macro_ctes`]) and use its primary key, fetched once per TTL by
//! [`metadata::MetadataProvider`].
//!
//! # Modules
//!
//! - [`context`] - Query context, time range rounding, ad-hoc filters
//! - [`preprocessor`] - Macro sigil masking for the SQL parser
//! - [`ast`] - Parsing, node walking and macro-to-table resolution
//! - [`matcher`] - Macro call matching and argument parsing
//! - [`macros`] - Built-in macro functions and their registry
//! - [`interpolator`] - Right-to-left macro substitution
//! - [`metadata`] - Cached primary key and column type lookups
//! - [`connection`] - ClickHouse HTTP connection
//! - [`cache`] - TTL cache
//! - [`scope`] - Deadline-bearing execution scope
//! - [`resources`] - `/ast`, `/macroCTE` and `/interpolate` handlers
//! - [`config`] - Configuration loading
//! - [`output`] - Result formatting
//! - [`error`] - Error types and constructors

pub mod app;
pub mod ast;
pub mod cache;
pub mod cli;
pub mod config;
pub mod connection;
pub mod context;
pub mod error;
pub mod interpolator;
pub mod macros;
pub mod matcher;
pub mod metadata;
pub mod output;
pub mod preprocessor;
pub mod resources;
pub mod scope;
