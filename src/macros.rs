//! Macro function registry.
//!
//! Every macro expands to a SQL fragment computed from the query context, the
//! raw arguments of the call and, for some macros, metadata of the table the
//! call belongs to.
//!
//! # Built-in Macros
//!
//! | Macro | Arguments | Expands to |
//! |-------|-----------|------------|
//! | `$__fromTime`, `$__toTime` | none | `toDateTime(<unix seconds>)` |
//! | `$__fromTime_ms`, `$__toTime_ms` | none | `fromUnixTimestamp64Milli(<unix ms>)` |
//! | `$__timeFilter`, `$__timeFilter_ms` | `[column]` | `col >= <from> AND col <= <to>` |
//! | `$__dateFilter` | `column` | date-only bound check |
//! | `$__dateTimeFilter`, `$__dt` | `dateColumn, timeColumn` | date and datetime bound checks |
//! | `$__timeInterval`, `$__timeInterval_ms` | `[column]` | `toStartOfInterval(...)` bucket |
//! | `$__interval_s` | none | interval length in seconds |
//! | `$__adHocFilter` | none | ad-hoc filter conditions |
//! | `$__conditionalAll` | none | `1=1` |
//!
//! A missing column argument resolves to the primary key of the table that
//! owns the call site.
//!
//! # Example
//!
//! ```
//! use chmacro::macros::MacroRegistry;
//!
//! let registry = MacroRegistry::builtin();
//! let names = registry.names_by_length();
//!
//! assert_eq!(names[0], "timeInterval_ms");
//! assert!(registry.get("dt").is_some());
//! ```

mod adhoc;
mod time;

pub use adhoc::{EMPTY_SENTINEL, NULL_SENTINEL, build_filter_condition, escape_wildcard};
use compact_str::CompactString;
use indexmap::IndexMap;
pub use time::{to_date, to_date_time, to_date_time64};

use crate::{
    ast::{ParsedSql, find_cte_at, macro_ctes},
    connection::Connection,
    context::QueryContext,
    error::{AppResult, resolution_error},
    matcher::MacroMatcher,
    metadata::MetadataProvider,
    scope::Scope
};

/// Built-in macro functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Macro {
    FromTime,
    ToTime,
    FromTimeMs,
    ToTimeMs,
    TimeFilter,
    TimeFilterMs,
    DateFilter,
    DateTimeFilter,
    TimeInterval,
    TimeIntervalMs,
    IntervalSeconds,
    AdHocFilter,
    ConditionalAll
}

/// Everything one macro invocation can see.
pub struct MacroCall<'a, C> {
    /// Context carrying the SQL as rewritten so far
    pub context:  &'a QueryContext,
    pub args:     &'a [String],
    /// Byte offset of the call in `context.raw_sql`
    pub position: usize,
    pub metadata: &'a MetadataProvider<C>,
    pub scope:    &'a Scope
}

impl Macro {
    pub async fn expand<C: Connection>(self, call: &MacroCall<'_, C>) -> AppResult<String> {
        let range = call.context.time_range;
        match self {
            Self::FromTime => Ok(to_date_time(range.from)),
            Self::ToTime => Ok(to_date_time(range.to)),
            Self::FromTimeMs => Ok(to_date_time64(range.from)),
            Self::ToTimeMs => Ok(to_date_time64(range.to)),
            Self::TimeFilter => time::time_filter(call, to_date_time).await,
            Self::TimeFilterMs => time::time_filter(call, to_date_time64).await,
            Self::DateFilter => time::date_filter(call),
            Self::DateTimeFilter => time::date_time_filter(call),
            Self::TimeInterval => time::time_interval(call).await,
            Self::TimeIntervalMs => time::time_interval_ms(call).await,
            Self::IntervalSeconds => Ok(time::interval_seconds(call.context).to_string()),
            Self::AdHocFilter => adhoc::ad_hoc_filter(call).await,
            Self::ConditionalAll => Ok(String::from("1=1"))
        }
    }
}

/// A registered macro with its compiled call matcher.
#[derive(Debug, Clone)]
pub struct MacroEntry {
    pub function: Macro,
    pub matcher:  MacroMatcher
}

/// Immutable name to function mapping, built once and shared.
#[derive(Debug, Clone, Default)]
pub struct MacroRegistry {
    entries: IndexMap<CompactString, MacroEntry>
}

const BUILTIN: &[(&str, Macro)] = &[
    ("adHocFilter", Macro::AdHocFilter),
    ("conditionalAll", Macro::ConditionalAll),
    ("fromTime", Macro::FromTime),
    ("toTime", Macro::ToTime),
    ("fromTime_ms", Macro::FromTimeMs),
    ("toTime_ms", Macro::ToTimeMs),
    ("timeFilter", Macro::TimeFilter),
    ("timeFilter_ms", Macro::TimeFilterMs),
    ("dateFilter", Macro::DateFilter),
    ("dateTimeFilter", Macro::DateTimeFilter),
    ("dt", Macro::DateTimeFilter),
    ("timeInterval", Macro::TimeInterval),
    ("timeInterval_ms", Macro::TimeIntervalMs),
    ("interval_s", Macro::IntervalSeconds)
];

impl MacroRegistry {
    /// Registry of every built-in macro
    pub fn builtin() -> Self {
        let entries = BUILTIN
            .iter()
            .map(|&(name, function)| {
                let matcher = MacroMatcher::new(name).expect("valid macro name");
                (
                    CompactString::from(name),
                    MacroEntry {
                        function,
                        matcher
                    }
                )
            })
            .collect();
        Self {
            entries
        }
    }

    /// Registry restricted to `names`; unknown names are ignored
    pub fn only(&self, names: &[&str]) -> Self {
        Self {
            entries: self
                .entries
                .iter()
                .filter(|(name, _)| names.contains(&name.as_str()))
                .map(|(name, entry)| (name.clone(), entry.clone()))
                .collect()
        }
    }

    pub fn get(&self, name: &str) -> Option<&MacroEntry> {
        self.entries.get(name)
    }

    /// Names ordered longest first; equal lengths by name
    pub fn names_by_length(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(CompactString::as_str).collect();
        names.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        names
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Column named by the single argument, or the owning table's primary key.
async fn column_or_primary_key<C: Connection>(call: &MacroCall<'_, C>) -> AppResult<String> {
    if let [column] = call.args
        && !column.is_empty()
    {
        return Ok(column.clone());
    }
    let parsed = ParsedSql::parse(&call.context.raw_sql)?;
    let ctes = macro_ctes(&parsed)?;
    let cte = find_cte_at(&ctes, call.position).ok_or_else(|| {
        resolution_error(format!("no CTE found for macro at pos {}", call.position))
    })?;
    call.metadata
        .primary_key(call.scope, &cte.database, &cte.table)
        .await
}
