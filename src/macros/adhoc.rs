//! `$__adHocFilter()` expansion.
//!
//! Filters whose key is not a column of the call site's FROM source are
//! skipped. Values are quoted with `$$...$$` so user input never needs SQL
//! escaping.

use super::MacroCall;
use crate::{
    ast::{ParsedSql, find_cte_at, macro_ctes},
    connection::Connection,
    context::AdHocFilter,
    error::{
        AppResult, filter_condition_error, filter_error, is_deadline_error, resolution_error
    }
};

/// Marks a value that is literally NULL rather than absent.
pub const NULL_SENTINEL: &str = "__null__";

/// Marks a value that is literally the empty string.
pub const EMPTY_SENTINEL: &str = "__empty__";

const ALWAYS_TRUE: &str = "1=1";

pub(super) async fn ad_hoc_filter<C: Connection>(call: &MacroCall<'_, C>) -> AppResult<String> {
    let filters = &call.context.filters;
    if filters.is_empty() {
        return Ok(ALWAYS_TRUE.to_string());
    }
    let parsed = ParsedSql::parse(&call.context.raw_sql)?;
    let ctes = macro_ctes(&parsed)?;
    let cte = find_cte_at(&ctes, call.position)
        .map(|record| record.cte.as_str())
        .filter(|cte| !cte.is_empty())
        .ok_or_else(|| {
            resolution_error(format!(
                "cannot apply ad hoc filters: unable to resolve tableName for ad hoc filter at index {}",
                call.position
            ))
        })?;
    let columns = call
        .metadata
        .column_types(call.scope, cte)
        .await
        .map_err(|err| {
            if is_deadline_error(&err) {
                return err;
            }
            resolution_error(format!(
                "cannot apply ad hoc filters: unable to resolve keys for cte: {}",
                cte
            ))
        })?;

    let mut conditions = Vec::new();
    for filter in filters {
        let Some(type_name) = columns.get(&filter.key) else {
            continue;
        };
        let condition = build_filter_condition(filter, is_string_type(type_name))
            .map_err(|err| filter_condition_error(&filter.key, &err))?;
        if !condition.is_empty() {
            conditions.push(condition);
        }
    }

    Ok(match conditions.as_slice() {
        [] => ALWAYS_TRUE.to_string(),
        [single] => single.clone(),
        _ => conditions
            .iter()
            .map(|condition| format!("({})", condition))
            .collect::<Vec<_>>()
            .join(" AND ")
    })
}

/// SQL condition for one ad-hoc filter.
///
/// An empty result means the filter constrains nothing and is dropped.
///
/// # Example
///
/// ```
/// use chmacro::{context::AdHocFilter, macros::build_filter_condition};
///
/// let filter = AdHocFilter {
///     key:      "column".into(),
///     operator: "=|".into(),
///     values:   vec!["a".into(), "null".into(), "c".into()],
///     ..Default::default()
/// };
///
/// assert_eq!(
///     build_filter_condition(&filter, true).unwrap(),
///     "column IS NULL OR column IN ($$a$$, $$c$$)"
/// );
/// ```
pub fn build_filter_condition(filter: &AdHocFilter, is_string: bool) -> AppResult<String> {
    let key = filter.key.as_str();
    let value = filter.value.as_str();
    let operator = filter.operator.as_str();
    match operator {
        "=|" => {
            let (values, has_null) = joined_values(&filter.values);
            let mut parts = Vec::new();
            if has_null {
                parts.push(format!("{} IS NULL", key));
            }
            if !values.is_empty() {
                parts.push(format!("{} IN ({})", key, values));
            }
            Ok(parts.join(" OR "))
        }
        "!=|" => {
            let (values, has_null) = joined_values(&filter.values);
            let mut parts = Vec::new();
            if has_null {
                parts.push(format!("{} IS NOT NULL", key));
            }
            if !values.is_empty() {
                parts.push(format!("{} NOT IN ({})", key, values));
            }
            Ok(parts.join(" AND "))
        }
        _ if is_null(value) => match operator {
            "=" if is_string => Ok(format!(
                "({key} IS NULL OR {key} = '{}')",
                NULL_SENTINEL
            )),
            "!=" if is_string => Ok(format!(
                "({key} IS NOT NULL AND {key} != '{}')",
                NULL_SENTINEL
            )),
            "=" => Ok(format!("{} IS NULL", key)),
            "!=" => Ok(format!("{} IS NOT NULL", key)),
            _ => Err(filter_error(key, operator, "NULL"))
        },
        _ if value.is_empty() || value == EMPTY_SENTINEL => match operator {
            "=" => Ok(format!("({key} = '' OR {key} = '{}')", EMPTY_SENTINEL)),
            "!=" => Ok(format!("({key} != '' AND {key} != '{}')", EMPTY_SENTINEL)),
            _ => Err(filter_error(key, operator, EMPTY_SENTINEL))
        },
        "=~" => Ok(format!("toString({}) LIKE $${}$$", key, escape_wildcard(value))),
        "!~" => Ok(format!(
            "toString({}) NOT LIKE $${}$$",
            key,
            escape_wildcard(value)
        )),
        _ => Ok(format!("{} {} $${}$$", key, operator, value))
    }
}

/// Turn `*` wildcards into `%`; an escaped `\*` stays a literal `*`.
pub fn escape_wildcard(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&'*') => {
                out.push('*');
                chars.next();
            }
            '*' => out.push('%'),
            _ => out.push(c)
        }
    }
    out
}

fn is_null(value: &str) -> bool {
    value.eq_ignore_ascii_case("NULL") || value == NULL_SENTINEL
}

fn is_string_type(type_name: &str) -> bool {
    type_name.to_ascii_lowercase().contains("string")
}

/// Quoted, comma-joined values and whether a NULL was among them.
fn joined_values(values: &[String]) -> (String, bool) {
    let mut has_null = false;
    let mut quoted = Vec::with_capacity(values.len());
    for value in values {
        if is_null(value) {
            has_null = true;
        } else if value == EMPTY_SENTINEL {
            quoted.push(String::from("$$$$"));
        } else {
            quoted.push(format!("$${}$$", value));
        }
    }
    (quoted.join(", "), has_null)
}
