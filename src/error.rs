pub use masterror::{AppError, AppResult};

/// Message an error was built with, or its kind when it carries none
pub fn error_message(err: &AppError) -> String {
    err.message
        .as_deref()
        .map_or_else(|| err.to_string(), str::to_string)
}

/// Create file read error
pub fn file_read_error(path: &str, source: std::io::Error) -> AppError {
    AppError::internal(format!("Failed to read file '{}': {}", path, source))
}

/// Create query parse error with optional position info
pub fn query_parse_error(message: impl Into<String>) -> AppError {
    let msg = message.into();
    AppError::bad_request(format_sql_error("Query parse error", &msg))
}

/// Wrong number of arguments passed to a macro
pub fn bad_argument_count(expected: &str, received: usize) -> AppError {
    AppError::bad_request(format!(
        "unexpected number of arguments: expected {}, received {}",
        expected, received
    ))
}

/// Unterminated macro argument list
pub fn macro_args_error(name: &str) -> AppError {
    AppError::bad_request(format!(
        "failed to parse macro arguments (missing close bracket?): $__{}",
        name
    ))
}

/// No table or sub-select could be resolved for a macro call site
pub fn resolution_error(message: impl Into<String>) -> AppError {
    AppError::not_found(message.into())
}

pub fn primary_key_not_found() -> AppError {
    AppError::not_found("primary key not found")
}

pub fn keys_not_found() -> AppError {
    AppError::not_found("adHocFilter keys not found")
}

/// Ad-hoc filter operator that has no meaning for a NULL or empty value
pub fn filter_error(key: &str, operator: &str, value: &str) -> AppError {
    AppError::bad_request(format!(
        "{}: operator '{}' can not be applied to {} value",
        key, operator, value
    ))
}

/// Wrap a condition-building failure with the filter key it belongs to
pub fn filter_condition_error(key: &str, source: &AppError) -> AppError {
    AppError::bad_request(format!(
        "error building filter condition for key '{}': {}",
        key,
        error_message(source)
    ))
}

/// Create database error
pub fn database_error(message: impl Into<String>) -> AppError {
    AppError::service(message.into())
}

/// Create HTTP error
pub fn http_error(err: reqwest::Error) -> AppError {
    let msg = if err.is_timeout() {
        format!("Request timeout: {}", err)
    } else if err.is_connect() {
        format!("Connection failed: {}", err)
    } else if err.is_status() {
        format!("HTTP error {}: {}", err.status().unwrap_or_default(), err)
    } else {
        err.to_string()
    };
    AppError::service(msg)
}

/// The execution scope's deadline passed before the operation finished
pub fn deadline_error() -> AppError {
    AppError::timeout("context deadline exceeded")
}

pub fn is_deadline_error(err: &AppError) -> bool {
    err.message.as_deref() == Some("context deadline exceeded")
}

/// Create config error
pub fn config_error(message: impl Into<String>) -> AppError {
    AppError::bad_request(message.into())
}

/// Format SQL error with position highlighting
fn format_sql_error(prefix: &str, message: &str) -> String {
    // sqlparser format: "... at Line: X, Column: Y"
    if let Some(pos) = extract_position(message) {
        format!(
            "{} at line {}, column {}:\n  {}",
            prefix, pos.line, pos.column, message
        )
    } else {
        format!("{}:\n  {}", prefix, message)
    }
}

struct SqlPosition {
    line:   usize,
    column: usize
}

fn extract_position(message: &str) -> Option<SqlPosition> {
    let line_marker = "Line: ";
    let line_start = message.find(line_marker)? + line_marker.len();
    let line_end = message[line_start..].find(|c: char| !c.is_ascii_digit())? + line_start;
    let rest = &message[line_end..];
    let col_marker = rest.find("Column")?;
    let col_start = line_end
        + col_marker
        + rest[col_marker..].find(|c: char| c.is_ascii_digit())?;
    let col_end = message[col_start..]
        .find(|c: char| !c.is_ascii_digit())
        .map_or(message.len(), |end| col_start + end);
    Some(SqlPosition {
        line:   message[line_start..line_end].parse().ok()?,
        column: message[col_start..col_end].parse().ok()?
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_position_with_colon() {
        let pos = extract_position("Expected: end of statement, found: ( at Line: 2, Column: 14")
            .unwrap();
        assert_eq!(pos.line, 2);
        assert_eq!(pos.column, 14);
    }

    #[test]
    fn test_extract_position_without_colon() {
        let pos = extract_position("Error at Line: 999, Column 12345").unwrap();
        assert_eq!(pos.line, 999);
        assert_eq!(pos.column, 12345);
    }

    #[test]
    fn test_extract_position_missing() {
        assert!(extract_position("no position here").is_none());
    }
}
