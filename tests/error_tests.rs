// SPDX-FileCopyrightText: 2025 RAprogramm
// SPDX-License-Identifier: MIT

use chmacro::error::{
    bad_argument_count, config_error, deadline_error, error_message, file_read_error,
    filter_condition_error, filter_error, is_deadline_error, keys_not_found, macro_args_error,
    primary_key_not_found, query_parse_error, resolution_error
};

#[test]
fn test_file_read_error() {
    let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
    let error = file_read_error("/path/to/query.sql", io_error);
    assert!(error_message(&error).contains("/path/to/query.sql"));
}

#[test]
fn test_query_parse_error_with_position() {
    let error = query_parse_error("Expected: an expression, found: EOF at Line: 1, Column: 15");
    assert!(error_message(&error).starts_with("Query parse error at line 1, column 15"));
}

#[test]
fn test_query_parse_error_without_position() {
    let error = query_parse_error("Unexpected token");
    assert_eq!(error_message(&error), "Query parse error:\n  Unexpected token");
}

#[test]
fn test_bad_argument_count() {
    let error = bad_argument_count("0 or 1 argument", 2);
    assert_eq!(
        error_message(&error),
        "unexpected number of arguments: expected 0 or 1 argument, received 2"
    );
}

#[test]
fn test_macro_args_error() {
    let error = macro_args_error("timeFilter");
    assert_eq!(
        error_message(&error),
        "failed to parse macro arguments (missing close bracket?): $__timeFilter"
    );
}

#[test]
fn test_not_found_errors() {
    assert_eq!(error_message(&primary_key_not_found()), "primary key not found");
    assert_eq!(error_message(&keys_not_found()), "adHocFilter keys not found");
    assert_eq!(error_message(&resolution_error("no table")), "no table");
}

#[test]
fn test_filter_errors() {
    let inner = filter_error("col", "<", "NULL");
    let outer = filter_condition_error("col", &inner);
    assert_eq!(
        error_message(&outer),
        "error building filter condition for key 'col': col: operator '<' can not be applied to NULL value"
    );
}

#[test]
fn test_deadline_error() {
    assert!(is_deadline_error(&deadline_error()));
    assert!(!is_deadline_error(&config_error("context")));
}
