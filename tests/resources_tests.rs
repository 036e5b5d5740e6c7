use std::sync::Arc;

use chmacro::{
    connection::OfflineConnection,
    interpolator::Interpolator,
    macros::MacroRegistry,
    metadata::MetadataProvider,
    resources::{handle_ast, handle_interpolate, handle_macro_ctes},
    scope::Scope
};

fn offline() -> Interpolator<OfflineConnection> {
    Interpolator::new(
        Arc::new(MacroRegistry::builtin()),
        MetadataProvider::new(OfflineConnection::new("default"))
    )
}

#[test]
fn test_ast_envelope() {
    let envelope = handle_ast(br#"{"data": {"query": "SELECT a FROM t WHERE $__timeFilter(a)"}}"#);
    assert!(!envelope.error);
    assert!(envelope.error_message.is_empty());
    let statements = envelope.data.unwrap();
    assert_eq!(statements.as_array().unwrap().len(), 1);
    assert!(statements.to_string().contains("$__timeFilter"));
}

#[test]
fn test_ast_parse_error_envelope() {
    let envelope = handle_ast(br#"{"data": {"query": "SELECT * FROM ("}}"#);
    assert!(envelope.error);
    assert!(envelope.error_message.starts_with("Query parse error"));
    assert!(envelope.data.is_none());
}

#[test]
fn test_macro_ctes_sorted_by_position() {
    let body = br#"{"data": {"query": "SELECT $__timeInterval() FROM a WHERE x IN (SELECT x FROM b WHERE $__timeFilter())"}}"#;
    let envelope = handle_macro_ctes(body);
    let records = envelope.data.unwrap();
    assert_eq!(records.len(), 2);
    assert!(records[0].macro_pos < records[1].macro_pos);
    assert_eq!(records[0].cte, "a");
    assert_eq!(records[1].cte, "b");
}

#[test]
fn test_macro_ctes_json_shape() {
    let envelope = handle_macro_ctes(br#"{"data": {"query": "SELECT 1"}}"#);
    let json = serde_json::to_value(&envelope).unwrap();
    assert_eq!(
        json,
        serde_json::json!({"error": false, "error_message": "", "data": []})
    );
}

#[tokio::test]
async fn test_interpolate_envelope() {
    let body = br#"{"data": {
        "query": {"rawSql": "SELECT * FROM t WHERE $__timeFilter(ts)", "format": 1},
        "from": "2014-11-12T11:45:26.371Z",
        "to": "2015-11-12T11:45:26.371Z",
        "intervalMs": 20000
    }}"#;
    let envelope = handle_interpolate(&offline(), &Scope::unbounded(), body).await;
    assert!(!envelope.error, "{}", envelope.error_message);
    assert_eq!(
        envelope.data.unwrap(),
        "SELECT * FROM t WHERE ts >= toDateTime(1415792726) AND ts <= toDateTime(1447328726)"
    );
}

#[tokio::test]
async fn test_interpolate_envelope_with_round_and_interval() {
    let body = br#"{"data": {
        "query": {"rawSql": "$__timeInterval(ts) $__fromTime", "round": "1m"},
        "from": "2014-11-12T11:45:26.371Z",
        "to": "2015-11-12T11:45:26.371Z",
        "intervalMs": 60000
    }}"#;
    let envelope = handle_interpolate(&offline(), &Scope::unbounded(), body).await;
    assert_eq!(
        envelope.data.unwrap(),
        "toStartOfInterval(toDateTime(ts), INTERVAL 60 second) toDateTime(1415792700)"
    );
}

#[tokio::test]
async fn test_interpolate_error_envelope() {
    let body = br#"{"data": {
        "query": {"rawSql": "SELECT * FROM t WHERE $__timeFilter()"},
        "from": "2014-11-12T11:45:26.371Z",
        "to": "2015-11-12T11:45:26.371Z"
    }}"#;
    let envelope = handle_interpolate(&offline(), &Scope::unbounded(), body).await;
    assert!(envelope.error);
    assert!(envelope.error_message.starts_with("no datasource configured"));
    assert!(envelope.data.is_none());
}

#[tokio::test]
async fn test_interpolate_bad_time() {
    let body = br#"{"data": {"query": {"rawSql": "SELECT 1"}, "from": "yesterday", "to": "now"}}"#;
    let envelope = handle_interpolate(&offline(), &Scope::unbounded(), body).await;
    assert!(envelope.error);
    assert!(envelope.error_message.starts_with("Invalid request body"));
}
