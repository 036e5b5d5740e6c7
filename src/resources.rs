//! Resource handlers exposing the parser to editor tooling.
//!
//! | Route | Request `data` | Response `data` |
//! |-------|----------------|-----------------|
//! | `/ast` | `{"query": "<sql>"}` | parsed statements |
//! | `/macroCTE` | `{"query": "<sql>"}` | CTE records sorted by macro position |
//! | `/interpolate` | query model, `from`, `to`, `intervalMs` | final SQL |
//!
//! Every handler answers with an [`Envelope`]; failures never escape as
//! errors. `/ast` and `/macroCTE` also turn panics into an `Unknown Error`
//! envelope.
//!
//! # Example
//!
//! ```
//! use chmacro::resources::handle_macro_ctes;
//!
//! let body = br#"{"data": {"query": "SELECT * FROM logs WHERE $__timeFilter()"}}"#;
//! let envelope = handle_macro_ctes(body);
//!
//! assert!(!envelope.error);
//! assert_eq!(envelope.data.unwrap()[0].cte, "logs");
//! ```

use std::{
    borrow::Cow,
    panic::{AssertUnwindSafe, catch_unwind},
    time::Duration
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    ast::{CteRecord, ParsedSql, macro_ctes},
    connection::Connection,
    context::{QueryContext, QueryModel, TimeRange},
    error::{AppError, AppResult, error_message},
    interpolator::Interpolator,
    preprocessor::unmask_macros,
    scope::Scope
};

/// Uniform response body of every resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub error:         bool,
    pub error_message: String,
    pub data:          Option<T>
}

impl<T> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            error:         false,
            error_message: String::new(),
            data:          Some(data)
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            error:         true,
            error_message: message.into(),
            data:          None
        }
    }

    fn from_result(result: AppResult<T>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(err) => Self::failure(error_message(&err))
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub data: QueryRequestData
}

#[derive(Debug, Deserialize)]
pub struct QueryRequestData {
    pub query: String
}

#[derive(Debug, Deserialize)]
pub struct InterpolateRequest {
    pub data: InterpolateRequestData
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterpolateRequestData {
    pub query:       QueryModel,
    pub from:        DateTime<Utc>,
    pub to:          DateTime<Utc>,
    #[serde(default)]
    pub interval_ms: u64
}

/// `/ast`: parsed statements of the request query
pub fn handle_ast(body: &[u8]) -> Envelope<Value> {
    guarded(|| {
        let request = decode::<QueryRequest>(body)?;
        let parsed = ParsedSql::parse(&request.data.query)?;
        let mut tree = serde_json::to_value(parsed.statements())
            .map_err(|e| AppError::internal(e.to_string()))?;
        unmask_strings(&mut tree);
        Ok(tree)
    })
}

/// `/macroCTE`: owning source of every macro call in the request query
pub fn handle_macro_ctes(body: &[u8]) -> Envelope<Vec<CteRecord>> {
    guarded(|| {
        let request = decode::<QueryRequest>(body)?;
        let parsed = ParsedSql::parse(&request.data.query)?;
        let mut records: Vec<_> = macro_ctes(&parsed)?.into_values().collect();
        records.sort_by_key(|record| record.macro_pos);
        Ok(records)
    })
}

/// `/interpolate`: final SQL of the request query model
pub async fn handle_interpolate<C: Connection>(
    interpolator: &Interpolator<C>,
    scope: &Scope,
    body: &[u8]
) -> Envelope<String> {
    let result = async {
        let request = decode::<InterpolateRequest>(body)?.data;
        let context = QueryContext::from_model(
            request.query,
            TimeRange::new(request.from, request.to),
            Duration::from_millis(request.interval_ms)
        );
        interpolator.interpolate(&context, scope).await
    }
    .await;
    Envelope::from_result(result)
}

fn decode<T: for<'de> Deserialize<'de>>(body: &[u8]) -> AppResult<T> {
    serde_json::from_slice(body)
        .map_err(|e| AppError::bad_request(format!("Invalid request body: {}", e)))
}

fn guarded<T>(handler: impl FnOnce() -> AppResult<T>) -> Envelope<T> {
    match catch_unwind(AssertUnwindSafe(handler)) {
        Ok(result) => Envelope::from_result(result),
        Err(_) => Envelope::failure("Unknown Error")
    }
}

fn unmask_strings(value: &mut Value) {
    match value {
        Value::String(text) => {
            if let Cow::Owned(unmasked) = unmask_macros(text) {
                *text = unmasked;
            }
        }
        Value::Array(items) => items.iter_mut().for_each(unmask_strings),
        Value::Object(fields) => fields.values_mut().for_each(unmask_strings),
        _ => {}
    }
}
