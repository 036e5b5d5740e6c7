//! Macro interpolation.
//!
//! The [`Interpolator`] rewrites raw SQL by replacing every macro call with
//! the fragment its function produces.
//!
//! # Algorithm
//!
//! 1. Round the time range when the context asks for it
//! 2. Find calls of every registered macro in the original SQL, longest
//!    names first so `$__timeFilter_ms` is never taken for `$__timeFilter`
//! 3. Substitute right to left, so byte offsets of calls not yet processed
//!    stay valid while earlier text keeps its length
//!
//! Each function sees the SQL as rewritten so far. Any failure aborts the
//! whole interpolation; callers never receive partially rewritten SQL.
//! [`Interpolator::try_interpolate`] hands back the original SQL alongside
//! the error.
//!
//! # Example
//!
//! ```
//! use std::{sync::Arc, time::Duration};
//!
//! use chmacro::{
//!     connection::OfflineConnection,
//!     context::{QueryContext, TimeRange},
//!     interpolator::Interpolator,
//!     macros::MacroRegistry,
//!     metadata::MetadataProvider,
//!     scope::Scope
//! };
//!
//! # #[tokio::main]
//! # async fn main() {
//! let interpolator = Interpolator::new(
//!     Arc::new(MacroRegistry::builtin()),
//!     MetadataProvider::new(OfflineConnection::new("default"))
//! );
//! let range = TimeRange::from_millis(1415792726371, 1447328726371).unwrap();
//! let ctx = QueryContext::new(
//!     "SELECT $__timeInterval(ts), count() FROM logs WHERE $__timeFilter(ts) GROUP BY 1",
//!     range,
//!     Duration::from_secs(20)
//! );
//!
//! let sql = interpolator.interpolate(&ctx, &Scope::unbounded()).await.unwrap();
//! assert_eq!(
//!     sql,
//!     "SELECT toStartOfInterval(toDateTime(ts), INTERVAL 20 second), count() FROM logs \
//!      WHERE ts >= toDateTime(1415792726) AND ts <= toDateTime(1447328726) GROUP BY 1"
//! );
//! # }
//! ```

use std::sync::Arc;

use rayon::prelude::*;
use tracing::debug;

use crate::{
    connection::Connection,
    context::QueryContext,
    error::{AppError, AppResult},
    macros::{MacroCall, MacroRegistry},
    matcher::MacroMatch,
    metadata::MetadataProvider,
    scope::Scope
};

/// Failed interpolation with the SQL as it was before any substitution.
#[derive(Debug)]
pub struct InterpolationError {
    pub original_sql: String,
    pub error:        AppError
}

impl From<InterpolationError> for AppError {
    fn from(failure: InterpolationError) -> Self {
        failure.error
    }
}

pub struct Interpolator<C> {
    registry: Arc<MacroRegistry>,
    metadata: MetadataProvider<C>
}

impl<C: Connection> Interpolator<C> {
    pub fn new(registry: Arc<MacroRegistry>, metadata: MetadataProvider<C>) -> Self {
        Self {
            registry,
            metadata
        }
    }

    pub fn registry(&self) -> &MacroRegistry {
        &self.registry
    }

    pub fn metadata(&self) -> &MetadataProvider<C> {
        &self.metadata
    }

    /// Every macro call in `sql`, rightmost first
    pub fn find_matches(&self, sql: &str) -> AppResult<Vec<MacroMatch>> {
        let names = self.registry.names_by_length();
        let per_name = names
            .par_iter()
            .filter_map(|name| self.registry.get(name))
            .map(|entry| entry.matcher.find(sql))
            .collect::<AppResult<Vec<_>>>()?;
        let mut matches: Vec<MacroMatch> = per_name.into_iter().flatten().collect();
        matches.sort_by(|a, b| b.position.cmp(&a.position));
        Ok(matches)
    }

    /// Final SQL for `context`; `context` itself is left untouched.
    pub async fn interpolate(&self, context: &QueryContext, scope: &Scope) -> AppResult<String> {
        Ok(self.try_interpolate(context, scope).await?)
    }

    /// Like [`Self::interpolate`], but a failure also returns the original SQL.
    pub async fn try_interpolate(
        &self,
        context: &QueryContext,
        scope: &Scope
    ) -> Result<String, InterpolationError> {
        self.substitute_all(context, scope)
            .await
            .map_err(|error| InterpolationError {
                original_sql: context.raw_sql.clone(),
                error
            })
    }

    async fn substitute_all(&self, context: &QueryContext, scope: &Scope) -> AppResult<String> {
        let rounded = context.rounded();
        let context = rounded.as_ref().unwrap_or(context);
        let matches = self.find_matches(&context.raw_sql)?;

        let mut sql = context.raw_sql.clone();
        for found in matches {
            let entry = self.registry.get(&found.name).ok_or_else(|| {
                AppError::internal(format!("macro '{}' is not registered", found.name))
            })?;
            let current = context.with_sql(sql.as_str());
            let call = MacroCall {
                context:  &current,
                args:     &found.args,
                position: found.position,
                metadata: &self.metadata,
                scope
            };
            let fragment = entry.function.expand(&call).await?;
            debug!(
                name = %found.name,
                position = found.position,
                fragment = %fragment,
                "Macro substituted"
            );
            let (head, tail) = sql.split_at(found.position);
            sql = format!("{}{}", head, tail.replacen(&found.full, &fragment, 1));
        }
        Ok(sql)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        connection::OfflineConnection,
        context::TimeRange,
        error::error_message
    };

    fn interpolator() -> Interpolator<OfflineConnection> {
        Interpolator::new(
            Arc::new(MacroRegistry::builtin()),
            MetadataProvider::new(OfflineConnection::new("default"))
        )
    }

    fn context(sql: &str) -> QueryContext {
        let range = TimeRange::from_millis(1415792726371, 1447328726371).unwrap();
        QueryContext::new(sql, range, Duration::from_secs(20))
    }

    #[test]
    fn test_matches_sorted_right_to_left() {
        let matches = interpolator()
            .find_matches("$__fromTime $__toTime_ms $__timeFilter_ms(x) $__timeFilter(y)")
            .unwrap();
        let names: Vec<_> = matches.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, ["timeFilter", "timeFilter_ms", "toTime_ms", "fromTime"]);
    }

    #[tokio::test]
    async fn test_same_macro_twice() {
        let sql = interpolator()
            .interpolate(
                &context("SELECT $__fromTime AS a, $__fromTime AS b"),
                &Scope::unbounded()
            )
            .await
            .unwrap();
        assert_eq!(sql, "SELECT toDateTime(1415792726) AS a, toDateTime(1415792726) AS b");
    }

    #[tokio::test]
    async fn test_unclosed_args_abort() {
        let ctx = context("SELECT * FROM t WHERE $__timeFilter(arg1, arg2");
        let err = interpolator()
            .interpolate(&ctx, &Scope::unbounded())
            .await
            .unwrap_err();
        assert!(error_message(&err).starts_with("failed to parse macro arguments"));
    }

    #[tokio::test]
    async fn test_failure_returns_original_sql() {
        let raw = "SELECT $__fromTime, $__dateFilter(a, b, c) FROM t";
        let failure = interpolator()
            .try_interpolate(&context(raw), &Scope::unbounded())
            .await
            .unwrap_err();
        assert_eq!(failure.original_sql, raw);
        assert_eq!(
            error_message(&failure.error),
            "unexpected number of arguments: expected 1 argument, received 3"
        );
    }

    #[tokio::test]
    async fn test_try_interpolate_success() {
        let sql = interpolator()
            .try_interpolate(&context("SELECT $__toTime"), &Scope::unbounded())
            .await
            .unwrap();
        assert_eq!(sql, "SELECT toDateTime(1447328726)");
    }

    #[tokio::test]
    async fn test_rounding_applied() {
        let ctx = context("SELECT $__fromTime, $__toTime").with_round("1m");
        let sql = interpolator()
            .interpolate(&ctx, &Scope::unbounded())
            .await
            .unwrap();
        assert_eq!(sql, "SELECT toDateTime(1415792700), toDateTime(1447328700)");
    }

    #[tokio::test]
    async fn test_no_macros() {
        let sql = interpolator()
            .interpolate(&context("SELECT 1"), &Scope::unbounded())
            .await
            .unwrap();
        assert_eq!(sql, "SELECT 1");
    }
}
