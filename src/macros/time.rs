use chrono::{DateTime, Utc};

use super::{MacroCall, column_or_primary_key};
use crate::{
    connection::Connection,
    context::QueryContext,
    error::{AppResult, bad_argument_count}
};

/// Date literal, `toDate('2014-11-12')`
pub fn to_date(time: DateTime<Utc>) -> String {
    format!("toDate('{}')", time.format("%Y-%m-%d"))
}

/// Seconds-precision datetime literal
pub fn to_date_time(time: DateTime<Utc>) -> String {
    format!("toDateTime({})", time.timestamp())
}

/// Milliseconds-precision datetime literal
pub fn to_date_time64(time: DateTime<Utc>) -> String {
    format!("fromUnixTimestamp64Milli({})", time.timestamp_millis())
}

pub(super) async fn time_filter<C: Connection>(
    call: &MacroCall<'_, C>,
    literal: fn(DateTime<Utc>) -> String
) -> AppResult<String> {
    if call.args.len() > 1 {
        return Err(bad_argument_count("0 or 1 argument", call.args.len()));
    }
    let column = column_or_primary_key(call).await?;
    let range = call.context.time_range;
    Ok(format!(
        "{column} >= {} AND {column} <= {}",
        literal(range.from),
        literal(range.to)
    ))
}

pub(super) fn date_filter<C>(call: &MacroCall<'_, C>) -> AppResult<String> {
    let [column] = call.args else {
        return Err(bad_argument_count("1 argument", call.args.len()));
    };
    let range = call.context.time_range;
    Ok(format!(
        "{column} >= {} AND {column} <= {}",
        to_date(range.from),
        to_date(range.to)
    ))
}

pub(super) fn date_time_filter<C>(call: &MacroCall<'_, C>) -> AppResult<String> {
    let [date_column, time_column] = call.args else {
        return Err(bad_argument_count("2 arguments", call.args.len()));
    };
    let range = call.context.time_range;
    Ok(format!(
        "({date_column} >= {} AND {date_column} <= {}) AND ({time_column} >= {} AND {time_column} <= {})",
        to_date(range.from),
        to_date(range.to),
        to_date_time(range.from),
        to_date_time(range.to)
    ))
}

pub(super) async fn time_interval<C: Connection>(call: &MacroCall<'_, C>) -> AppResult<String> {
    if call.args.len() > 1 {
        return Err(bad_argument_count("0 or 1 argument", call.args.len()));
    }
    let column = column_or_primary_key(call).await?;
    Ok(format!(
        "toStartOfInterval(toDateTime({}), INTERVAL {} second)",
        column,
        interval_seconds(call.context)
    ))
}

pub(super) async fn time_interval_ms<C: Connection>(call: &MacroCall<'_, C>) -> AppResult<String> {
    if call.args.len() > 1 {
        return Err(bad_argument_count("0 or 1 argument", call.args.len()));
    }
    let column = column_or_primary_key(call).await?;
    Ok(format!(
        "toStartOfInterval(toDateTime64({}, 3), INTERVAL {} millisecond)",
        column,
        call.context.interval.as_millis().max(1)
    ))
}

/// Whole seconds of the query interval, at least 1
pub(super) fn interval_seconds(context: &QueryContext) -> u64 {
    context.interval.as_secs().max(1)
}
