use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;
use tokio_postgres::{Client, Row};

use super::params::Params;
use crate::error::TxMiddlewareError;
use crate::results::ResultSet;
use crate::types::RowValues;

/// Run a parameterized read on `client` and collect it into a `ResultSet`.
///
/// # Errors
/// Returns the driver error unchanged if preparing or executing the query fails.
pub async fn build_result_set(
    client: &Client,
    query: &str,
    params: &[RowValues],
) -> Result<ResultSet, TxMiddlewareError> {
    let stmt = client.prepare(query).await?;
    let converted = Params::convert(params);
    let rows = client.query(&stmt, converted.as_refs()).await?;

    let column_names: Vec<String> = stmt
        .columns()
        .iter()
        .map(|col| col.name().to_string())
        .collect();
    let column_count = column_names.len();

    let mut result_set = ResultSet::with_capacity(rows.len());
    result_set.set_column_names(Arc::new(column_names));

    for row in &rows {
        let mut row_values = Vec::with_capacity(column_count);
        for idx in 0..column_count {
            row_values.push(postgres_extract_value(row, idx)?);
        }
        result_set.add_row_values(row_values);
    }

    Ok(result_set)
}

/// Execute a parameterized statement on `client`, returning the affected row count.
///
/// # Errors
/// Returns the driver error unchanged, or `ParameterError` if the count overflows `usize`.
pub async fn execute_on_client(
    client: &Client,
    query: &str,
    params: &[RowValues],
) -> Result<usize, TxMiddlewareError> {
    let converted = Params::convert(params);
    let rows = client.execute(query, converted.as_refs()).await?;
    usize::try_from(rows).map_err(|e| {
        TxMiddlewareError::ParameterError(format!("invalid rows affected count: {e}"))
    })
}

/// Extracts a `RowValues` from a `tokio_postgres` Row at the given index.
///
/// # Errors
/// Returns the driver error if the column cannot be decoded.
pub fn postgres_extract_value(row: &Row, idx: usize) -> Result<RowValues, TxMiddlewareError> {
    let type_name = row.columns()[idx].type_().name();

    let value = match type_name {
        "int2" => {
            let val: Option<i16> = row.try_get(idx)?;
            val.map_or(RowValues::Null, |v| RowValues::Int(i64::from(v)))
        }
        "int4" => {
            let val: Option<i32> = row.try_get(idx)?;
            val.map_or(RowValues::Null, |v| RowValues::Int(i64::from(v)))
        }
        "int8" => {
            let val: Option<i64> = row.try_get(idx)?;
            val.map_or(RowValues::Null, RowValues::Int)
        }
        "float4" => {
            let val: Option<f32> = row.try_get(idx)?;
            val.map_or(RowValues::Null, |v| RowValues::Float(f64::from(v)))
        }
        "float8" => {
            let val: Option<f64> = row.try_get(idx)?;
            val.map_or(RowValues::Null, RowValues::Float)
        }
        "bool" => {
            let val: Option<bool> = row.try_get(idx)?;
            val.map_or(RowValues::Null, RowValues::Bool)
        }
        "timestamp" => {
            let val: Option<NaiveDateTime> = row.try_get(idx)?;
            val.map_or(RowValues::Null, RowValues::Timestamp)
        }
        "timestamptz" => {
            let val: Option<DateTime<Utc>> = row.try_get(idx)?;
            val.map_or(RowValues::Null, |v| RowValues::Timestamp(v.naive_utc()))
        }
        "json" | "jsonb" => {
            let val: Option<Value> = row.try_get(idx)?;
            val.map_or(RowValues::Null, RowValues::JSON)
        }
        "bytea" => {
            let val: Option<Vec<u8>> = row.try_get(idx)?;
            val.map_or(RowValues::Null, RowValues::Blob)
        }
        // Everything else is read as text; types without a text decoding surface the driver error.
        _ => {
            let val: Option<String> = row.try_get(idx)?;
            val.map_or(RowValues::Null, RowValues::Text)
        }
    };
    Ok(value)
}
