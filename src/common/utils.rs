// src/common/utils.rs
use crate::common::{Result, WiredExchangeError};
use rust_decimal::Decimal;
use std::str::FromStr;

// Parse a string to a Decimal, return a WiredExchangeError if the parsing fails
pub fn parse_decimal(value: &str, field_name: &str) -> Result<Decimal> {
    Decimal::from_str(value)
        .map_err(|_| WiredExchangeError::ApiError(format!("Invalid {} format", field_name)))
}

// Parse a string to an i64, return a WiredExchangeError if the parsing fails
pub fn parse_i64(value: &str, field_name: &str) -> Result<i64> {
    value
        .parse::<i64>()
        .map_err(|_| WiredExchangeError::ApiError(format!("Invalid {} format", field_name)))
}

// get timestamp in milliseconds
pub fn get_timestamp_millis() -> u64 {
    chrono::Utc::now()
        .timestamp_millis()
        .try_into()
        .unwrap_or(0)
}

/// Splits a `BASE-QUOTE` symbol into its two currencies.
pub fn split_symbol(symbol: &str) -> Result<(String, String)> {
    match symbol.split_once('-') {
        Some((base, quote)) if !base.is_empty() && !quote.is_empty() => {
            Ok((base.to_uppercase(), quote.to_uppercase()))
        }
        _ => Err(WiredExchangeError::InvalidSymbol(format!(
            "expected BASE-QUOTE, got: {}",
            symbol
        ))),
    }
}
