/*
[INPUT]:  Positional JSON arrays from REST bodies and stream frames
[OUTPUT]: Typed Trade / Candle / Ticker records
[POS]:    Wire codec - pure decoding, no I/O
[UPDATE]: When the exchange changes field order or arity
*/

//! Positional array decoding.
//!
//! | record | layout                                                      |
//! |--------|-------------------------------------------------------------|
//! | trade  | `[ID, MTS, AMOUNT, PRICE]`                                  |
//! | candle | `[MTS, OPEN, CLOSE, HIGH, LOW, VOLUME]`                     |
//! | ticker | `[BID, BID_SIZE, ASK, ASK_SIZE, DAILY_CHANGE, DAILY_CHANGE_RELATIVE, LAST_PRICE, VOLUME, HIGH, LOW]` |

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;

use crate::http::{BitfinexError, Result};
use crate::types::{Candle, Pair, Ticker, Trade};

const TRADE_ARITY: usize = 4;
const CANDLE_ARITY: usize = 6;
const TICKER_ARITY: usize = 10;

pub fn decode_trade(value: &Value, pair: &Pair) -> Result<Trade> {
    let fields = fields(value, TRADE_ARITY, "trade")?;
    let id = integer(&fields[0], "trade id")?;
    let time = timestamp(&fields[1], "trade mts")?;
    let amount = decimal(&fields[2], "trade amount")?;
    let price = decimal(&fields[3], "trade price")?;
    Ok(Trade::new(pair.clone(), id, time, price, amount))
}

pub fn decode_candle(value: &Value, pair: &Pair) -> Result<Candle> {
    let fields = fields(value, CANDLE_ARITY, "candle")?;
    Ok(Candle {
        pair: pair.clone(),
        open_time: timestamp(&fields[0], "candle mts")?,
        open: decimal(&fields[1], "candle open")?,
        close: decimal(&fields[2], "candle close")?,
        high: decimal(&fields[3], "candle high")?,
        low: decimal(&fields[4], "candle low")?,
        volume: decimal(&fields[5], "candle volume")?,
    })
}

pub fn decode_ticker(value: &Value, pair: &Pair) -> Result<Ticker> {
    let fields = fields(value, TICKER_ARITY, "ticker")?;
    Ok(Ticker {
        pair: pair.clone(),
        bid: decimal(&fields[0], "ticker bid")?,
        bid_size: decimal(&fields[1], "ticker bid size")?,
        ask: decimal(&fields[2], "ticker ask")?,
        ask_size: decimal(&fields[3], "ticker ask size")?,
        daily_change: decimal(&fields[4], "ticker daily change")?,
        daily_change_relative: decimal(&fields[5], "ticker daily change relative")?,
        last_price: decimal(&fields[6], "ticker last price")?,
        volume: decimal(&fields[7], "ticker volume")?,
        high: decimal(&fields[8], "ticker high")?,
        low: decimal(&fields[9], "ticker low")?,
    })
}

/// Decode every element of a JSON array with `decode`
pub fn decode_all<T>(
    value: &Value,
    pair: &Pair,
    decode: fn(&Value, &Pair) -> Result<T>,
) -> Result<Vec<T>> {
    let items = value
        .as_array()
        .ok_or_else(|| BitfinexError::malformed(format!("expected array, got {}", kind_of(value))))?;
    items.iter().map(|item| decode(item, pair)).collect()
}

fn fields<'a>(value: &'a Value, arity: usize, record: &str) -> Result<&'a [Value]> {
    let fields = value.as_array().ok_or_else(|| {
        BitfinexError::malformed(format!("{record}: expected array, got {}", kind_of(value)))
    })?;
    if fields.len() != arity {
        return Err(BitfinexError::malformed(format!(
            "{record}: expected {arity} fields, got {}",
            fields.len()
        )));
    }
    Ok(fields)
}

fn integer(value: &Value, field: &str) -> Result<i64> {
    value
        .as_i64()
        .ok_or_else(|| BitfinexError::malformed(format!("{field}: expected integer, got {value}")))
}

fn timestamp(value: &Value, field: &str) -> Result<DateTime<Utc>> {
    let millis = integer(value, field)?;
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| BitfinexError::malformed(format!("{field}: timestamp {millis} out of range")))
}

fn decimal(value: &Value, field: &str) -> Result<Decimal> {
    let raw = match value {
        Value::Number(number) => number.to_string(),
        Value::String(text) => text.trim().to_string(),
        other => {
            return Err(BitfinexError::malformed(format!(
                "{field}: expected decimal, got {}",
                kind_of(other)
            )));
        }
    };

    Decimal::from_str(&raw)
        .or_else(|_| Decimal::from_scientific(&raw))
        .map_err(|err| BitfinexError::malformed(format!("{field}: `{raw}` ({err})")))
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
