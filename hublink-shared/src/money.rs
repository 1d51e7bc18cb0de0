//! Helpers for the loosely typed numbers commerce backends send.
//!
//! Prices, totals and weights arrive either as JSON numbers or as strings
//! (`"12.50"`, `""`). Everything is normalised to `Decimal`.

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::str::FromStr;

/// Round a monetary amount to 2 decimal places, half away from zero.
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Parse a JSON value that may be a number, a numeric string, or empty.
pub fn decimal_from_value(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(Decimal::from(i))
            } else {
                n.as_f64().and_then(Decimal::from_f64)
            }
        }
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Decimal::from_str(trimmed).ok()
            }
        }
        _ => None,
    }
}

/// Lenient decimal: number, numeric string, empty string or null (-> zero).
pub fn lenient_decimal<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::Null => Ok(Decimal::ZERO),
        Value::String(ref s) if s.trim().is_empty() => Ok(Decimal::ZERO),
        other => decimal_from_value(&other)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid decimal: {}", other))),
    }
}

/// Lenient optional decimal: missing, null or empty string -> `None`.
pub fn lenient_decimal_opt<'de, D>(deserializer: D) -> Result<Option<Decimal>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(decimal_from_value))
}

/// Ids that are numeric in one backend and strings in another.
pub fn lenient_string_opt<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Line {
        #[serde(deserialize_with = "lenient_decimal")]
        price: Decimal,
        #[serde(default, deserialize_with = "lenient_decimal_opt")]
        weight: Option<Decimal>,
        #[serde(default, deserialize_with = "lenient_string_opt")]
        id: Option<String>,
    }

    #[test]
    fn test_accepts_strings_and_numbers() {
        let line: Line = serde_json::from_str(r#"{"price": "12.50", "weight": 1.5, "id": 42}"#).unwrap();
        assert_eq!(line.price, Decimal::from_str("12.50").unwrap());
        assert_eq!(line.weight, Some(Decimal::from_str("1.5").unwrap()));
        assert_eq!(line.id.as_deref(), Some("42"));

        let line: Line = serde_json::from_str(r#"{"price": "", "weight": ""}"#).unwrap();
        assert_eq!(line.price, Decimal::ZERO);
        assert_eq!(line.weight, None);
        assert_eq!(line.id, None);
    }

    #[test]
    fn test_round_money() {
        assert_eq!(round_money(Decimal::from_str("2687.505").unwrap()), Decimal::from_str("2687.51").unwrap());
        assert_eq!(round_money(Decimal::from_str("3000").unwrap()), Decimal::from(3000));
    }
}
