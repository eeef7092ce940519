//! Column value validation and coercion
//!
//! Values reach a model either as JSON (request bodies) or as raw strings
//! (query-string filters). Both are checked against the column type and
//! normalized, so that the store only ever holds well-typed JSON.

use crate::core::error::{ApiError, ApiResult};
use crate::core::schema::{Column, ColumnType};
use chrono::{NaiveDate, NaiveDateTime};
use serde_json::{Number, Value};
use std::cmp::Ordering;

/// MySQL-style "zero" datetime, accepted as-is
const ZERO_DATETIME: &str = "0000-00-00T00:00:00";

/// Canonical storage format for datetimes (`%.f` is omitted for whole seconds)
const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Validate a JSON value for `column`, returning the normalized value
pub fn validate(attribute: &str, column: &Column, value: &Value) -> ApiResult<Value> {
    if value.is_null() {
        if column.nullable || column.primary_key {
            return Ok(Value::Null);
        }
        return Err(ApiError::attribute_wrong(attribute, "may not be null"));
    }

    match &column.column_type {
        ColumnType::Integer => validate_integer(attribute, value),
        ColumnType::Float | ColumnType::Decimal => validate_float(attribute, value),
        ColumnType::String { max_length } => {
            let s = validate_string(attribute, value)?;
            if let Some(max) = max_length
                && s.chars().count() > *max
            {
                return Err(ApiError::attribute_wrong(
                    attribute,
                    format!("\"{}\" is longer than {} characters", s, max),
                ));
            }
            Ok(Value::String(s.to_string()))
        }
        ColumnType::Text => Ok(Value::String(validate_string(attribute, value)?.to_string())),
        ColumnType::Boolean => validate_boolean(attribute, value),
        ColumnType::DateTime => validate_datetime(attribute, value),
        ColumnType::Enum { values } => validate_enum(attribute, values, value),
        ColumnType::Json => Ok(value.clone()),
    }
}

/// Coerce a raw query-string value to the column type
///
/// Used by filters, where every value arrives as a string.
pub fn parse_query_value(attribute: &str, column: &Column, raw: &str) -> ApiResult<Value> {
    match &column.column_type {
        // Json columns compare against whatever the literal parses to
        ColumnType::Json => {
            Ok(serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string())))
        }
        _ => {
            let mut column = column.clone();
            // A filter never writes, so length limits don't apply
            if let ColumnType::String { max_length } = &mut column.column_type {
                *max_length = None;
            }
            validate(attribute, &column, &Value::String(raw.to_string()))
        }
    }
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn validate_integer(attribute: &str, value: &Value) -> ApiResult<Value> {
    match value {
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map(|n| Value::Number(n.into()))
            .map_err(|_| {
                ApiError::attribute_wrong(attribute, format!("\"{}\" is not a valid number", s))
            }),
        Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value.clone()),
        other => Err(ApiError::attribute_wrong(
            attribute,
            format!("\"{}\" has to be a number", display(other)),
        )),
    }
}

fn validate_float(attribute: &str, value: &Value) -> ApiResult<Value> {
    let parsed = match value {
        Value::String(s) => s.trim().parse::<f64>().map_err(|_| {
            ApiError::attribute_wrong(attribute, format!("\"{}\" is not a valid float", s))
        })?,
        Value::Number(n) => n.as_f64().unwrap_or(f64::NAN),
        other => {
            return Err(ApiError::attribute_wrong(
                attribute,
                format!("\"{}\" has to be a float", display(other)),
            ));
        }
    };

    Number::from_f64(parsed).map(Value::Number).ok_or_else(|| {
        ApiError::attribute_wrong(attribute, format!("\"{}\" is not a valid float", display(value)))
    })
}

fn validate_string<'a>(attribute: &str, value: &'a Value) -> ApiResult<&'a str> {
    value.as_str().ok_or_else(|| {
        ApiError::attribute_wrong(attribute, format!("\"{}\" is not a string", display(value)))
    })
}

fn validate_boolean(attribute: &str, value: &Value) -> ApiResult<Value> {
    let parsed = match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.to_ascii_lowercase().as_str() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        },
        Value::Number(n) => match n.as_i64() {
            Some(1) => Some(true),
            Some(0) => Some(false),
            _ => None,
        },
        _ => None,
    };

    parsed.map(Value::Bool).ok_or_else(|| {
        ApiError::attribute_wrong(attribute, format!("\"{}\" is not a boolean", display(value)))
    })
}

fn validate_enum(attribute: &str, values: &[String], value: &Value) -> ApiResult<Value> {
    match value.as_str() {
        Some(s) if values.iter().any(|v| v == s) => Ok(value.clone()),
        _ => Err(ApiError::attribute_wrong(
            attribute,
            format!("\"{}\" is not one of: {}.", display(value), values.join(", ")),
        )),
    }
}

fn validate_datetime(attribute: &str, value: &Value) -> ApiResult<Value> {
    let Some(raw) = value.as_str() else {
        return Err(ApiError::attribute_wrong(attribute, "Datetime must be a string"));
    };

    if raw == ZERO_DATETIME {
        return Ok(value.clone());
    }

    parse_datetime(attribute, raw).map(|dt| Value::String(dt.format(DATETIME_FORMAT).to_string()))
}

/// Parse `YYYY-MM-DD[( |T)HH:MM:SS[.ffffff]][Z|+00:00]` as a UTC datetime
pub fn parse_datetime(attribute: &str, raw: &str) -> ApiResult<NaiveDateTime> {
    let normalized = raw.replace('T', " ").replace('Z', "+");
    let (local, tz) = normalized
        .split_once('+')
        .unwrap_or((normalized.as_str(), ""));

    if !tz.trim_matches(|c| c == '0' || c == ':').is_empty() {
        return Err(ApiError::attribute_wrong(
            attribute,
            "Only UTC (+0000) datetimes supported",
        ));
    }

    let mut local = local.trim_end().to_string();
    // Sub-microsecond precision is dropped
    if let Some((_, fraction)) = local.split_once('.')
        && fraction.len() > 6
    {
        let excess = fraction.len() - 6;
        local.truncate(local.len() - excess);
    }

    NaiveDateTime::parse_from_str(&local, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(&local, "%Y-%m-%d %H:%M:%S"))
        .or_else(|_| {
            NaiveDate::parse_from_str(&local, "%Y-%m-%d")
                .map(|d| d.and_hms_opt(0, 0, 0).unwrap_or_default())
        })
        .map_err(|_| {
            ApiError::attribute_wrong(attribute, format!("\"{}\" is not a valid datetime", raw))
        })
}

/// Order two JSON values of the same kind
///
/// Numbers compare numerically, strings lexically and booleans with
/// `false < true`. Mixed or composite values are unordered.
pub fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => x.as_f64()?.partial_cmp(&y.as_f64()?),
        },
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Equality with numeric coercion (`1 == 1.0`)
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match compare(a, b) {
        Some(ordering) => ordering == Ordering::Equal,
        None => a == b,
    }
}

/// Total order used for sorting: nulls first, then [`compare`], then the JSON text
pub fn sort_order(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let a = a.filter(|v| !v.is_null());
    let b = b.filter(|v| !v.is_null());
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => compare(a, b).unwrap_or_else(|| a.to_string().cmp(&b.to_string())),
    }
}

/// Read an id stored in a record value
pub fn as_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn err_message(result: ApiResult<Value>) -> String {
        result.unwrap_err().to_string()
    }

    #[test]
    fn test_integer() {
        let col = Column::integer();
        assert_eq!(validate("age", &col, &json!(3)).unwrap(), json!(3));
        assert_eq!(validate("age", &col, &json!("42")).unwrap(), json!(42));
        assert_eq!(
            err_message(validate("age", &col, &json!("abc"))),
            "Wrong attribute: age - \"abc\" is not a valid number"
        );
        assert_eq!(
            err_message(validate("age", &col, &json!(true))),
            "Wrong attribute: age - \"true\" has to be a number"
        );
        assert!(validate("age", &col, &json!(1.5)).is_err());
    }

    #[test]
    fn test_float_accepts_integers_and_strings() {
        let col = Column::float();
        assert_eq!(validate("price", &col, &json!(2)).unwrap(), json!(2.0));
        assert_eq!(validate("price", &col, &json!("2.5")).unwrap(), json!(2.5));
        assert!(validate("price", &col, &json!("cheap")).is_err());
        assert!(validate("price", &col, &json!(false)).is_err());
    }

    #[test]
    fn test_string_and_max_length() {
        let col = Column::string().max_length(3);
        assert_eq!(validate("code", &col, &json!("abc")).unwrap(), json!("abc"));
        assert!(validate("code", &col, &json!("abcd")).is_err());
        assert_eq!(
            err_message(validate("code", &col, &json!(12))),
            "Wrong attribute: code - \"12\" is not a string"
        );
    }

    #[test]
    fn test_boolean() {
        let col = Column::boolean();
        assert_eq!(validate("b", &col, &json!(true)).unwrap(), json!(true));
        assert_eq!(validate("b", &col, &json!("0")).unwrap(), json!(false));
        assert_eq!(validate("b", &col, &json!("True")).unwrap(), json!(true));
        assert!(validate("b", &col, &json!("yes")).is_err());
    }

    #[test]
    fn test_enum() {
        let col = Column::enumeration(["draft", "published"]);
        assert!(validate("state", &col, &json!("draft")).is_ok());
        assert_eq!(
            err_message(validate("state", &col, &json!("gone"))),
            "Wrong attribute: state - \"gone\" is not one of: draft, published."
        );
    }

    #[test]
    fn test_null_handling() {
        assert_eq!(
            validate("n", &Column::integer().nullable(), &Value::Null).unwrap(),
            Value::Null
        );
        assert_eq!(
            err_message(validate("n", &Column::integer(), &Value::Null)),
            "Wrong attribute: n - may not be null"
        );
    }

    #[test]
    fn test_datetime_formats() {
        let col = Column::datetime();
        let cases = [
            ("2020-01-02", "2020-01-02T00:00:00"),
            ("2020-01-02 03:04:05", "2020-01-02T03:04:05"),
            ("2020-01-02T03:04:05Z", "2020-01-02T03:04:05"),
            ("2020-01-02T03:04:05+00:00", "2020-01-02T03:04:05"),
            ("2020-01-02T03:04:05.123456", "2020-01-02T03:04:05.123456"),
            ("2020-01-02T03:04:05.123456789", "2020-01-02T03:04:05.123456"),
            (ZERO_DATETIME, ZERO_DATETIME),
        ];
        for (input, expected) in cases {
            assert_eq!(
                validate("at", &col, &json!(input)).unwrap(),
                json!(expected),
                "input {}",
                input
            );
        }
    }

    #[test]
    fn test_datetime_errors() {
        let col = Column::datetime();
        assert_eq!(
            err_message(validate("at", &col, &json!("2020-01-02T03:04:05+02:00"))),
            "Wrong attribute: at - Only UTC (+0000) datetimes supported"
        );
        assert_eq!(
            err_message(validate("at", &col, &json!("yesterday"))),
            "Wrong attribute: at - \"yesterday\" is not a valid datetime"
        );
        assert_eq!(
            err_message(validate("at", &col, &json!(12))),
            "Wrong attribute: at - Datetime must be a string"
        );
    }

    #[test]
    fn test_query_values() {
        assert_eq!(
            parse_query_value("id", &Column::integer(), "7").unwrap(),
            json!(7)
        );
        assert_eq!(
            parse_query_value("meta", &Column::json(), "{\"a\":1}").unwrap(),
            json!({"a": 1})
        );
        assert_eq!(
            parse_query_value("meta", &Column::json(), "plain").unwrap(),
            json!("plain")
        );
        // length limits only apply to writes
        assert!(parse_query_value("c", &Column::string().max_length(1), "long").is_ok());
    }

    #[test]
    fn test_compare_and_sort_order() {
        assert_eq!(compare(&json!(1), &json!(2)), Some(Ordering::Less));
        assert_eq!(compare(&json!(1), &json!(1.0)), Some(Ordering::Equal));
        assert_eq!(compare(&json!("b"), &json!("a")), Some(Ordering::Greater));
        assert_eq!(compare(&json!("1"), &json!(1)), None);
        assert!(values_equal(&json!(2), &json!(2.0)));
        assert!(values_equal(&json!([1]), &json!([1])));

        assert_eq!(sort_order(None, Some(&json!(0))), Ordering::Less);
        assert_eq!(sort_order(Some(&Value::Null), None), Ordering::Equal);
        assert_eq!(sort_order(Some(&json!(3)), Some(&json!(2))), Ordering::Greater);
    }
}
