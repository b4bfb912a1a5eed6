//! Keyword value types and coercion.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::error::RulesError;

/// Storage type of an extracted keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeywordType {
    #[default]
    String,
    Integer,
    Float,
    /// Normalized to an RFC 3339 UTC string
    Date,
    Boolean,
}

impl KeywordType {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeywordType::String => "string",
            KeywordType::Integer => "integer",
            KeywordType::Float => "float",
            KeywordType::Date => "date",
            KeywordType::Boolean => "boolean",
        }
    }

    /// Convert a JSON value to this keyword type.
    pub fn coerce(&self, value: &Value) -> Result<Value, RulesError> {
        let fail = || {
            RulesError::Conversion(format!("cannot convert {} to {}", value, self.as_str()))
        };
        match self {
            KeywordType::String => Ok(match value {
                Value::String(_) => value.clone(),
                other => Value::String(other.to_string()),
            }),
            KeywordType::Integer => match value {
                Value::Number(n) => n
                    .as_i64()
                    .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
                    .map(Value::from)
                    .ok_or_else(fail),
                Value::String(s) => s.trim().parse::<i64>().map(Value::from).map_err(|_| fail()),
                _ => Err(fail()),
            },
            KeywordType::Float => match value {
                Value::Number(n) => n.as_f64().map(Value::from).ok_or_else(fail),
                Value::String(s) => s.trim().parse::<f64>().map(Value::from).map_err(|_| fail()),
                _ => Err(fail()),
            },
            KeywordType::Date => match value {
                Value::String(s) => parse_date(s).map(Value::String).ok_or_else(fail),
                Value::Number(n) => n
                    .as_i64()
                    .and_then(DateTime::<Utc>::from_timestamp_millis)
                    .map(|d| Value::String(d.to_rfc3339()))
                    .ok_or_else(fail),
                _ => Err(fail()),
            },
            KeywordType::Boolean => match value {
                Value::Bool(_) => Ok(value.clone()),
                Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                    "true" => Ok(Value::Bool(true)),
                    "false" => Ok(Value::Bool(false)),
                    _ => Err(fail()),
                },
                _ => Err(fail()),
            },
        }
    }
}

fn parse_date(s: &str) -> Option<String> {
    if let Ok(d) = DateTime::parse_from_rfc3339(s) {
        return Some(d.with_timezone(&Utc).to_rfc3339());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|d| d.and_utc().to_rfc3339())
}

impl fmt::Display for KeywordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeywordType {
    type Err = RulesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "string" => Ok(KeywordType::String),
            "integer" => Ok(KeywordType::Integer),
            "float" => Ok(KeywordType::Float),
            "date" => Ok(KeywordType::Date),
            "boolean" => Ok(KeywordType::Boolean),
            other => Err(RulesError::InvalidRule(format!("unknown keyword type: {}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_integer_coercion() {
        assert_eq!(KeywordType::Integer.coerce(&json!(5)).unwrap(), json!(5));
        assert_eq!(KeywordType::Integer.coerce(&json!(" 42 ")).unwrap(), json!(42));
        assert_eq!(KeywordType::Integer.coerce(&json!(3.0)).unwrap(), json!(3));
        assert!(KeywordType::Integer.coerce(&json!(3.5)).is_err());
        assert!(KeywordType::Integer.coerce(&json!("x")).is_err());
    }

    #[test]
    fn test_string_coercion() {
        assert_eq!(KeywordType::String.coerce(&json!("a")).unwrap(), json!("a"));
        assert_eq!(KeywordType::String.coerce(&json!(12)).unwrap(), json!("12"));
    }

    #[test]
    fn test_date_coercion() {
        assert_eq!(
            KeywordType::Date.coerce(&json!("2020-01-02")).unwrap(),
            json!("2020-01-02T00:00:00+00:00")
        );
        assert_eq!(
            KeywordType::Date.coerce(&json!(0)).unwrap(),
            json!("1970-01-01T00:00:00+00:00")
        );
        assert!(KeywordType::Date.coerce(&json!("yesterday")).is_err());
    }

    #[test]
    fn test_boolean_and_float() {
        assert_eq!(KeywordType::Boolean.coerce(&json!("TRUE")).unwrap(), json!(true));
        assert!(KeywordType::Boolean.coerce(&json!(1)).is_err());
        assert_eq!(KeywordType::Float.coerce(&json!("1.5")).unwrap(), json!(1.5));
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("date".parse::<KeywordType>().unwrap(), KeywordType::Date);
        assert!("long".parse::<KeywordType>().is_err());
    }
}
