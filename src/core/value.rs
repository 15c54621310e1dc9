use crate::core::{StoreError, StoreResult};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde_json::Value as JsonValue;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// A single attribute or column value.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
    Boolean(bool),
    Timestamp(DateTime<Utc>),
    Json(JsonValue),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Integer(_) => "INTEGER",
            Self::Float(_) => "FLOAT",
            Self::Text(_) => "TEXT",
            Self::Boolean(_) => "BOOLEAN",
            Self::Timestamp(_) => "TIMESTAMP",
            Self::Json(_) => "JSON",
        }
    }

    /// Truthiness used for identity checks: null, empty text and zero are falsy.
    pub fn as_bool(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Boolean(b) => *b,
            Self::Integer(i) => *i != 0,
            Self::Float(f) => *f != 0.0 && !f.is_nan(),
            Self::Text(s) => !s.is_empty(),
            Self::Timestamp(_) => true,
            Self::Json(json) => !json.is_null(),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            Self::Float(f) => {
                if f.is_finite() && *f >= i64::MIN as f64 && *f <= i64::MAX as f64 {
                    Some(*f as i64)
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Converts to the JSON shape used by `to_json` and by incoming payloads.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Self::Null => JsonValue::Null,
            Self::Integer(i) => JsonValue::from(*i),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Self::Text(s) => JsonValue::String(s.clone()),
            Self::Boolean(b) => JsonValue::Bool(*b),
            Self::Timestamp(ts) => {
                JsonValue::String(ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
            Self::Json(json) => json.clone(),
        }
    }

    /// Coerces an incoming JSON value into the declared attribute type.
    ///
    /// Accepts the loose shapes form payloads usually carry: numeric strings
    /// for integers, `"1"`/`"0"` for booleans, SQL-style timestamps.
    pub fn from_json(json: &JsonValue, data_type: &DataType) -> StoreResult<Self> {
        if json.is_null() {
            return Ok(Self::Null);
        }

        let coerced = match (data_type, json) {
            (DataType::Json, other) => Some(Self::Json(other.clone())),

            (DataType::Integer, JsonValue::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
                .map(Self::Integer),
            (DataType::Integer, JsonValue::String(s)) => {
                s.trim().parse::<i64>().ok().map(Self::Integer)
            }

            (DataType::Float, JsonValue::Number(n)) => n.as_f64().map(Self::Float),
            (DataType::Float, JsonValue::String(s)) => s.trim().parse::<f64>().ok().map(Self::Float),

            (DataType::Text, JsonValue::String(s)) => Some(Self::Text(s.clone())),
            (DataType::Text, JsonValue::Number(n)) => Some(Self::Text(n.to_string())),

            (DataType::Boolean, JsonValue::Bool(b)) => Some(Self::Boolean(*b)),
            (DataType::Boolean, JsonValue::Number(n)) => match n.as_i64() {
                Some(0) => Some(Self::Boolean(false)),
                Some(1) => Some(Self::Boolean(true)),
                _ => None,
            },
            (DataType::Boolean, JsonValue::String(s)) => match s.as_str() {
                "1" | "true" => Some(Self::Boolean(true)),
                "0" | "false" | "" => Some(Self::Boolean(false)),
                _ => None,
            },

            (DataType::Timestamp, JsonValue::String(s)) => parse_timestamp(s).map(Self::Timestamp),

            _ => None,
        };

        coerced.ok_or_else(|| {
            StoreError::TypeMismatch(format!("cannot read {} as {}", json, data_type))
        })
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Integer(a), Self::Integer(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => {
                if a.is_nan() && b.is_nan() {
                    return true;
                }
                (a - b).abs() < f64::EPSILON
            }
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::Timestamp(a), Self::Timestamp(b)) => a == b,
            (Self::Json(a), Self::Json(b)) => a == b,
            (Self::Integer(i), Self::Float(f)) | (Self::Float(f), Self::Integer(i)) => {
                (*i as f64 - f).abs() < f64::EPSILON
            }
            _ => false,
        }
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Null, Self::Null) => Some(Ordering::Equal),
            (Self::Null, _) => Some(Ordering::Less),
            (_, Self::Null) => Some(Ordering::Greater),

            (Self::Integer(a), Self::Integer(b)) => a.partial_cmp(b),
            (Self::Float(a), Self::Float(b)) => a.partial_cmp(b),
            (Self::Integer(i), Self::Float(f)) => (*i as f64).partial_cmp(f),
            (Self::Float(f), Self::Integer(i)) => f.partial_cmp(&(*i as f64)),

            (Self::Text(a), Self::Text(b)) => a.partial_cmp(b),
            (Self::Boolean(a), Self::Boolean(b)) => a.partial_cmp(b),
            (Self::Timestamp(a), Self::Timestamp(b)) => a.partial_cmp(b),

            _ => None,
        }
    }
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::Null => 0u8.hash(state),
            Self::Integer(i) => {
                1u8.hash(state);
                i.hash(state);
            }
            Self::Float(f) => {
                2u8.hash(state);
                f.to_bits().hash(state);
            }
            Self::Text(s) => {
                3u8.hash(state);
                s.hash(state);
            }
            Self::Boolean(b) => {
                4u8.hash(state);
                b.hash(state);
            }
            Self::Timestamp(ts) => {
                5u8.hash(state);
                ts.hash(state);
            }
            Self::Json(json) => {
                6u8.hash(state);
                json.to_string().hash(state);
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Integer(i) => write!(f, "{}", i),
            Self::Float(fl) => write!(f, "{}", fl),
            Self::Text(s) => write!(f, "{}", s),
            Self::Boolean(b) => write!(f, "{}", b),
            Self::Timestamp(ts) => write!(f, "{}", ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            Self::Json(json) => write!(f, "{}", json),
        }
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(ts: DateTime<Utc>) -> Self {
        Self::Timestamp(ts)
    }
}

impl From<JsonValue> for Value {
    fn from(json: JsonValue) -> Self {
        Self::Json(json)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Integer,
    Float,
    Text,
    Boolean,
    Timestamp,
    Json,
}

impl DataType {
    pub fn is_compatible(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (_, Value::Null)
                | (Self::Integer, Value::Integer(_))
                | (Self::Float, Value::Float(_))
                | (Self::Float, Value::Integer(_))
                | (Self::Text, Value::Text(_))
                | (Self::Boolean, Value::Boolean(_))
                | (Self::Timestamp, Value::Timestamp(_))
                | (Self::Json, Value::Json(_))
        )
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer => write!(f, "INTEGER"),
            Self::Float => write!(f, "FLOAT"),
            Self::Text => write!(f, "TEXT"),
            Self::Boolean => write!(f, "BOOLEAN"),
            Self::Timestamp => write!(f, "TIMESTAMP"),
            Self::Json => write!(f, "JSON"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_value_equality() {
        assert_eq!(Value::Integer(42), Value::Integer(42));
        assert_eq!(Value::Float(3.5), Value::Float(3.5));
        assert_eq!(Value::Integer(2), Value::Float(2.0));
        assert_ne!(Value::Integer(1), Value::Integer(2));
        assert_ne!(Value::Text("1".into()), Value::Integer(1));
    }

    #[test]
    fn test_value_ordering() {
        assert!(Value::Integer(1) < Value::Integer(2));
        assert!(Value::Text("a".into()) < Value::Text("b".into()));
        assert!(Value::Null < Value::Integer(0));
    }

    #[test]
    fn test_type_compatibility() {
        assert!(DataType::Integer.is_compatible(&Value::Integer(42)));
        assert!(DataType::Integer.is_compatible(&Value::Null));
        assert!(!DataType::Integer.is_compatible(&Value::Text("hello".into())));
        assert!(DataType::Json.is_compatible(&Value::Json(json!({"a": 1}))));
    }

    #[test]
    fn test_from_json_coerces_loose_payloads() {
        assert_eq!(
            Value::from_json(&json!("12"), &DataType::Integer).unwrap(),
            Value::Integer(12)
        );
        assert_eq!(
            Value::from_json(&json!(1), &DataType::Boolean).unwrap(),
            Value::Boolean(true)
        );
        assert_eq!(
            Value::from_json(&json!(null), &DataType::Text).unwrap(),
            Value::Null
        );
        assert!(Value::from_json(&json!("abc"), &DataType::Integer).is_err());
        assert!(Value::from_json(&json!([1]), &DataType::Text).is_err());
    }

    #[test]
    fn test_timestamp_json_round_trip() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        let json = Value::Timestamp(ts).to_json();
        assert_eq!(
            Value::from_json(&json, &DataType::Timestamp).unwrap(),
            Value::Timestamp(ts)
        );
        assert_eq!(
            Value::from_json(&json!("2024-03-01 12:30:00"), &DataType::Timestamp).unwrap(),
            Value::Timestamp(ts)
        );
    }
}
