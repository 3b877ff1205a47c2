//! Metric value model
//!
//! A metric holds one of three shapes: a number, a string, or an opaque
//! structured value (mappings, sequences, booleans, null, nesting).

use std::cmp::Ordering;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::CodecError;

/// Numeric metric payload.
#[derive(Debug, Clone, Copy)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    pub fn as_f64(self) -> f64 {
        match self {
            Number::Int(i) => i as f64,
            Number::Float(f) => f,
        }
    }

    pub fn as_i64(self) -> Option<i64> {
        match self {
            Number::Int(i) => Some(i),
            Number::Float(_) => None,
        }
    }

    pub fn is_zero(self) -> bool {
        match self {
            Number::Int(i) => i == 0,
            Number::Float(f) => f == 0.0,
        }
    }
}

impl PartialEq for Number {
    fn eq(&self, other: &Self) -> bool {
        self.partial_cmp(other) == Some(Ordering::Equal)
    }
}

impl PartialOrd for Number {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => Some(a.cmp(b)),
            (a, b) => a.as_f64().partial_cmp(&b.as_f64()),
        }
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Number::Int(i) => write!(f, "{}", i),
            Number::Float(v) => write!(f, "{}", v),
        }
    }
}

macro_rules! number_from_int {
    ($($t:ty),*) => {
        $(impl From<$t> for Number {
            fn from(v: $t) -> Self {
                Number::Int(v as i64)
            }
        })*
    };
}

number_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<f64> for Number {
    fn from(v: f64) -> Self {
        Number::Float(v)
    }
}

impl From<f32> for Number {
    fn from(v: f32) -> Self {
        Number::Float(v as f64)
    }
}

/// A metric value as seen by callers of the collector.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    Number(Number),
    Text(String),
    /// Structured value stored as a versioned serialized blob.
    Opaque(serde_json::Value),
}

impl MetricValue {
    /// Wrap any serializable value, keeping bare numbers and strings primitive.
    pub fn from_serialize<T: Serialize>(value: &T) -> Result<Self, CodecError> {
        Ok(Self::from(serde_json::to_value(value)?))
    }

    /// Read the value back as a structure.
    pub fn to_structure<T: DeserializeOwned>(&self) -> Option<T> {
        let json = match self {
            MetricValue::Number(Number::Int(i)) => serde_json::Value::from(*i),
            MetricValue::Number(Number::Float(f)) => serde_json::Value::from(*f),
            MetricValue::Text(s) => serde_json::Value::from(s.as_str()),
            MetricValue::Opaque(v) => v.clone(),
        };
        serde_json::from_value(json).ok()
    }

    pub fn as_number(&self) -> Option<Number> {
        match self {
            MetricValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.as_number().and_then(Number::as_i64)
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.as_number().map(Number::as_f64)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetricValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<Number> for MetricValue {
    fn from(n: Number) -> Self {
        MetricValue::Number(n)
    }
}

macro_rules! metric_from_number {
    ($($t:ty),*) => {
        $(impl From<$t> for MetricValue {
            fn from(v: $t) -> Self {
                MetricValue::Number(Number::from(v))
            }
        })*
    };
}

metric_from_number!(i8, i16, i32, i64, u8, u16, u32, f32, f64);

impl From<&str> for MetricValue {
    fn from(s: &str) -> Self {
        MetricValue::Text(s.to_string())
    }
}

impl From<String> for MetricValue {
    fn from(s: String) -> Self {
        MetricValue::Text(s)
    }
}

impl From<serde_json::Value> for MetricValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(s) => MetricValue::Text(s),
            serde_json::Value::Number(n) => match (n.as_i64(), n.as_f64()) {
                (Some(i), _) => MetricValue::Number(Number::Int(i)),
                (None, Some(f)) => MetricValue::Number(Number::Float(f)),
                // u64 above i64::MAX without an f64 form cannot happen; keep it opaque
                (None, None) => MetricValue::Opaque(serde_json::Value::Number(n)),
            },
            other => MetricValue::Opaque(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_number_ordering_mixed() {
        assert!(Number::Int(3) < Number::Int(7));
        assert!(Number::Int(3) < Number::Float(3.5));
        assert!(Number::Float(2.5) < Number::Int(3));
        assert_eq!(Number::Int(4), Number::Float(4.0));
    }

    #[test]
    fn test_json_canonicalization() {
        assert_eq!(MetricValue::from(json!(5)), MetricValue::from(5));
        assert_eq!(MetricValue::from(json!("ok")), MetricValue::from("ok"));
        assert_eq!(
            MetricValue::from(json!({"a": [1, 2]})),
            MetricValue::Opaque(json!({"a": [1, 2]}))
        );
        assert_eq!(
            MetricValue::from(json!(true)),
            MetricValue::Opaque(json!(true))
        );
    }

    #[test]
    fn test_from_serialize_and_back() {
        let codes = vec![("200", 10), ("404", 2)];
        let value = MetricValue::from_serialize(&codes).unwrap();
        assert!(matches!(value, MetricValue::Opaque(_)));
        let back: Vec<(String, i32)> = value.to_structure().unwrap();
        assert_eq!(back, vec![("200".to_string(), 10), ("404".to_string(), 2)]);
    }
}
