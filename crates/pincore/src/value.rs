use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Dynamic value type for node inputs/outputs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Bytes(Vec<u8>),
    Json(serde_json::Value),
    Array(Vec<Value>),
    Object(HashMap<String, Value>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Value::Json(j) => Some(j),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The declared type this value satisfies without coercion
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Null => DataType::Null,
            Value::Bool(_) => DataType::Bool,
            Value::Number(_) => DataType::Number,
            Value::String(_) => DataType::String,
            Value::Bytes(_) => DataType::Bytes,
            Value::Json(_) => DataType::Json,
            Value::Array(_) => DataType::Array,
            Value::Object(_) => DataType::Object,
        }
    }

    /// Convert plain JSON into the structured value representation
    pub fn from_json(json: serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(0.0)),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(arr) => {
                Value::Array(arr.into_iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(obj) => Value::Object(
                obj.into_iter()
                    .map(|(k, v)| (k, Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Plain JSON rendering (bytes become an array of numbers)
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Bytes(b) => serde_json::Value::Array(
                b.iter().map(|byte| serde_json::Value::from(*byte)).collect(),
            ),
            Value::Json(j) => j.clone(),
            Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Object(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }

    /// Lossless conversion to `target`, or `None` when no such conversion exists
    pub fn coerce_to(&self, target: &DataType) -> Option<Value> {
        if &self.data_type() == target {
            return Some(self.clone());
        }

        match (target, self) {
            (DataType::Json, value) => Some(Value::Json(value.to_json())),
            (DataType::String, Value::Number(n)) => Some(Value::String(format_number(*n))),
            (DataType::String, Value::Bool(b)) => Some(Value::String(b.to_string())),
            (DataType::String, Value::Json(serde_json::Value::String(s))) => {
                Some(Value::String(s.clone()))
            }
            (DataType::Number, Value::String(s)) => s.trim().parse().ok().map(Value::Number),
            (DataType::Number, Value::Bool(b)) => Some(Value::Number(if *b { 1.0 } else { 0.0 })),
            (DataType::Number, Value::Json(serde_json::Value::Number(n))) => {
                n.as_f64().map(Value::Number)
            }
            (DataType::Bool, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Some(Value::Bool(true)),
                "false" => Some(Value::Bool(false)),
                _ => None,
            },
            (DataType::Bool, Value::Json(serde_json::Value::Bool(b))) => Some(Value::Bool(*b)),
            (DataType::Array, Value::Json(json @ serde_json::Value::Array(_)))
            | (DataType::Object, Value::Json(json @ serde_json::Value::Object(_))) => {
                Some(Value::from_json(json.clone()))
            }
            _ => None,
        }
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<serde_json::Value> for Value {
    fn from(j: serde_json::Value) -> Self {
        Value::Json(j)
    }
}

/// Declared type of a parameter slot
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DataType {
    Null,
    Bool,
    Number,
    String,
    Bytes,
    Json,
    Array,
    Object,
    Custom(String),
}

impl DataType {
    pub fn name(&self) -> &str {
        match self {
            DataType::Null => "null",
            DataType::Bool => "bool",
            DataType::Number => "number",
            DataType::String => "string",
            DataType::Bytes => "bytes",
            DataType::Json => "json",
            DataType::Array => "array",
            DataType::Object => "object",
            DataType::Custom(name) => name,
        }
    }
}

impl From<String> for DataType {
    fn from(name: String) -> Self {
        match name.as_str() {
            "null" => DataType::Null,
            "bool" => DataType::Bool,
            "number" => DataType::Number,
            "string" => DataType::String,
            "bytes" => DataType::Bytes,
            "json" => DataType::Json,
            "array" => DataType::Array,
            "object" => DataType::Object,
            _ => DataType::Custom(name),
        }
    }
}

impl From<&str> for DataType {
    fn from(name: &str) -> Self {
        DataType::from(name.to_string())
    }
}

impl From<DataType> for String {
    fn from(ty: DataType) -> Self {
        ty.name().to_string()
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
