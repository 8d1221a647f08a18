//! Compact BSON value model.
//!
//! The planner only needs enough of BSON to carry inline literals
//! ([`crate::op::WorkflowOp::Pure`]), selector operands, and the rendered form
//! of pipeline stages. Full wire-level marshalling belongs to the execution
//! layer and is out of scope here.
//!
//! `Doc` preserves insertion order (stage documents are order-sensitive), and
//! `Double` wraps [`OrderedFloat`] so values are `Eq` and op trees can be
//! compared structurally.

use linked_hash_map::LinkedHashMap;
use ordered_float::OrderedFloat;
use serde_json::{Number, Value};
use std::fmt;

/// A BSON value, restricted to the subset the planner constructs or inspects.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Bson {
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Double(OrderedFloat<f64>),
    Text(String),
    Arr(Vec<Bson>),
    Doc(LinkedHashMap<String, Bson>),
}

impl Bson {
    /// Build a document from ordered `(name, value)` pairs.
    pub fn doc<I>(entries: I) -> Bson
    where
        I: IntoIterator<Item = (String, Bson)>,
    {
        Bson::Doc(entries.into_iter().collect())
    }

    /// Convert into the JSON representation used for display and tests.
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Bson::Null => Value::Null,
            Bson::Bool(b) => Value::Bool(*b),
            Bson::Int32(n) => Value::from(*n),
            Bson::Int64(n) => Value::from(*n),
            Bson::Double(n) => Number::from_f64(n.into_inner()).map_or(Value::Null, Value::Number),
            Bson::Text(s) => Value::String(s.clone()),
            Bson::Arr(items) => Value::Array(items.iter().map(Bson::to_json).collect()),
            Bson::Doc(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

impl From<Value> for Bson {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Bson::Null,
            Value::Bool(b) => Bson::Bool(b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Bson::Int64(i)
                } else {
                    Bson::Double(OrderedFloat(n.as_f64().unwrap_or(f64::NAN)))
                }
            }
            Value::String(s) => Bson::Text(s),
            Value::Array(items) => Bson::Arr(items.into_iter().map(Bson::from).collect()),
            Value::Object(fields) => Bson::Doc(
                fields
                    .into_iter()
                    .map(|(k, v)| (k, Bson::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<&str> for Bson {
    fn from(s: &str) -> Self {
        Bson::Text(s.to_string())
    }
}

impl From<i64> for Bson {
    fn from(n: i64) -> Self {
        Bson::Int64(n)
    }
}

impl From<f64> for Bson {
    fn from(n: f64) -> Self {
        Bson::Double(OrderedFloat(n))
    }
}

impl From<bool> for Bson {
    fn from(b: bool) -> Self {
        Bson::Bool(b)
    }
}

impl fmt::Display for Bson {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}
