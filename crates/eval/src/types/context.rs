//! The value context: one snapshot of a form instance's field values.

use std::collections::BTreeMap;

use super::{EvalError, Value};

/// An immutable-by-convention snapshot of `{ fieldId -> value }`.
///
/// Ordered so that iteration, and everything derived from it, is
/// deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValueContext {
    values: BTreeMap<String, Value>,
}

impl ValueContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a context from a JSON object of field values.
    pub fn from_json(v: &serde_json::Value) -> Result<Self, EvalError> {
        let obj = v.as_object().ok_or_else(|| EvalError::InvalidContext {
            found: json_kind(v),
        })?;
        Ok(obj
            .iter()
            .map(|(k, v)| (k.clone(), Value::from_json(v)))
            .collect())
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.values
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }

    pub fn get(&self, field_id: &str) -> Option<&Value> {
        self.values.get(field_id)
    }

    pub fn contains(&self, field_id: &str) -> bool {
        self.values.contains_key(field_id)
    }

    /// True when the field is absent or holds a blank value.
    pub fn is_blank(&self, field_id: &str) -> bool {
        self.get(field_id).map_or(true, Value::is_blank)
    }

    pub fn insert(&mut self, field_id: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(field_id.into(), value.into());
    }

    /// A copy of this snapshot with one field replaced.
    pub fn with(&self, field_id: &str, value: Value) -> ValueContext {
        let mut next = self.clone();
        next.values.insert(field_id.to_owned(), value);
        next
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for ValueContext {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        ValueContext {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl serde::Serialize for ValueContext {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

fn json_kind(v: &serde_json::Value) -> &'static str {
    match v {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
