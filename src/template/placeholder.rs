use serde::Serialize;
use std::collections::HashMap;

/// A value a pattern can reference by name.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PlaceholderValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl From<&str> for PlaceholderValue {
    fn from(value: &str) -> Self {
        PlaceholderValue::Text(value.to_string())
    }
}

impl From<String> for PlaceholderValue {
    fn from(value: String) -> Self {
        PlaceholderValue::Text(value)
    }
}

impl From<bool> for PlaceholderValue {
    fn from(value: bool) -> Self {
        PlaceholderValue::Bool(value)
    }
}

impl From<i64> for PlaceholderValue {
    fn from(value: i64) -> Self {
        PlaceholderValue::Integer(value)
    }
}

impl From<u64> for PlaceholderValue {
    fn from(value: u64) -> Self {
        PlaceholderValue::Integer(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<f64> for PlaceholderValue {
    fn from(value: f64) -> Self {
        PlaceholderValue::Float(value)
    }
}

impl<T: Into<PlaceholderValue>> From<Option<T>> for PlaceholderValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(PlaceholderValue::Null)
    }
}

/// Per-call accumulator of values available to templates.
///
/// Keys are only ever added or overwritten, never removed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Placeholders {
    values: HashMap<String, PlaceholderValue>,
}

impl Placeholders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<PlaceholderValue>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&PlaceholderValue> {
        self.values.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K: Into<String>> Extend<(K, PlaceholderValue)> for Placeholders {
    fn extend<I: IntoIterator<Item = (K, PlaceholderValue)>>(&mut self, iter: I) {
        for (key, value) in iter {
            self.values.insert(key.into(), value);
        }
    }
}

impl<K: Into<String>> FromIterator<(K, PlaceholderValue)> for Placeholders {
    fn from_iter<I: IntoIterator<Item = (K, PlaceholderValue)>>(iter: I) -> Self {
        let mut placeholders = Placeholders::new();
        placeholders.extend(iter);
        placeholders
    }
}
