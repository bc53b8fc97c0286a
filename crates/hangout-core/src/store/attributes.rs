//! Backing data of a store: a JSON object or a JSON array

use crate::error::{Error, Result};
use serde_json::{Map, Value};

/// Store backing data
///
/// Sequence-backed stores address items by decimal index; deleting an item
/// shifts the following ones down.
#[derive(Debug, Clone, PartialEq)]
pub enum Attributes {
    /// Keyed attributes in insertion order
    Map(Map<String, Value>),
    /// Indexed attributes
    List(Vec<Value>),
}

impl Default for Attributes {
    fn default() -> Self {
        Attributes::Map(Map::new())
    }
}

/// Canonical decimal index: digits only, no leading zero except "0"
fn index(key: &str) -> Option<usize> {
    let canonical = !key.is_empty()
        && key.bytes().all(|b| b.is_ascii_digit())
        && (key == "0" || !key.starts_with('0'));
    if canonical {
        key.parse().ok()
    } else {
        None
    }
}

impl Attributes {
    /// Build backing data from a JSON object or array
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Attributes::Map(map)),
            Value::Array(items) => Ok(Attributes::List(items)),
            other => Err(Error::validation(format!(
                "store data must be an object or an array, got {}",
                other
            ))),
        }
    }

    /// Look up a key
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Attributes::Map(map) => map.get(key),
            Attributes::List(items) => index(key).and_then(|i| items.get(i)),
        }
    }

    /// Insert or replace, returning the previous value.
    ///
    /// A sequence accepts existing indices and the index one past the end.
    pub fn insert(&mut self, key: &str, value: Value) -> Result<Option<Value>> {
        match self {
            Attributes::Map(map) => Ok(map.insert(key.to_string(), value)),
            Attributes::List(items) => match index(key) {
                Some(i) if i < items.len() => Ok(Some(std::mem::replace(&mut items[i], value))),
                Some(i) if i == items.len() => {
                    items.push(value);
                    Ok(None)
                }
                _ => Err(Error::validation(format!(
                    "invalid index '{}' for a store of {} items",
                    key,
                    items.len()
                ))),
            },
        }
    }

    /// Remove a key, splicing sequences
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        match self {
            Attributes::Map(map) => map.shift_remove(key),
            Attributes::List(items) => match index(key) {
                Some(i) if i < items.len() => Some(items.remove(i)),
                _ => None,
            },
        }
    }

    /// Owned key/value pairs in order
    pub fn entries(&self) -> Vec<(String, Value)> {
        match self {
            Attributes::Map(map) => map
                .iter()
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
            Attributes::List(items) => items
                .iter()
                .enumerate()
                .map(|(i, value)| (i.to_string(), value.clone()))
                .collect(),
        }
    }

    /// Number of attributes
    pub fn len(&self) -> usize {
        match self {
            Attributes::Map(map) => map.len(),
            Attributes::List(items) => items.len(),
        }
    }

    /// Whether there are no attributes
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// JSON form of the data
    pub fn to_value(&self) -> Value {
        match self {
            Attributes::Map(map) => Value::Object(map.clone()),
            Attributes::List(items) => Value::Array(items.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_map_keeps_insertion_order_after_removal() {
        let mut data = Attributes::from_value(json!({"a": 1, "b": 2, "c": 3})).unwrap();
        assert_eq!(data.remove("b"), Some(json!(2)));
        let keys: Vec<_> = data.entries().into_iter().map(|(key, _)| key).collect();
        assert_eq!(keys, vec!["a", "c"]);
    }

    #[test]
    fn test_list_indices() {
        let mut data = Attributes::from_value(json!([1, 2])).unwrap();
        assert_eq!(data.get("1"), Some(&json!(2)));
        assert_eq!(data.get("x"), None);
        assert_eq!(data.insert("0", json!(5)).unwrap(), Some(json!(1)));
        assert_eq!(data.insert("2", json!(3)).unwrap(), None);
        assert!(data.insert("4", json!(3)).is_err());
        assert_eq!(data.remove("7"), None);
        assert_eq!(data.to_value(), json!([5, 2, 3]));
    }

    #[test]
    fn test_list_keys_must_be_canonical() {
        let mut data = Attributes::from_value(json!([1, 2])).unwrap();
        for alias in ["01", "+1", " 1", "1 ", ""] {
            assert_eq!(data.get(alias), None, "{:?}", alias);
            assert!(data.insert(alias, json!(9)).is_err(), "{:?}", alias);
            assert_eq!(data.remove(alias), None, "{:?}", alias);
        }
        assert_eq!(data.get("0"), Some(&json!(1)));
        assert_eq!(data.to_value(), json!([1, 2]));
    }

    #[test]
    fn test_scalars_are_rejected() {
        assert!(Attributes::from_value(json!("text")).is_err());
        assert!(Attributes::from_value(Value::Null).is_err());
    }
}
