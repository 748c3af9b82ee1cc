/*
 * namespace.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Variable bindings passed into and exported out of a render.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A map of variable names to values.
///
/// Values are JSON values; they become Lua values when a render starts
/// (objects become tables, arrays become sequences, `null` becomes `nil`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Namespace {
    vars: BTreeMap<String, Value>,
}

impl Namespace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a binding, replacing any previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    /// Builder form of [`Namespace::insert`].
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.vars.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    /// Overlay `other` onto this namespace; its bindings win.
    pub fn merge(&mut self, other: Namespace) {
        self.vars.extend(other.vars);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.vars.iter()
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Build a namespace from a JSON object. Returns `None` for other values.
    pub fn from_json(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(map.into_iter().collect()),
            _ => None,
        }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Namespace {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl IntoIterator for Namespace {
    type Item = (String, Value);
    type IntoIter = std::collections::btree_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.vars.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_overrides_win() {
        let mut ns = Namespace::new().with("a", 1).with("b", "two");
        ns.merge(Namespace::new().with("b", 2).with("c", true));
        assert_eq!(ns.get("a"), Some(&json!(1)));
        assert_eq!(ns.get("b"), Some(&json!(2)));
        assert_eq!(ns.get("c"), Some(&json!(true)));
        assert_eq!(ns.len(), 3);
    }

    #[test]
    fn test_from_json() {
        let ns = Namespace::from_json(json!({"name": "world", "n": [1, 2]})).unwrap();
        assert_eq!(ns.get("name"), Some(&json!("world")));
        assert!(ns.contains("n"));
        assert!(Namespace::from_json(json!([1, 2])).is_none());
    }

    #[test]
    fn test_serializes_as_plain_object() {
        let ns = Namespace::new().with("x", 1);
        assert_eq!(serde_json::to_value(&ns).unwrap(), json!({"x": 1}));
    }
}
