use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One parameter value. The wire protocols restrict parameters to these
/// four primitive kinds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Bool(bool),
    Int(i32),
    Double(f64),
    Str(String),
}

impl From<bool> for ParameterValue {
    fn from(v: bool) -> Self {
        ParameterValue::Bool(v)
    }
}

impl From<i32> for ParameterValue {
    fn from(v: i32) -> Self {
        ParameterValue::Int(v)
    }
}

impl From<f64> for ParameterValue {
    fn from(v: f64) -> Self {
        ParameterValue::Double(v)
    }
}

impl From<&str> for ParameterValue {
    fn from(v: &str) -> Self {
        ParameterValue::Str(v.to_string())
    }
}

impl From<String> for ParameterValue {
    fn from(v: String) -> Self {
        ParameterValue::Str(v)
    }
}

/// String-keyed parameter map attached to requests, tensors and workers.
/// Keys are unique; insertion order is irrelevant.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterMap {
    entries: BTreeMap<String, ParameterValue>,
}

impl ParameterMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl Into<String>, value: impl Into<ParameterValue>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn has(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&ParameterValue> {
        self.entries.get(key)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.entries.get(key) {
            Some(ParameterValue::Bool(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_i32(&self, key: &str) -> Option<i32> {
        match self.entries.get(key) {
            Some(ParameterValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        match self.entries.get(key) {
            Some(ParameterValue::Double(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.entries.get(key) {
            Some(ParameterValue::Str(v)) => Some(v.as_str()),
            _ => None,
        }
    }

    /// Copies every entry of `other` into this map, overwriting on key
    /// collision.
    pub fn merge(&mut self, other: &ParameterMap) {
        for (key, value) in &other.entries {
            self.entries.insert(key.clone(), value.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParameterValue)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, ParameterValue)> for ParameterMap {
    fn from_iter<I: IntoIterator<Item = (String, ParameterValue)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_getters() {
        let mut params = ParameterMap::new();
        params.put("batch_size", 4);
        params.put("worker", "echo");
        params.put("share", true);
        params.put("scale", 0.5);

        assert_eq!(params.get_i32("batch_size"), Some(4));
        assert_eq!(params.get_str("worker"), Some("echo"));
        assert_eq!(params.get_bool("share"), Some(true));
        assert_eq!(params.get_f64("scale"), Some(0.5));
        assert_eq!(params.get_i32("worker"), None);
        assert!(!params.has("missing"));
    }

    #[test]
    fn serde_round_trip() {
        let mut params = ParameterMap::new();
        params.put("batch_size", 4);
        params.put("worker", "echo");
        params.put("scale", 0.25);
        params.put("share", true);

        let json = serde_json::to_string(&params).unwrap();
        let back: ParameterMap = serde_json::from_str(&json).unwrap();
        assert_eq!(back, params);
    }

    #[test]
    fn merge_overwrites() {
        let mut base = ParameterMap::new();
        base.put("batch_size", 1);
        let mut overlay = ParameterMap::new();
        overlay.put("batch_size", 8);
        overlay.put("model", "/tmp/model.onnx");

        base.merge(&overlay);
        assert_eq!(base.get_i32("batch_size"), Some(8));
        assert_eq!(base.get_str("model"), Some("/tmp/model.onnx"));
    }
}
