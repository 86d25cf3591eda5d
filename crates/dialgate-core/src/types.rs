use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The working memory of one USSD session
///
/// This is a wrapper around a JSON object. Flow authors read it through
/// template placeholders and input-collection writes land in it, so keys
/// are free-form by design.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct SessionState {
    /// The inner key-value entries
    #[serde(flatten)]
    entries: Map<String, Value>,
}

impl SessionState {
    /// Create an empty state blob
    pub fn new() -> Self {
        Self {
            entries: Map::new(),
        }
    }

    /// Get a top-level value by key
    #[inline]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Set a top-level value
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.entries.insert(key.into(), value);
    }

    /// Remove a top-level value
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.remove(key)
    }

    /// Check whether a top-level key is present
    #[inline]
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Merge a set of entries into the blob, overwriting existing keys
    pub fn merge(&mut self, entries: Map<String, Value>) {
        for (key, value) in entries {
            self.entries.insert(key, value);
        }
    }

    /// Insert a value into a nested object, creating the object if needed
    ///
    /// Used for the `collected_inputs` map: a non-object value under
    /// `outer` is replaced.
    pub fn set_nested(&mut self, outer: &str, key: impl Into<String>, value: Value) {
        let entry = self
            .entries
            .entry(outer.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        if let Some(map) = entry.as_object_mut() {
            map.insert(key.into(), value);
        }
    }

    /// Resolve a dotted path against the state tree
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let first = parts.next()?;
        let mut current = self.entries.get(first)?;
        for part in parts {
            current = descend(current, part)?;
        }
        Some(current)
    }

    /// Number of top-level entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the blob holds no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Borrow the inner map
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.entries
    }
}

impl From<Map<String, Value>> for SessionState {
    fn from(entries: Map<String, Value>) -> Self {
        Self { entries }
    }
}

/// Resolve a dotted path against an arbitrary JSON value
///
/// Array segments may be numeric indexes. An empty path returns the root.
pub fn lookup_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(root);
    }
    let mut current = root;
    for part in path.split('.') {
        current = descend(current, part)?;
    }
    Some(current)
}

fn descend<'a>(value: &'a Value, part: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => map.get(part),
        Value::Array(items) => part.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }
}

/// Whether a value should be treated as absent by fallback chains
///
/// Null, the empty string, and empty arrays do not satisfy a lookup.
pub fn value_is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_and_get() {
        let mut state = SessionState::new();
        state.set("balance", json!("500"));

        assert_eq!(state.get("balance"), Some(&json!("500")));
        assert!(state.get("missing").is_none());
        assert_eq!(state.len(), 1);
        assert!(!state.is_empty());
    }

    #[test]
    fn test_merge_overwrites() {
        let mut state = SessionState::new();
        state.set("a", json!(1));

        let mut incoming = Map::new();
        incoming.insert("a".to_string(), json!(2));
        incoming.insert("b".to_string(), json!("two"));
        state.merge(incoming);

        assert_eq!(state.get("a"), Some(&json!(2)));
        assert_eq!(state.get("b"), Some(&json!("two")));
    }

    #[test]
    fn test_set_nested_creates_object() {
        let mut state = SessionState::new();
        state.set_nested("collected_inputs", "pin", json!("1234"));
        state.set_nested("collected_inputs", "amount", json!("50"));

        assert_eq!(
            state.lookup("collected_inputs.pin"),
            Some(&json!("1234"))
        );
        assert_eq!(
            state.lookup("collected_inputs.amount"),
            Some(&json!("50"))
        );
    }

    #[test]
    fn test_set_nested_replaces_scalar() {
        let mut state = SessionState::new();
        state.set("collected_inputs", json!("not an object"));
        state.set_nested("collected_inputs", "pin", json!("1234"));

        assert_eq!(
            state.lookup("collected_inputs.pin"),
            Some(&json!("1234"))
        );
    }

    #[test]
    fn test_lookup_nested_path() {
        let mut state = SessionState::new();
        state.set("account", json!({"owner": {"name": "Amina"}}));

        assert_eq!(
            state.lookup("account.owner.name"),
            Some(&json!("Amina"))
        );
        assert!(state.lookup("account.owner.missing").is_none());
        assert!(state.lookup("missing.path").is_none());
    }

    #[test]
    fn test_lookup_path_array_index() {
        let value = json!({"items": [{"name": "first"}, {"name": "second"}]});

        assert_eq!(
            lookup_path(&value, "items.1.name"),
            Some(&json!("second"))
        );
        assert!(lookup_path(&value, "items.5.name").is_none());
        assert!(lookup_path(&value, "items.x").is_none());
    }

    #[test]
    fn test_lookup_path_empty_path_returns_root() {
        let value = json!({"a": 1});
        assert_eq!(lookup_path(&value, ""), Some(&value));
    }

    #[test]
    fn test_value_is_empty() {
        assert!(value_is_empty(&Value::Null));
        assert!(value_is_empty(&json!("")));
        assert!(value_is_empty(&json!([])));
        assert!(!value_is_empty(&json!("x")));
        assert!(!value_is_empty(&json!(0)));
        assert!(!value_is_empty(&json!(false)));
    }

    #[test]
    fn test_serialization_is_flat() {
        let mut state = SessionState::new();
        state.set("a", json!(1));

        let serialized = serde_json::to_string(&state).unwrap();
        assert_eq!(serialized, r#"{"a":1}"#);

        let deserialized: SessionState = serde_json::from_str(&serialized).unwrap();
        assert_eq!(deserialized, state);
    }
}
